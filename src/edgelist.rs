use log::{info, warn};
use std::collections::{BTreeMap, HashMap};

use crate::companies::category_label;
use crate::models::{Action, Direction, Edge, UserRecord};

/// Login → resolved company and company → category index, built once from
/// the full record set. Users whose inferred-company set is still ambiguous
/// (or empty) stay unresolved and their edges get dropped.
pub struct CompanyDirectory {
    user_company: HashMap<String, String>,
    categories: HashMap<String, i64>,
}

impl CompanyDirectory {
    pub fn from_records(
        records: &BTreeMap<String, UserRecord>,
        categories: &HashMap<String, i64>,
    ) -> Self {
        let mut user_company = HashMap::new();
        for record in records.values() {
            if let Some(company) = record.resolved_company() {
                user_company.insert(record.user_login.clone(), company.to_string());
            }
        }
        Self {
            user_company,
            categories: categories.clone(),
        }
    }

    pub fn company_of(&self, login: &str) -> Option<&str> {
        self.user_company.get(login).map(String::as_str)
    }

    pub fn category_of(&self, company: &str) -> Option<i64> {
        self.categories.get(company).copied()
    }

    pub fn resolved_user_count(&self) -> usize {
        self.user_company.len()
    }
}

/// Expands every record's eight relation lists into a flat list of directed
/// edges. Only interactions where BOTH endpoints resolve to a known company
/// are kept, which bounds the graph to the crawled and inferred population.
/// No deduplication happens here; repeats stay separate edges.
pub fn build_edge_list(
    records: &BTreeMap<String, UserRecord>,
    directory: &CompanyDirectory,
) -> Vec<Edge> {
    let mut edges = Vec::new();
    let mut dropped = 0usize;

    for record in records.values() {
        for (action, direction, items) in record.relations() {
            for item in items {
                if item.owner_login.is_empty() {
                    continue;
                }
                let (src, target) = match direction {
                    Direction::In => (item.owner_login.as_str(), record.user_login.as_str()),
                    Direction::Out => (record.user_login.as_str(), item.owner_login.as_str()),
                };

                let (Some(src_company), Some(target_company)) =
                    (directory.company_of(src), directory.company_of(target))
                else {
                    dropped += 1;
                    continue;
                };

                let src_category = directory.category_of(src_company);
                let target_category = directory.category_of(target_company);
                let intra = src_company == target_company;

                edges.push(Edge {
                    src: src.to_string(),
                    target: target.to_string(),
                    src_company: src_company.to_string(),
                    target_company: target_company.to_string(),
                    src_company_category: src_category,
                    src_company_label: category_label(src_category),
                    target_company_category: target_category,
                    target_company_label: category_label(target_category),
                    d_intra_level: intra as u8,
                    d_inter_level: !intra as u8,
                    edge_repo: item
                        .repo_name
                        .as_ref()
                        .map(|repo| format!("{}/{}", repo, src)),
                    action,
                    created_at: item.created_at.clone(),
                });
            }
        }
    }

    if edges.is_empty() {
        warn!("Edge list is empty; no interaction had both endpoints resolved.");
    }
    info!(
        "Built {} edges ({} interactions dropped for unresolved endpoints).",
        edges.len(),
        dropped
    );
    edges
}

/// Edges whose action is in the given subset, e.g. the attention or the
/// collaboration actions.
pub fn filter_actions(edges: &[Edge], actions: &[Action]) -> Vec<Edge> {
    edges
        .iter()
        .filter(|edge| actions.contains(&edge.action))
        .cloned()
        .collect()
}

/// Edge direction relative to a looked-up company.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupDirection {
    In,
    Out,
    All,
}

/// Filters the edge list for edges touching a company (or a specific company
/// pair), optionally restricted by direction and excluding intra-company
/// self-loops.
pub fn look_up_company(
    edges: &[Edge],
    company: &str,
    alternative_company: Option<&str>,
    direction: LookupDirection,
    exclude_self_loops: bool,
) -> Vec<Edge> {
    edges
        .iter()
        .filter(|edge| match alternative_company {
            None => edge.src_company == company || edge.target_company == company,
            Some(other) => {
                (edge.src_company == company && edge.target_company == other)
                    || (edge.src_company == other && edge.target_company == company)
            }
        })
        .filter(|edge| !exclude_self_loops || edge.src_company != edge.target_company)
        .filter(|edge| match direction {
            LookupDirection::Out => edge.src_company == company,
            LookupDirection::In => edge.target_company == company,
            LookupDirection::All => true,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Interaction;

    fn interaction(owner: &str, repo: Option<&str>) -> Interaction {
        Interaction {
            repo_name: repo.map(str::to_string),
            owner_login: owner.to_string(),
            created_at: Some("2021-03-01".to_string()),
        }
    }

    fn record(login: &str, company: Option<&str>) -> UserRecord {
        UserRecord {
            user_login: login.to_string(),
            search_with_company: None,
            listed_company: None,
            inferred_company: company.map(|c| vec![c.to_string()]),
            matched_company_strings: None,
            usertype: None,
            email: None,
            github_location: None,
            matched_location: None,
            bio: None,
            blog: None,
            repo_names: vec![],
            follows_in: vec![],
            follows_out: vec![],
            watches_in: vec![],
            watches_out: vec![],
            stars_in: vec![],
            stars_out: vec![],
            forks_in: vec![],
            forks_out: vec![],
        }
    }

    fn directory(records: &BTreeMap<String, UserRecord>) -> CompanyDirectory {
        let categories = HashMap::from([("trifork".to_string(), 1), ("kmd".to_string(), 3)]);
        CompanyDirectory::from_records(records, &categories)
    }

    #[test]
    fn unresolved_endpoints_drop_the_interaction() {
        let mut alice = record("alice", Some("trifork"));
        // Alice follows bob, who never resolved to a company.
        alice.follows_out.push(interaction("bob", None));
        let mut records = BTreeMap::new();
        records.insert("alice".to_string(), alice);
        records.insert("bob".to_string(), record("bob", None));

        let edges = build_edge_list(&records, &directory(&records));
        assert!(edges.is_empty());
    }

    #[test]
    fn direction_derives_source_and_target() {
        let mut alice = record("alice", Some("trifork"));
        alice.follows_in.push(interaction("bob", None));
        alice.stars_out.push(interaction("bob", Some("toolkit")));
        let mut records = BTreeMap::new();
        records.insert("alice".to_string(), alice);
        records.insert("bob".to_string(), record("bob", Some("kmd")));

        let edges = build_edge_list(&records, &directory(&records));
        assert_eq!(edges.len(), 2);

        let follow = edges.iter().find(|e| e.action == Action::Follows).unwrap();
        assert_eq!((follow.src.as_str(), follow.target.as_str()), ("bob", "alice"));
        assert_eq!(follow.src_company, "kmd");
        assert_eq!(follow.edge_repo, None);

        let star = edges.iter().find(|e| e.action == Action::Stars).unwrap();
        assert_eq!((star.src.as_str(), star.target.as_str()), ("alice", "bob"));
        assert_eq!(star.edge_repo.as_deref(), Some("toolkit/alice"));
    }

    #[test]
    fn intra_and_inter_flags_are_mutually_exclusive() {
        let mut alice = record("alice", Some("trifork"));
        alice.follows_out.push(interaction("carol", None));
        alice.follows_out.push(interaction("bob", None));
        let mut records = BTreeMap::new();
        records.insert("alice".to_string(), alice);
        records.insert("bob".to_string(), record("bob", Some("kmd")));
        records.insert("carol".to_string(), record("carol", Some("trifork")));

        let edges = build_edge_list(&records, &directory(&records));
        for edge in &edges {
            assert_eq!(edge.d_intra_level + edge.d_inter_level, 1);
        }
        let intra = edges.iter().find(|e| e.target == "carol").unwrap();
        assert_eq!((intra.d_intra_level, intra.d_inter_level), (1, 0));
        let inter = edges.iter().find(|e| e.target == "bob").unwrap();
        assert_eq!((inter.d_intra_level, inter.d_inter_level), (0, 1));
    }

    #[test]
    fn categories_and_labels_attach_per_side() {
        let mut alice = record("alice", Some("trifork"));
        alice.forks_in.push(interaction("dora", Some("engine")));
        let mut records = BTreeMap::new();
        records.insert("alice".to_string(), alice);
        records.insert("dora".to_string(), record("dora", Some("uncategorized co")));

        let edges = build_edge_list(&records, &directory(&records));
        let edge = &edges[0];
        assert_eq!(edge.src_company_category, None);
        assert_eq!(edge.src_company_label, "NA");
        assert_eq!(edge.target_company_category, Some(1));
        assert_eq!(
            edge.target_company_label,
            "1 Digital and marketing consultancies"
        );
    }

    #[test]
    fn ambiguous_records_stay_unresolved() {
        let mut ambiguous = record("eve", Some("trifork"));
        ambiguous.inferred_company = Some(vec!["trifork".to_string(), "kmd".to_string()]);
        let mut records = BTreeMap::new();
        records.insert("eve".to_string(), ambiguous);

        let directory = directory(&records);
        assert_eq!(directory.company_of("eve"), None);
        assert_eq!(directory.resolved_user_count(), 0);
    }

    #[test]
    fn company_lookup_respects_direction_and_self_loops() {
        let mut alice = record("alice", Some("trifork"));
        alice.follows_out.push(interaction("bob", None));
        alice.follows_in.push(interaction("bob", None));
        alice.follows_out.push(interaction("carol", None));
        let mut records = BTreeMap::new();
        records.insert("alice".to_string(), alice);
        records.insert("bob".to_string(), record("bob", Some("kmd")));
        records.insert("carol".to_string(), record("carol", Some("trifork")));

        let edges = build_edge_list(&records, &directory(&records));

        let out_only = look_up_company(&edges, "trifork", None, LookupDirection::Out, true);
        assert_eq!(out_only.len(), 1);
        assert_eq!(out_only[0].target_company, "kmd");

        let pair = look_up_company(&edges, "trifork", Some("kmd"), LookupDirection::All, true);
        assert_eq!(pair.len(), 2);

        let with_loops = look_up_company(&edges, "trifork", None, LookupDirection::All, false);
        assert_eq!(with_loops.len(), 3);
    }

    #[test]
    fn action_subsets_split_attention_and_collaboration() {
        let mut alice = record("alice", Some("trifork"));
        alice.stars_out.push(interaction("bob", Some("toolkit")));
        alice.forks_out.push(interaction("bob", Some("toolkit")));
        let mut records = BTreeMap::new();
        records.insert("alice".to_string(), alice);
        records.insert("bob".to_string(), record("bob", Some("kmd")));

        let edges = build_edge_list(&records, &directory(&records));
        assert_eq!(filter_actions(&edges, &Action::ATTENTION).len(), 1);
        assert_eq!(filter_actions(&edges, &Action::COLLABORATION).len(), 1);
    }
}
