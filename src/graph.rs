use log::info;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::companies::NA_LABEL;
use crate::models::{Action, Edge};

/// Which action family a company graph aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    Attention,
    Collaboration,
}

impl GraphKind {
    pub fn actions(self) -> &'static [Action] {
        match self {
            GraphKind::Attention => &Action::ATTENTION,
            GraphKind::Collaboration => &Action::COLLABORATION,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GraphKind::Attention => "attention",
            GraphKind::Collaboration => "collaboration",
        }
    }
}

/// Per-action occurrence counts carried on every graph edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCounts {
    pub follows: u32,
    pub stars: u32,
    pub watches: u32,
    pub forks: u32,
}

impl ActionCounts {
    pub fn bump(&mut self, action: Action) {
        match action {
            Action::Follows => self.follows += 1,
            Action::Stars => self.stars += 1,
            Action::Watches => self.watches += 1,
            Action::Forks => self.forks += 1,
        }
    }

    pub fn get(&self, action: Action) -> u32 {
        match action {
            Action::Follows => self.follows,
            Action::Stars => self.stars,
            Action::Watches => self.watches,
            Action::Forks => self.forks,
        }
    }

    /// Adds another count vector, restricted to the given action subset.
    pub fn add_restricted(&mut self, other: &ActionCounts, actions: &[Action]) {
        for action in actions {
            match action {
                Action::Follows => self.follows += other.follows,
                Action::Stars => self.stars += other.stars,
                Action::Watches => self.watches += other.watches,
                Action::Forks => self.forks += other.forks,
            }
        }
    }

    pub fn total(&self) -> u32 {
        self.follows + self.stars + self.watches + self.forks
    }
}

/// Edge payload of the user-level graph. Weight is fixed at 1: the edge
/// records existence of the user pair, the counts carry the multiplicity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEdge {
    pub weight: u32,
    pub counts: ActionCounts,
    pub d_intra_level: u8,
    pub d_inter_level: u8,
}

/// Node payload of the company-level graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyNode {
    pub company: String,
    pub category: Option<i64>,
    pub label: String,
}

/// Edge payload of the company-level graph. Weight counts the distinct
/// user-pair edges that collapsed onto this company pair, not the action
/// total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyEdge {
    pub weight: u32,
    pub counts: ActionCounts,
    pub d_intra_level: u8,
    pub d_inter_level: u8,
}

pub type UserGraph = DiGraph<String, UserEdge>;
pub type CompanyGraph = DiGraph<CompanyNode, CompanyEdge>;

/// Login → company over both sides of every edge in the set.
fn user_company_map(edges: &[Edge]) -> HashMap<&str, &str> {
    let mut map = HashMap::new();
    for edge in edges {
        map.insert(edge.src.as_str(), edge.src_company.as_str());
        map.insert(edge.target.as_str(), edge.target_company.as_str());
    }
    map
}

/// Company → (category, label), first occurrence wins; source occurrences
/// take precedence over target occurrences.
fn company_info_map(edges: &[Edge]) -> HashMap<&str, (Option<i64>, &str)> {
    let mut info = HashMap::new();
    for edge in edges {
        info.entry(edge.src_company.as_str())
            .or_insert((edge.src_company_category, edge.src_company_label.as_str()));
    }
    for edge in edges {
        info.entry(edge.target_company.as_str())
            .or_insert((edge.target_company_category, edge.target_company_label.as_str()));
    }
    info
}

/// Builds the user-level directed graph: one edge per distinct (src, target)
/// pair with weight 1 and the per-action occurrence counts, annotated
/// intra/inter from the endpoints' companies (an unknown endpoint zeroes
/// both flags).
pub fn build_user_graph(edges: &[Edge]) -> UserGraph {
    let mut pair_counts: BTreeMap<(&str, &str), ActionCounts> = BTreeMap::new();
    for edge in edges {
        pair_counts
            .entry((edge.src.as_str(), edge.target.as_str()))
            .or_default()
            .bump(edge.action);
    }

    let user_company = user_company_map(edges);
    let mut graph = UserGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

    for ((src, target), counts) in pair_counts {
        let src_idx = *nodes
            .entry(src)
            .or_insert_with(|| graph.add_node(src.to_string()));
        let target_idx = *nodes
            .entry(target)
            .or_insert_with(|| graph.add_node(target.to_string()));

        let (d_intra, d_inter) = match (user_company.get(src), user_company.get(target)) {
            (Some(src_company), Some(target_company)) => (
                (src_company == target_company) as u8,
                (src_company != target_company) as u8,
            ),
            _ => (0, 0),
        };

        graph.add_edge(
            src_idx,
            target_idx,
            UserEdge {
                weight: 1,
                counts,
                d_intra_level: d_intra,
                d_inter_level: d_inter,
            },
        );
    }

    info!(
        "Built user graph: {} nodes, {} edges.",
        graph.node_count(),
        graph.edge_count()
    );
    graph
}

/// Aggregates a user graph to the company level. Edge weight accumulates one
/// unit per underlying user-pair edge; the count vectors are summed
/// restricted to the requested action subset. `edges` must be the same set
/// the user graph was built from, as it supplies the login → company and
/// company → category maps. Nodes cover every company seen on either side of
/// any user edge, including companies that end up without edges, so
/// downstream density computations see the full population.
pub fn aggregate_to_company_graph(
    user_graph: &UserGraph,
    edges: &[Edge],
    actions: &[Action],
) -> CompanyGraph {
    let user_company = user_company_map(edges);
    let company_info = company_info_map(edges);

    let mut pair_weights: BTreeMap<(&str, &str), (u32, ActionCounts)> = BTreeMap::new();
    for edge_ref in user_graph.edge_references() {
        let src_login = user_graph[edge_ref.source()].as_str();
        let target_login = user_graph[edge_ref.target()].as_str();
        let (Some(&src_company), Some(&target_company)) =
            (user_company.get(src_login), user_company.get(target_login))
        else {
            continue;
        };

        let (weight, counts) = pair_weights
            .entry((src_company, target_company))
            .or_default();
        *weight += 1;
        counts.add_restricted(&edge_ref.weight().counts, actions);
    }

    let mut graph = CompanyGraph::new();
    let mut nodes: BTreeMap<&str, NodeIndex> = BTreeMap::new();
    let companies: BTreeSet<&str> = user_company.values().copied().collect();
    for company in companies {
        let (category, label) = company_info
            .get(company)
            .map(|(category, label)| (*category, (*label).to_string()))
            .unwrap_or((None, NA_LABEL.to_string()));
        let idx = graph.add_node(CompanyNode {
            company: company.to_string(),
            category,
            label,
        });
        nodes.insert(company, idx);
    }

    for ((src_company, target_company), (weight, counts)) in pair_weights {
        if weight == 0 {
            continue;
        }
        let intra = (src_company == target_company) as u8;
        graph.add_edge(
            nodes[src_company],
            nodes[target_company],
            CompanyEdge {
                weight,
                counts,
                d_intra_level: intra,
                d_inter_level: 1 - intra,
            },
        );
    }

    info!(
        "Aggregated company graph: {} nodes, {} edges.",
        graph.node_count(),
        graph.edge_count()
    );
    graph
}

/// Convenience wrapper mirroring the analysis flow: subset the edge list by
/// graph kind, build the user graph, aggregate to companies.
pub struct GraphBuilder {
    edges: Vec<Edge>,
    kind: GraphKind,
}

impl GraphBuilder {
    pub fn new(edges: &[Edge], kind: GraphKind) -> Self {
        let edges = edges
            .iter()
            .filter(|edge| kind.actions().contains(&edge.action))
            .cloned()
            .collect();
        Self { edges, kind }
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn user_graph(&self) -> UserGraph {
        build_user_graph(&self.edges)
    }

    pub fn company_graph(&self) -> CompanyGraph {
        let user_graph = self.user_graph();
        aggregate_to_company_graph(&user_graph, &self.edges, self.kind.actions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companies::category_label;

    fn edge(src: &str, src_company: &str, target: &str, target_company: &str, action: Action) -> Edge {
        let intra = src_company == target_company;
        Edge {
            src: src.to_string(),
            target: target.to_string(),
            src_company: src_company.to_string(),
            target_company: target_company.to_string(),
            src_company_category: None,
            src_company_label: category_label(None),
            target_company_category: None,
            target_company_label: category_label(None),
            d_intra_level: intra as u8,
            d_inter_level: !intra as u8,
            edge_repo: None,
            action,
            created_at: None,
        }
    }

    #[test]
    fn user_graph_deduplicates_pairs_and_counts_actions() {
        let edges = vec![
            edge("alice", "x", "bob", "y", Action::Stars),
            edge("alice", "x", "bob", "y", Action::Stars),
            edge("alice", "x", "bob", "y", Action::Follows),
            edge("bob", "y", "alice", "x", Action::Watches),
        ];
        let graph = build_user_graph(&edges);

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);
        let forward = graph
            .edge_references()
            .find(|e| graph[e.source()] == "alice")
            .unwrap()
            .weight();
        assert_eq!(forward.weight, 1);
        assert_eq!(forward.counts.stars, 2);
        assert_eq!(forward.counts.follows, 1);
        assert_eq!(forward.counts.watches, 0);
    }

    #[test]
    fn user_graph_annotates_intra_and_inter() {
        let edges = vec![
            edge("alice", "x", "bob", "x", Action::Follows),
            edge("alice", "x", "carol", "y", Action::Follows),
        ];
        let graph = build_user_graph(&edges);

        for edge_ref in graph.edge_references() {
            let payload = edge_ref.weight();
            assert_eq!(payload.d_intra_level + payload.d_inter_level, 1);
            let is_intra = graph[edge_ref.target()] == "bob";
            assert_eq!(payload.d_intra_level == 1, is_intra);
        }
    }

    #[test]
    fn company_weight_counts_distinct_user_pairs_not_actions() {
        // Two distinct user pairs between companies x and y, each pair with
        // three stars and one fork.
        let mut edges = Vec::new();
        for (a, b) in [("alice", "bob"), ("carol", "dave")] {
            for _ in 0..3 {
                edges.push(edge(a, "x", b, "y", Action::Stars));
            }
            edges.push(edge(a, "x", b, "y", Action::Forks));
        }

        let user_graph = build_user_graph(&edges);
        assert_eq!(user_graph.edge_count(), 2);

        // All actions included: weight 2, stars 6, forks 2.
        let all = aggregate_to_company_graph(&user_graph, &edges, &Action::ALL);
        assert_eq!(all.edge_count(), 1);
        let payload = all.edge_references().next().unwrap().weight();
        assert_eq!(payload.weight, 2);
        assert_eq!(payload.counts.stars, 6);
        assert_eq!(payload.counts.forks, 2);
        assert_eq!(payload.counts.follows, 0);

        // Attention-only restriction keeps the stars and drops the forks.
        let attention = aggregate_to_company_graph(&user_graph, &edges, &Action::ATTENTION);
        let payload = attention.edge_references().next().unwrap().weight();
        assert_eq!(payload.weight, 2);
        assert_eq!(payload.counts.stars, 6);
        assert_eq!(payload.counts.forks, 0);
    }

    #[test]
    fn company_graph_keeps_every_company_as_node() {
        let edges = vec![
            edge("alice", "x", "bob", "x", Action::Stars),
            edge("carol", "y", "dave", "z", Action::Stars),
        ];
        let user_graph = build_user_graph(&edges);
        let company_graph = aggregate_to_company_graph(&user_graph, &edges, &Action::ATTENTION);

        assert_eq!(company_graph.node_count(), 3);
        // Every present edge carries weight > 0.
        for edge_ref in company_graph.edge_references() {
            assert!(edge_ref.weight().weight > 0);
        }
    }

    #[test]
    fn company_graph_annotates_self_loops_as_intra() {
        let edges = vec![
            edge("alice", "x", "bob", "x", Action::Stars),
            edge("alice", "x", "carol", "y", Action::Stars),
        ];
        let user_graph = build_user_graph(&edges);
        let company_graph = aggregate_to_company_graph(&user_graph, &edges, &Action::ATTENTION);

        for edge_ref in company_graph.edge_references() {
            let payload = edge_ref.weight();
            let loops = edge_ref.source() == edge_ref.target();
            assert_eq!(payload.d_intra_level == 1, loops);
            assert_eq!(payload.d_intra_level + payload.d_inter_level, 1);
        }
    }

    #[test]
    fn company_nodes_carry_first_seen_category_or_na() {
        let mut categorized = edge("alice", "x", "bob", "y", Action::Stars);
        categorized.src_company_category = Some(2);
        categorized.src_company_label = category_label(Some(2));
        let edges = vec![categorized];

        let user_graph = build_user_graph(&edges);
        let company_graph = aggregate_to_company_graph(&user_graph, &edges, &Action::ATTENTION);

        let x = company_graph
            .node_weights()
            .find(|node| node.company == "x")
            .unwrap();
        assert_eq!(x.category, Some(2));
        assert_eq!(x.label, "2 Bespoke app companies");

        let y = company_graph
            .node_weights()
            .find(|node| node.company == "y")
            .unwrap();
        assert_eq!(y.category, None);
        assert_eq!(y.label, "NA");
    }

    #[test]
    fn graph_builder_subsets_by_kind() {
        let edges = vec![
            edge("alice", "x", "bob", "y", Action::Stars),
            edge("alice", "x", "bob", "y", Action::Forks),
        ];

        let attention = GraphBuilder::new(&edges, GraphKind::Attention);
        assert_eq!(attention.edge_count(), 1);
        let company_graph = attention.company_graph();
        let payload = company_graph.edge_references().next().unwrap().weight();
        assert_eq!(payload.counts.stars, 1);
        assert_eq!(payload.counts.forks, 0);

        let collaboration = GraphBuilder::new(&edges, GraphKind::Collaboration);
        assert_eq!(collaboration.edge_count(), 1);
        let company_graph = collaboration.company_graph();
        let payload = company_graph.edge_references().next().unwrap().weight();
        assert_eq!(payload.counts.forks, 1);
    }
}
