use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of a relation list: the counterpart login, the repository the
/// interaction happened through (absent for follow relations), and the
/// timestamp the API reported for it, when the list payload carried one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub repo_name: Option<String>,
    pub owner_login: String,
    pub created_at: Option<String>,
}

/// The four interaction kinds the study observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Follows,
    Stars,
    Watches,
    Forks,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Follows, Action::Stars, Action::Watches, Action::Forks];

    /// Low-effort signals of interest.
    pub const ATTENTION: [Action; 3] = [Action::Follows, Action::Stars, Action::Watches];

    /// Higher-effort reuse signals.
    pub const COLLABORATION: [Action; 1] = [Action::Forks];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Follows => "follows",
            Action::Stars => "stars",
            Action::Watches => "watches",
            Action::Forks => "forks",
        }
    }
}

/// Direction of a relation list relative to the record's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// One scraped GitHub profile together with its inferred identity and the
/// eight relation lists. Created once per accepted user by the scraper and
/// immutable afterwards, except for the one-time collapse of an ambiguous
/// `inferred_company` set to a single key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_login: String,
    pub search_with_company: Option<String>,
    pub listed_company: Option<String>,
    pub inferred_company: Option<Vec<String>>,
    pub matched_company_strings: Option<BTreeMap<String, Vec<String>>>,
    pub usertype: Option<String>,
    pub email: Option<String>,
    pub github_location: Option<String>,
    pub matched_location: Option<Vec<String>>,
    pub bio: Option<String>,
    pub blog: Option<String>,
    pub repo_names: Vec<String>,
    pub follows_in: Vec<Interaction>,
    pub follows_out: Vec<Interaction>,
    pub watches_in: Vec<Interaction>,
    pub watches_out: Vec<Interaction>,
    pub stars_in: Vec<Interaction>,
    pub stars_out: Vec<Interaction>,
    pub forks_in: Vec<Interaction>,
    pub forks_out: Vec<Interaction>,
}

impl UserRecord {
    /// The eight relation lists tagged with their action kind and direction,
    /// in a fixed order so edge expansion is deterministic.
    pub fn relations(&self) -> [(Action, Direction, &[Interaction]); 8] {
        [
            (Action::Follows, Direction::In, self.follows_in.as_slice()),
            (Action::Follows, Direction::Out, self.follows_out.as_slice()),
            (Action::Stars, Direction::In, self.stars_in.as_slice()),
            (Action::Stars, Direction::Out, self.stars_out.as_slice()),
            (Action::Watches, Direction::In, self.watches_in.as_slice()),
            (Action::Watches, Direction::Out, self.watches_out.as_slice()),
            (Action::Forks, Direction::In, self.forks_in.as_slice()),
            (Action::Forks, Direction::Out, self.forks_out.as_slice()),
        ]
    }

    /// The single resolved company, once the inferred set has been collapsed
    /// to exactly one key. Ambiguous or empty sets resolve to `None`.
    pub fn resolved_company(&self) -> Option<&str> {
        match self.inferred_company.as_deref() {
            Some([company]) => Some(company.as_str()),
            _ => None,
        }
    }
}

/// One directed interaction instance between two company-resolved users.
/// Derived from `UserRecord`s for the duration of an analysis session,
/// never persisted independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub src: String,
    pub target: String,
    pub src_company: String,
    pub target_company: String,
    pub src_company_category: Option<i64>,
    pub src_company_label: String,
    pub target_company_category: Option<i64>,
    pub target_company_label: String,
    pub d_intra_level: u8,
    pub d_inter_level: u8,
    pub edge_repo: Option<String>,
    pub action: Action,
    pub created_at: Option<String>,
}
