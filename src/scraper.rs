use anyhow::Result;
use log::{info, warn};
use std::collections::HashSet;

use crate::github::{ApiRepo, GithubClient};
use crate::identity::{location_filter_clause, IdentityResolver, ProfileFields};
use crate::models::{Interaction, UserRecord};

/// Explicit per-session crawl state: counters plus the already-seen sets
/// used for restart-resume. Owned by the scraper, incremented by its
/// methods, inspectable by the caller.
#[derive(Debug, Default)]
pub struct ScrapeSession {
    pub users_attempted: usize,
    pub users_scraped: usize,
    pub companies_scraped: usize,
    pub attempted_logins: HashSet<String>,
    pub scraped_logins: HashSet<String>,
    pub scraped_companies: HashSet<String>,
}

impl ScrapeSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a session from reloaded record logs so a restarted crawl skips
    /// everything already persisted.
    pub fn resume(
        attempted_logins: HashSet<String>,
        scraped_logins: HashSet<String>,
        scraped_companies: HashSet<String>,
    ) -> Self {
        Self {
            users_attempted: attempted_logins.len(),
            users_scraped: scraped_logins.len(),
            companies_scraped: scraped_companies.len(),
            attempted_logins,
            scraped_logins,
            scraped_companies,
        }
    }

    pub fn already_attempted(&self, login: &str) -> bool {
        self.attempted_logins.contains(login)
    }

    pub fn already_scraped_company(&self, company: &str) -> bool {
        self.scraped_companies.contains(company)
    }

    fn note_attempt(&mut self, login: &str) {
        if self.attempted_logins.insert(login.to_string()) {
            self.users_attempted += 1;
        }
    }

    fn note_scraped(&mut self, login: &str) {
        if self.scraped_logins.insert(login.to_string()) {
            self.users_scraped += 1;
        }
    }

    pub fn note_company(&mut self, company: &str) {
        if self.scraped_companies.insert(company.to_string()) {
            self.companies_scraped += 1;
        }
    }
}

/// Drives the rate-limited client per user: profile, repositories, identity
/// resolution, the eight relation fetches, record assembly. Only the repo
/// ceiling and an identity rejection abort a user; any other failing
/// sub-call degrades to an empty relation.
pub struct UserScraper {
    client: GithubClient,
    resolver: IdentityResolver,
    repo_limit: u32,
    pub session: ScrapeSession,
}

impl UserScraper {
    pub const DEFAULT_REPO_LIMIT: u32 = 300;

    pub fn new(
        client: GithubClient,
        resolver: IdentityResolver,
        repo_limit: u32,
        session: ScrapeSession,
    ) -> Self {
        Self {
            client,
            resolver,
            repo_limit,
            session,
        }
    }

    /// Searches users for a company query, optionally narrowed by the fixed
    /// Danish location filter clause.
    pub async fn search_users(
        &mut self,
        company_query: &str,
        with_location_filter: bool,
    ) -> Result<Vec<String>> {
        let query = if with_location_filter {
            format!("{} {}", company_query, location_filter_clause())
        } else {
            company_query.to_string()
        };
        let users = self.client.search_users(&query).await?;
        if users.is_empty() {
            info!("No users found for query '{}'.", query);
        }
        Ok(users.into_iter().map(|user| user.login).collect())
    }

    /// Fetches, filters and assembles one user record. Returns `None` for
    /// the two methodological exclusions (repo ceiling, identity rejection)
    /// and when the profile itself cannot be fetched.
    pub async fn get_user_info(
        &mut self,
        login: &str,
        search_label: &str,
        company_filter: bool,
    ) -> Result<Option<UserRecord>> {
        self.session.note_attempt(login);

        // 1. Profile scalars.
        let user = match self.client.get_user(login).await {
            Ok(user) => user,
            Err(err) => {
                warn!("Failed to fetch profile for user '{}': {:#}", login, err);
                return Ok(None);
            }
        };

        // 2. Repository ceiling, then the repository list. The ceiling bounds
        // API cost per user and is an exclusion, not an error.
        let public_repos = user.public_repos.unwrap_or(0);
        if public_repos > self.repo_limit {
            warn!(
                "User '{}' has {} public repos (limit {}), skipping.",
                login, public_repos, self.repo_limit
            );
            return Ok(None);
        }
        let repos = match self.client.get_repos(login).await {
            Ok(repos) => repos,
            Err(err) => {
                warn!("Failed to fetch repos for user '{}': {:#}", login, err);
                Vec::new()
            }
        };
        let repo_names: Vec<String> = repos.iter().map(|repo| repo.full_name.clone()).collect();

        // 3. Identity resolution. Combined mode requires Danish evidence AND
        // a company match; location-only mode lets the company set be empty.
        let fields = ProfileFields {
            login: user.login.clone(),
            company: user.company.clone(),
            email: user.email.clone(),
            bio: user.bio.clone(),
            blog: user.blog.clone(),
            location: user.location.clone(),
        };
        let (matched_location, matched_company_strings) = if company_filter {
            match self.resolver.resolve_dk_and_company(&fields).await {
                Some((location, companies)) => (location, Some(companies)),
                None => {
                    info!("User '{}' rejected by identity resolution.", login);
                    return Ok(None);
                }
            }
        } else {
            let bio_fields = fields.bio_fields();
            let Some(location) = self
                .resolver
                .user_is_from_dk(&bio_fields, fields.location.as_deref())
                .await
            else {
                info!("User '{}' rejected: no Danish location evidence.", login);
                return Ok(None);
            };
            (location, self.resolver.search_for_company(&bio_fields))
        };
        let inferred_company = matched_company_strings
            .as_ref()
            .map(|matches| matches.keys().cloned().collect::<Vec<_>>());

        // 4. Relation fetches, each degrading to empty on failure.
        let follows_in = self.follows_in(login).await;
        let follows_out = self.follows_out(login).await;
        let watches_in = self.watches_in(&repos, login).await;
        let watches_out = self.watches_out(login).await;
        let stars_in = self.stars_in(&repos, login).await;
        let stars_out = self.stars_out(login).await;
        let forks_in = self.forks_in(&repos).await;
        let forks_out = self.forks_out(&repos, login).await;

        // 5. Assemble the immutable record.
        let record = UserRecord {
            user_login: user.login,
            search_with_company: Some(search_label.to_string()),
            listed_company: user.company,
            inferred_company,
            matched_company_strings,
            usertype: user.usertype,
            email: user.email,
            github_location: user.location,
            matched_location: Some(matched_location),
            bio: user.bio,
            blog: user.blog,
            repo_names,
            follows_in,
            follows_out,
            watches_in,
            watches_out,
            stars_in,
            stars_out,
            forks_in,
            forks_out,
        };
        self.session.note_scraped(login);
        Ok(Some(record))
    }

    async fn follows_in(&mut self, login: &str) -> Vec<Interaction> {
        match self.client.get_followers(login).await {
            Ok(followers) => followers
                .into_iter()
                .map(|follower| Interaction {
                    repo_name: None,
                    owner_login: follower.login,
                    created_at: date_only(follower.created_at.as_deref()),
                })
                .collect(),
            Err(err) => {
                warn!("Failed to get followers for user '{}': {:#}", login, err);
                Vec::new()
            }
        }
    }

    async fn follows_out(&mut self, login: &str) -> Vec<Interaction> {
        match self.client.get_following(login).await {
            Ok(following) => following
                .into_iter()
                .map(|followed| Interaction {
                    repo_name: None,
                    owner_login: followed.login,
                    created_at: date_only(followed.created_at.as_deref()),
                })
                .collect(),
            Err(err) => {
                warn!("Failed to get following for user '{}': {:#}", login, err);
                Vec::new()
            }
        }
    }

    /// Inbound watches over every repository, excluding the owner's own
    /// subscription. A failing repository drops only that repository.
    async fn watches_in(&mut self, repos: &[ApiRepo], login: &str) -> Vec<Interaction> {
        let mut watches = Vec::new();
        for repo in repos {
            match self.client.get_subscribers(&repo.full_name).await {
                Ok(watchers) => watches.extend(
                    watchers
                        .into_iter()
                        .filter(|watcher| watcher.login != login)
                        .map(|watcher| Interaction {
                            repo_name: Some(repo.name.clone()),
                            owner_login: watcher.login,
                            created_at: date_only(watcher.created_at.as_deref()),
                        }),
                ),
                Err(err) => {
                    warn!(
                        "Failed to get subscribers for repo '{}' (user '{}'): {:#}",
                        repo.full_name, login, err
                    );
                }
            }
        }
        watches
    }

    async fn watches_out(&mut self, login: &str) -> Vec<Interaction> {
        match self.client.get_subscriptions(login).await {
            Ok(repos) => repos
                .into_iter()
                .map(|repo| Interaction {
                    repo_name: Some(repo.name),
                    owner_login: repo.owner.login,
                    created_at: date_only(repo.created_at.as_deref()),
                })
                .collect(),
            Err(err) => {
                warn!("Failed to get subscriptions for user '{}': {:#}", login, err);
                Vec::new()
            }
        }
    }

    /// Inbound stars over the user's non-fork repositories, excluding the
    /// owner's own stars. A failing repository drops only that repository.
    async fn stars_in(&mut self, repos: &[ApiRepo], login: &str) -> Vec<Interaction> {
        let mut stars = Vec::new();
        for repo in repos.iter().filter(|repo| !repo.fork) {
            match self.client.get_stargazers(&repo.full_name).await {
                Ok(stargazers) => stars.extend(
                    stargazers
                        .into_iter()
                        .filter(|stargazer| stargazer.login != login)
                        .map(|stargazer| Interaction {
                            repo_name: Some(repo.name.clone()),
                            owner_login: stargazer.login,
                            created_at: date_only(stargazer.created_at.as_deref()),
                        }),
                ),
                Err(err) => {
                    warn!(
                        "Failed to get stargazers for repo '{}' (user '{}'): {:#}",
                        repo.full_name, login, err
                    );
                }
            }
        }
        stars
    }

    async fn stars_out(&mut self, login: &str) -> Vec<Interaction> {
        match self.client.get_starred(login).await {
            Ok(repos) => repos
                .into_iter()
                .map(|repo| Interaction {
                    repo_name: Some(repo.name),
                    owner_login: repo.owner.login,
                    created_at: date_only(repo.created_at.as_deref()),
                })
                .collect(),
            Err(err) => {
                warn!("Failed to get starred repos for user '{}': {:#}", login, err);
                Vec::new()
            }
        }
    }

    /// Inbound forks: every fork of the user's non-fork repositories.
    async fn forks_in(&mut self, repos: &[ApiRepo]) -> Vec<Interaction> {
        let mut forks = Vec::new();
        for repo in repos.iter().filter(|repo| !repo.fork) {
            match self.client.get_forks(&repo.full_name).await {
                Ok(fork_repos) => forks.extend(fork_repos.into_iter().map(|fork| Interaction {
                    repo_name: Some(repo.name.clone()),
                    owner_login: fork.owner.login,
                    created_at: date_only(fork.created_at.as_deref()),
                })),
                Err(err) => {
                    warn!("Failed to get forks for repo '{}': {:#}", repo.full_name, err);
                    return Vec::new();
                }
            }
        }
        forks
    }

    /// Outbound forks: the upstream owner of every fork repository. The list
    /// payload carries no parent, so each fork needs a detail fetch.
    async fn forks_out(&mut self, repos: &[ApiRepo], login: &str) -> Vec<Interaction> {
        let mut forks = Vec::new();
        for repo in repos.iter().filter(|repo| repo.fork) {
            match self.client.get_repo(&repo.full_name).await {
                Ok(detail) => {
                    if let Some(parent) = detail.parent {
                        forks.push(Interaction {
                            repo_name: Some(repo.name.clone()),
                            owner_login: parent.owner.login,
                            created_at: date_only(repo.created_at.as_deref()),
                        });
                    }
                }
                Err(err) => {
                    warn!(
                        "Failed to fetch fork parent for repo '{}' (user '{}'): {:#}",
                        repo.full_name, login, err
                    );
                    return Vec::new();
                }
            }
        }
        forks
    }
}

/// Timestamps arrive as RFC 3339; the relation lists keep the date part
/// only, as the analysis works at day granularity.
fn date_only(timestamp: Option<&str>) -> Option<String> {
    timestamp.map(|t| t.split('T').next().unwrap_or(t).to_string())
}
