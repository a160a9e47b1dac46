use anyhow::{Context, Result};
use chrono::{Local, TimeZone, Utc};
use log::{debug, info, warn};
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("gh-devnet/", env!("CARGO_PKG_VERSION"));
const PER_PAGE: usize = 100;

/// The user-search endpoint only serves the first thousand results.
const SEARCH_RESULT_WINDOW: usize = 1000;

/// Live rate-limit state advertised by the API: remaining requests, the
/// ceiling for the current credential, and the epoch second the window
/// resets at.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimit {
    pub remaining: u32,
    pub limit: u32,
    pub reset: i64,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    rate: RateLimit,
}

/// A user as the API serves it. List endpoints return a reduced object, so
/// everything beyond the login is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub login: String,
    #[serde(rename = "type")]
    pub usertype: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub blog: Option<String>,
    pub public_repos: Option<u32>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoOwner {
    pub login: String,
}

/// A repository as the API serves it. `parent` is only populated on the
/// single-repository endpoint, never in list payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRepo {
    pub name: String,
    pub full_name: String,
    pub fork: bool,
    pub created_at: Option<String>,
    pub owner: RepoOwner,
    pub parent: Option<Box<ApiRepo>>,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    total_count: usize,
    items: Vec<ApiUser>,
}

/// Maps the advertised rate ceiling to the operating threshold the gate
/// keeps in reserve: the unauthenticated tier gets a small margin, the
/// standard authenticated tier a larger one, anything else a conservative
/// default.
pub fn threshold_for_ceiling(ceiling: u32) -> u32 {
    match ceiling {
        30 => 5,
        5000 => 300,
        _ => 200,
    }
}

/// What the gate decided for the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    Proceed,
    /// Switch to the next credential and re-inspect, without sleeping.
    Rotate,
    /// Block until this epoch second (reset time plus safety buffer).
    Sleep { until: i64 },
}

/// Request-budget gate. Tracks the operating threshold and how many
/// credentials of the pool are still unused in the current rotation cycle;
/// the cycle restarts once every credential has been burned and a sleep was
/// taken.
#[derive(Debug)]
pub struct RateGate {
    threshold: u32,
    buffer_secs: i64,
    credential_count: usize,
    unused_credentials: usize,
}

impl RateGate {
    pub const DEFAULT_BUFFER_SECS: i64 = 90;

    pub fn new(credential_count: usize, buffer_secs: i64) -> Self {
        Self {
            threshold: 0,
            buffer_secs,
            credential_count,
            unused_credentials: credential_count.saturating_sub(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Inspects the current rate-limit snapshot and decides whether the next
    /// call may proceed, the pool should rotate, or the session must sleep.
    /// Logs threshold changes and never errors.
    pub fn decide(&mut self, rate: &RateLimit) -> GateAction {
        let threshold = threshold_for_ceiling(rate.limit);
        if threshold != self.threshold {
            self.threshold = threshold;
            info!(
                "Rate-limit threshold set to {} (advertised ceiling: {}).",
                threshold, rate.limit
            );
        }

        if rate.remaining >= self.threshold {
            return GateAction::Proceed;
        }

        if self.unused_credentials > 0 {
            self.unused_credentials -= 1;
            return GateAction::Rotate;
        }

        // Every credential is exhausted for this cycle; sleep past the reset
        // and start a fresh cycle.
        self.unused_credentials = self.credential_count.saturating_sub(1);
        GateAction::Sleep {
            until: rate.reset + self.buffer_secs,
        }
    }
}

/// GitHub REST client wrapping every outbound call behind the rate gate and
/// a round-robin credential pool. Single-threaded sequential use; callers
/// sharing one client across tasks is not supported.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    tokens: Vec<String>,
    token_idx: usize,
    gate: RateGate,
    rate: Option<RateLimit>,
}

impl GithubClient {
    pub fn new(http: reqwest::Client, tokens: Vec<String>, buffer_secs: i64) -> Result<Self> {
        if tokens.is_empty() {
            anyhow::bail!("At least one GitHub access token is required.");
        }
        let gate = RateGate::new(tokens.len(), buffer_secs);
        Ok(Self {
            http,
            api_base: API_BASE.to_string(),
            tokens,
            token_idx: 0,
            gate,
            rate: None,
        })
    }

    /// Fetches the live rate-limit snapshot for the current credential. The
    /// probe endpoint itself does not consume quota, so it bypasses the gate.
    pub async fn rate_limit(&self) -> Result<RateLimit> {
        let url = format!("{}/rate_limit", self.api_base);
        let response: RateLimitResponse = self
            .request(&url, &[])
            .send()
            .await
            .context("Failed to fetch the rate-limit snapshot")?
            .error_for_status()
            .context("Rate-limit probe returned an error status")?
            .json()
            .await
            .context("Failed to decode the rate-limit snapshot")?;
        Ok(response.rate)
    }

    fn request(&self, url: &str, query: &[(&str, String)]) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .query(query)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "application/vnd.github+json")
            .bearer_auth(&self.tokens[self.token_idx])
    }

    fn refresh_snapshot_from_headers(&mut self, response: &reqwest::Response) {
        let header_u32 = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u32>().ok())
        };
        let header_i64 = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
        };
        if let (Some(remaining), Some(limit), Some(reset)) = (
            header_u32("x-ratelimit-remaining"),
            header_u32("x-ratelimit-limit"),
            header_i64("x-ratelimit-reset"),
        ) {
            self.rate = Some(RateLimit { remaining, limit, reset });
        }
    }

    async fn refresh_snapshot(&mut self) {
        match self.rate_limit().await {
            Ok(rate) => self.rate = Some(rate),
            Err(err) => {
                // The gate observes but never raises; a failed probe leaves
                // the previous snapshot in place.
                warn!("Failed to refresh the rate-limit snapshot: {:#}", err);
            }
        }
    }

    /// The gate: rotates or sleeps until the current credential has budget,
    /// then returns. Errors on the probe are logged and waved through; the
    /// wrapped call's own errors propagate from `checked_get`.
    async fn gate_check(&mut self) {
        if self.rate.is_none() {
            self.refresh_snapshot().await;
        }
        loop {
            let Some(rate) = self.rate else {
                return;
            };
            match self.gate.decide(&rate) {
                GateAction::Proceed => return,
                GateAction::Rotate => {
                    self.token_idx = (self.token_idx + 1) % self.tokens.len();
                    info!(
                        "Remaining requests ({}) under threshold; rotated to credential {}/{}.",
                        rate.remaining,
                        self.token_idx + 1,
                        self.tokens.len()
                    );
                    self.refresh_snapshot().await;
                }
                GateAction::Sleep { until } => {
                    let wait = until - Utc::now().timestamp();
                    if wait > 0 {
                        let wake_up = Local
                            .timestamp_opt(until, 0)
                            .single()
                            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_else(|| until.to_string());
                        info!(
                            "Remaining requests ({}) under threshold with no credentials left; sleeping {}s until {}.",
                            rate.remaining, wait, wake_up
                        );
                        tokio::time::sleep(Duration::from_secs(wait as u64)).await;
                        info!("Woke up from rate-limit sleep.");
                    } else {
                        info!("Reset time passed {}s ago, skipping sleep.", -wait);
                    }
                    self.refresh_snapshot().await;
                    return;
                }
            }
        }
    }

    /// The uniform checked call: gate first, then the request with the
    /// current credential. Call errors propagate unchanged.
    async fn checked_get(&mut self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        self.gate_check().await;
        let url = format!("{}{}", self.api_base, path);
        debug!("GET {} {:?}", url, query);
        let response = self
            .request(&url, query)
            .send()
            .await
            .context(format!("GitHub API call to {} failed", path))?;
        self.refresh_snapshot_from_headers(&response);
        response
            .error_for_status()
            .context(format!("GitHub API call to {} returned an error status", path))
    }

    /// Follows `per_page`/`page` pagination until a short page.
    async fn get_paged<T: DeserializeOwned>(
        &mut self,
        path: &str,
        extra: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut items: Vec<T> = Vec::new();
        let mut page = 1u32;
        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            query.extend(extra.iter().map(|(k, v)| (*k, v.clone())));

            let batch: Vec<T> = self
                .checked_get(path, &query)
                .await?
                .json()
                .await
                .context(format!("Failed to decode page {} of {}", page, path))?;
            let batch_len = batch.len();
            items.extend(batch);
            if batch_len < PER_PAGE {
                return Ok(items);
            }
            page += 1;
        }
    }

    /// User search. The caller appends the location filter clause when
    /// location filtering is on; results beyond the API's search window are
    /// silently unavailable.
    pub async fn search_users(&mut self, query: &str) -> Result<Vec<ApiUser>> {
        let mut items: Vec<ApiUser> = Vec::new();
        let mut page = 1u32;
        loop {
            let search_query = vec![
                ("q", query.to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let search_page: SearchPage = self
                .checked_get("/search/users", &search_query)
                .await?
                .json()
                .await
                .context(format!("Failed to decode user-search page {}", page))?;

            let batch_len = search_page.items.len();
            items.extend(search_page.items);
            let exhausted = batch_len < PER_PAGE
                || items.len() >= search_page.total_count
                || items.len() >= SEARCH_RESULT_WINDOW;
            if exhausted {
                return Ok(items);
            }
            page += 1;
        }
    }

    pub async fn get_user(&mut self, login: &str) -> Result<ApiUser> {
        self.checked_get(&format!("/users/{}", login), &[])
            .await?
            .json()
            .await
            .context(format!("Failed to decode user profile for '{}'", login))
    }

    pub async fn get_followers(&mut self, login: &str) -> Result<Vec<ApiUser>> {
        self.get_paged(&format!("/users/{}/followers", login), &[]).await
    }

    pub async fn get_following(&mut self, login: &str) -> Result<Vec<ApiUser>> {
        self.get_paged(&format!("/users/{}/following", login), &[]).await
    }

    pub async fn get_repos(&mut self, login: &str) -> Result<Vec<ApiRepo>> {
        self.get_paged(&format!("/users/{}/repos", login), &[("type", "all".to_string())])
            .await
    }

    /// Single-repository fetch; the only endpoint that populates `parent`.
    pub async fn get_repo(&mut self, full_name: &str) -> Result<ApiRepo> {
        self.checked_get(&format!("/repos/{}", full_name), &[])
            .await?
            .json()
            .await
            .context(format!("Failed to decode repository '{}'", full_name))
    }

    pub async fn get_forks(&mut self, full_name: &str) -> Result<Vec<ApiRepo>> {
        self.get_paged(&format!("/repos/{}/forks", full_name), &[]).await
    }

    pub async fn get_stargazers(&mut self, full_name: &str) -> Result<Vec<ApiUser>> {
        self.get_paged(&format!("/repos/{}/stargazers", full_name), &[]).await
    }

    pub async fn get_subscribers(&mut self, full_name: &str) -> Result<Vec<ApiUser>> {
        self.get_paged(&format!("/repos/{}/subscribers", full_name), &[]).await
    }

    pub async fn get_starred(&mut self, login: &str) -> Result<Vec<ApiRepo>> {
        self.get_paged(&format!("/users/{}/starred", login), &[]).await
    }

    pub async fn get_subscriptions(&mut self, login: &str) -> Result<Vec<ApiRepo>> {
        self.get_paged(&format!("/users/{}/subscriptions", login), &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(remaining: u32, limit: u32, reset: i64) -> RateLimit {
        RateLimit { remaining, limit, reset }
    }

    #[test]
    fn ceiling_maps_to_operating_threshold() {
        assert_eq!(threshold_for_ceiling(30), 5);
        assert_eq!(threshold_for_ceiling(5000), 300);
        assert_eq!(threshold_for_ceiling(12500), 200);
        assert_eq!(threshold_for_ceiling(0), 200);
    }

    #[test]
    fn gate_proceeds_with_budget_left() {
        let mut gate = RateGate::new(1, 90);
        assert_eq!(gate.decide(&rate(300, 5000, 1_000)), GateAction::Proceed);
        assert_eq!(gate.threshold(), 300);
    }

    #[test]
    fn single_credential_sleeps_until_reset_plus_buffer() {
        let mut gate = RateGate::new(1, 90);
        let action = gate.decide(&rate(299, 5000, 7_000));
        assert_eq!(action, GateAction::Sleep { until: 7_090 });
    }

    #[test]
    fn unused_credentials_rotate_without_sleeping() {
        let mut gate = RateGate::new(3, 90);
        // Two rotations are available before the pool is exhausted.
        assert_eq!(gate.decide(&rate(299, 5000, 7_000)), GateAction::Rotate);
        assert_eq!(gate.decide(&rate(299, 5000, 7_000)), GateAction::Rotate);
        assert_eq!(
            gate.decide(&rate(299, 5000, 7_000)),
            GateAction::Sleep { until: 7_090 }
        );
        // The sleep restarts the rotation cycle.
        assert_eq!(gate.decide(&rate(2, 5000, 9_000)), GateAction::Rotate);
    }

    #[test]
    fn threshold_follows_the_advertised_ceiling() {
        let mut gate = RateGate::new(1, 60);
        assert_eq!(gate.decide(&rate(10, 5000, 500)), GateAction::Sleep { until: 560 });
        // Dropping to the unauthenticated tier lowers the threshold, so the
        // same remaining budget now passes.
        assert_eq!(gate.decide(&rate(10, 30, 500)), GateAction::Proceed);
        assert_eq!(gate.threshold(), 5);
    }
}
