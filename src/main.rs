use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

use gh_devnet::companies::COMPANY_PATTERNS;
use gh_devnet::env_loader;
use gh_devnet::github::{GithubClient, RateGate};
use gh_devnet::identity::{GeoNamesClient, IdentityResolver};
use gh_devnet::scraper::{ScrapeSession, UserScraper};
use gh_devnet::store::RecordStore;

struct ScrapeConfig {
    output_dir: String,
    repo_limit: u32,
    rate_buffer_secs: i64,
    with_location_filter: bool,
    company_filter: bool,
}

/// Builds the crawl configuration from environment variables, with the
/// study's defaults.
fn build_scrape_config() -> ScrapeConfig {
    let output_dir = std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "output".to_string());
    let repo_limit = std::env::var("REPO_LIMIT")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(UserScraper::DEFAULT_REPO_LIMIT);
    let rate_buffer_secs = std::env::var("RATE_BUFFER_SECS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(RateGate::DEFAULT_BUFFER_SECS);
    let with_location_filter = std::env::var("NO_LOCATION_FILTER").is_err();
    let company_filter = std::env::var("LOCATION_ONLY").is_err();

    info!(
        "Scrape config: output_dir={}, repo_limit={}, rate_buffer_secs={}, location_filter={}, company_filter={}",
        output_dir, repo_limit, rate_buffer_secs, with_location_filter, company_filter
    );
    ScrapeConfig {
        output_dir,
        repo_limit,
        rate_buffer_secs,
        with_location_filter,
        company_filter,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_loader::load_env();
    env_logger::init();

    info!("Starting the GitHub developer-network crawl.");

    // Missing credentials stop the run before any scraping begins.
    let tokens = env_loader::collect_github_tokens()?;
    let config = build_scrape_config();

    let store = RecordStore::new(&config.output_dir)?;
    let session = ScrapeSession::resume(
        store.load_attempts()?,
        store.load_users()?.into_keys().collect(),
        store.load_companies()?,
    );
    info!(
        "Session resumed with {} users attempted, {} scraped, {} companies done.",
        session.users_attempted, session.users_scraped, session.companies_scraped
    );

    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build the HTTP client")?;
    let client = GithubClient::new(http.clone(), tokens, config.rate_buffer_secs)?;
    let rate = client.rate_limit().await?;
    info!(
        "Rate limit at start: {}/{} remaining, resets at epoch {}.",
        rate.remaining, rate.limit, rate.reset
    );

    let resolver = IdentityResolver::new(Box::new(GeoNamesClient::new(http)))?;
    let mut scraper = UserScraper::new(client, resolver, config.repo_limit, session);

    let companies: Vec<&str> = COMPANY_PATTERNS
        .iter()
        .map(|(company, _)| *company)
        .filter(|company| !scraper.session.already_scraped_company(company))
        .collect();
    info!("{} companies left to crawl.", companies.len());

    let progress = ProgressBar::new(companies.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .context("Invalid progress bar template")?,
    );

    for company in companies {
        progress.set_message(company.to_string());
        if let Err(err) = crawl_company(&mut scraper, &store, company, &config).await {
            warn!("Crawl for company '{}' failed: {:#}", company, err);
        }
        progress.inc(1);
    }
    progress.finish_with_message("done");

    info!(
        "Crawl finished: {} users attempted, {} users scraped, {} companies scraped.",
        scraper.session.users_attempted,
        scraper.session.users_scraped,
        scraper.session.companies_scraped
    );
    Ok(())
}

/// Searches one company query and scrapes every surfaced user that has not
/// been attempted yet. The company is logged as done once all its users
/// have been processed.
async fn crawl_company(
    scraper: &mut UserScraper,
    store: &RecordStore,
    company: &str,
    config: &ScrapeConfig,
) -> Result<()> {
    let logins = scraper
        .search_users(company, config.with_location_filter)
        .await
        .context(format!("User search failed for company '{}'", company))?;
    info!("Company '{}': {} users surfaced by search.", company, logins.len());

    for login in logins {
        if scraper.session.already_attempted(&login) {
            continue;
        }
        store.log_attempt(&login)?;
        match scraper
            .get_user_info(&login, company, config.company_filter)
            .await?
        {
            Some(record) => {
                store.append_user(&record)?;
                info!(
                    "Scraped user '{}' (inferred companies: {:?}).",
                    record.user_login, record.inferred_company
                );
            }
            None => {
                info!("User '{}' excluded.", login);
            }
        }
    }

    store.log_company(company)?;
    scraper.session.note_company(company);
    Ok(())
}
