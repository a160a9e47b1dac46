use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Select};
use log::info;
use std::collections::BTreeMap;

use crate::models::UserRecord;
use crate::store::RecordStore;

/// What a resolution strategy decided for one ambiguous record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Skipped,
    /// The operator interrupted the loop; stop cleanly, keeping everything
    /// resolved so far.
    Interrupted,
}

/// Strategy for collapsing an ambiguous inferred-company set to one key.
/// The core only depends on this seam; a CLI prompt, a batch file or a test
/// stub can satisfy it.
pub trait CompanyResolver {
    fn resolve(&mut self, record: &UserRecord) -> Result<Resolution>;
}

/// Non-interactive strategy: leave every ambiguous record untouched.
pub struct SkipAll;

impl CompanyResolver for SkipAll {
    fn resolve(&mut self, _record: &UserRecord) -> Result<Resolution> {
        Ok(Resolution::Skipped)
    }
}

/// Interactive strategy: show the match evidence and bio context, then let
/// the operator pick one of the candidates or skip.
pub struct PromptResolver {
    theme: ColorfulTheme,
}

impl PromptResolver {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for PromptResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CompanyResolver for PromptResolver {
    fn resolve(&mut self, record: &UserRecord) -> Result<Resolution> {
        let candidates = record.inferred_company.clone().unwrap_or_default();

        println!("\n[{}] has multiple company matches:", record.user_login);
        if let Some(matches) = &record.matched_company_strings {
            for (company, matched) in matches {
                println!("  {}: {:?}", company, matched);
            }
        }
        println!("Bio information:");
        println!("  listed_company: {}", record.listed_company.as_deref().unwrap_or(""));
        println!("  email: {}", record.email.as_deref().unwrap_or(""));
        println!("  bio: {}", record.bio.as_deref().unwrap_or(""));
        println!("  blog: {}", record.blog.as_deref().unwrap_or(""));

        let mut items = candidates.clone();
        items.push("(skip)".to_string());

        match Select::with_theme(&self.theme)
            .with_prompt("Choose the correct company for this user")
            .default(0)
            .items(&items)
            .interact_opt()
        {
            Ok(Some(index)) if index < candidates.len() => {
                Ok(Resolution::Resolved(candidates[index].clone()))
            }
            Ok(Some(_)) | Ok(None) => Ok(Resolution::Skipped),
            Err(dialoguer::Error::IO(err))
                if err.kind() == std::io::ErrorKind::Interrupted =>
            {
                Ok(Resolution::Interrupted)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Tally of one resolution pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResolutionOutcome {
    pub from_log: usize,
    pub newly_resolved: usize,
    pub skipped: usize,
    pub interrupted: bool,
}

/// Collapses ambiguous inferred-company sets across all records: previously
/// logged decisions apply first (so reruns never re-prompt), single-element
/// sets already stand, and the strategy handles the rest. Every new decision
/// is appended to the resolution log before the next record is considered,
/// so an interrupt loses nothing.
pub fn resolve_ambiguous(
    records: &mut BTreeMap<String, UserRecord>,
    store: &RecordStore,
    resolver: &mut dyn CompanyResolver,
) -> Result<ResolutionOutcome> {
    let resolved_users = store.load_resolutions()?;
    let mut outcome = ResolutionOutcome::default();

    for record in records.values_mut() {
        let candidate_count = match record.inferred_company.as_deref() {
            Some(candidates) if candidates.len() > 1 => candidates.len(),
            _ => continue,
        };

        if let Some(resolved) = resolved_users.get(&record.user_login) {
            record.inferred_company = Some(vec![resolved.clone()]);
            outcome.from_log += 1;
            continue;
        }

        info!(
            "User '{}' has {} company candidates; asking the resolver.",
            record.user_login, candidate_count
        );
        match resolver.resolve(record)? {
            Resolution::Resolved(company) => {
                store.append_resolution(&record.user_login, &company)?;
                record.inferred_company = Some(vec![company]);
                outcome.newly_resolved += 1;
            }
            Resolution::Skipped => {
                outcome.skipped += 1;
            }
            Resolution::Interrupted => {
                info!("Resolution loop interrupted; keeping decisions made so far.");
                outcome.interrupted = true;
                break;
            }
        }
    }

    info!(
        "Resolution pass done: {} from log, {} newly resolved, {} skipped.",
        outcome.from_log, outcome.newly_resolved, outcome.skipped
    );
    Ok(outcome)
}
