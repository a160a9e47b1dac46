use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::models::UserRecord;

pub const USERS_FILE: &str = "users.jsonl";
pub const COMPANIES_FILE: &str = "companies.jsonl";
pub const ATTEMPTS_FILE: &str = "attempts.jsonl";
pub const RESOLUTIONS_FILE: &str = "resolutions.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct CompanyLine {
    company_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AttemptLine {
    user_login: String,
}

/// One manual resolution decision, appended per resolved ambiguous user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionLine {
    pub user_login: String,
    pub resolved_company: String,
}

/// Append-only record logs, one JSONL file per output stream. Consumers
/// reload a stream by reading the whole file into a map keyed on the
/// record's identity field, so restart-resume is idempotent.
pub struct RecordStore {
    output_dir: PathBuf,
}

impl RecordStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)
            .context(format!("Failed to create output directory {:?}", output_dir))?;
        Ok(Self { output_dir })
    }

    pub fn path(&self, filename: &str) -> PathBuf {
        self.output_dir.join(filename)
    }

    fn append_line<T: Serialize>(&self, filename: &str, value: &T) -> Result<()> {
        let path = self.path(filename);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("Failed to open {:?} for appending", path))?;
        let line = serde_json::to_string(value).context("Failed to serialize record")?;
        writeln!(file, "{}", line).context(format!("Failed to append to {:?}", path))?;
        Ok(())
    }

    fn read_lines<T, F>(&self, filename: &str, mut accept: F) -> Result<()>
    where
        T: for<'de> Deserialize<'de>,
        F: FnMut(T),
    {
        let path = self.path(filename);
        if !path.exists() {
            return Ok(());
        }
        let file = File::open(&path).context(format!("Failed to open {:?}", path))?;
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context(format!("Failed to read a line from {:?}", path))?;
            if line.trim().is_empty() {
                continue;
            }
            let value: T = serde_json::from_str(&line)
                .context(format!("Malformed record at {:?}:{}", path, lineno + 1))?;
            accept(value);
        }
        Ok(())
    }

    pub fn append_user(&self, record: &UserRecord) -> Result<()> {
        self.append_line(USERS_FILE, record)
    }

    /// Reloads the user stream keyed on login. A login appended twice keeps
    /// the last record, matching append-then-reload resume semantics.
    pub fn load_users(&self) -> Result<BTreeMap<String, UserRecord>> {
        let mut users = BTreeMap::new();
        self.read_lines(USERS_FILE, |record: UserRecord| {
            users.insert(record.user_login.clone(), record);
        })?;
        info!("Loaded {} user records from {:?}.", users.len(), self.path(USERS_FILE));
        Ok(users)
    }

    pub fn log_company(&self, company: &str) -> Result<()> {
        self.append_line(
            COMPANIES_FILE,
            &CompanyLine {
                company_name: company.to_string(),
            },
        )
    }

    pub fn load_companies(&self) -> Result<HashSet<String>> {
        let mut companies = HashSet::new();
        self.read_lines(COMPANIES_FILE, |line: CompanyLine| {
            companies.insert(line.company_name);
        })?;
        Ok(companies)
    }

    pub fn log_attempt(&self, user_login: &str) -> Result<()> {
        self.append_line(
            ATTEMPTS_FILE,
            &AttemptLine {
                user_login: user_login.to_string(),
            },
        )
    }

    pub fn load_attempts(&self) -> Result<HashSet<String>> {
        let mut attempts = HashSet::new();
        self.read_lines(ATTEMPTS_FILE, |line: AttemptLine| {
            attempts.insert(line.user_login);
        })?;
        Ok(attempts)
    }

    pub fn append_resolution(&self, user_login: &str, resolved_company: &str) -> Result<()> {
        self.append_line(
            RESOLUTIONS_FILE,
            &ResolutionLine {
                user_login: user_login.to_string(),
                resolved_company: resolved_company.to_string(),
            },
        )
    }

    /// Reloads resolution decisions keyed on login; used to skip
    /// already-resolved ambiguous users on rerun.
    pub fn load_resolutions(&self) -> Result<BTreeMap<String, String>> {
        let mut resolutions = BTreeMap::new();
        self.read_lines(RESOLUTIONS_FILE, |line: ResolutionLine| {
            resolutions.insert(line.user_login, line.resolved_company);
        })?;
        Ok(resolutions)
    }
}
