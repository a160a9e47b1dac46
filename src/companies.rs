use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Company regex dictionary: canonical company key plus the pattern that
/// identifies it in free-text profile fields. Patterns are compiled
/// case-insensitively by the identity resolver. Most companies allow a
/// suffixed variation ("trifork-labs", "trifork_xyz"); short or generic
/// names carry strict word boundaries to avoid false positives.
pub const COMPANY_PATTERNS: &[(&str, &str)] = &[
    ("nodes", r"\b(nodes(?:[-_ ]\w+)?)\b"),
    ("abtion", r"(abtion(?:[-_ ]\w+)?)"),
    ("heyday", r"(heyday(?:[-_ ]\w+)?)"),
    ("trifork", r"(trifork(?:[-_ ]\w+)?)"),
    ("frontit", r"(frontit(?:[-_ ]\w+)?)"),
    ("holion", r"(holion(?:[-_ ]\w+)?)"),
    ("kruso", r"(kruso(?:[-_ ]\w+)?)"),
    ("pandiweb", r"(pandi(?:[-_ ]?web))"),
    ("uptime", r"(uptime(?:[-_ ]\w+)?)"),
    ("charlie tango", r"(charlie[-_ ]?tango)"),
    ("ffw", r"(ffw(?:[-_ ]\w+)?)"),
    ("mysupport", r"(mysupport(?:[-_ ]\w+)?)"),
    ("shape", r"(shape(?:[-_ ]\w+)?)"),
    ("makeable", r"(makeable(?:[-_ ]\w+)?)"),
    ("mustache", r"(mustache(?:[-_ ]\w+)?)"),
    ("house of code", r"(house[-_ ]?of[-_ ]?code)"),
    ("greener pastures", r"(greener[-_ ]?pastures)"),
    ("axla", r"(axla)"),
    ("snapp", r"(snapp(?:[-_ ]\w+)?)"),
    ("appscaptain", r"(appscaptain(?:[-_ ]\w+)?)"),
    ("adtomic", r"(adtomic(?:[-_ ]\w+)?)"),
    ("signifly", r"(signifly(?:[-_ ]\w+)?)"),
    ("creuna", r"(creuna(?:[-_ ]\w+)?)"),
    ("strømlin", r"(strømlin|stromlin)"),
    ("knowit", r"(know[-_ ]?it)"),
    ("must", r"\b(mu[-_ ]?st)\b"),
    ("netcompany", r"(netcompany(?:[-_ ]\w+)?)"),
    ("systematic", r"(systematic(?:[-_ ]\w+)?)"),
    ("capgemini", r"(capgemini(?:[-_ ]\w+)?)"),
    ("sas institute", r"(sas[-_ ]?institute)"),
    ("fellowmind", r"(fellow[-_ ]?mind)"),
    ("eg a s", r"\b(eg[-_ ]?a[-_ ]?s|egdw|eg\.dk)\b"),
    ("kmd", r"(kmd(?:[-_ ]\w+)?)"),
    ("adform", r"(adform)"),
    ("oxygen", r"\b(oxygen)\b"),
    ("saxo bank", r"(saxo[-_ ]?bank)"),
    ("kabellmunk", r"(kabellmunk)"),
    ("dgi-it", r"(dgi[-_ ]?it)"),
    // "ørsted" also needs the namesake-prefix veto below so the H.C. Ørsted
    // institute does not count as the energy company.
    ("ørsted", r"\b(ørsted|orsted)\b"),
    ("nuuday", r"(nuuday(?:[-_ ]\w+)?)"),
    ("yousee", r"(yousee)"),
    ("relatel", r"(relatel(?:[-_ ]\w+)?)"),
    ("cphapp", r"(cphapp(?:[-_ ]\w+)?)"),
    ("commentor", r"(commentor(?:[-_ ]\w+)?)"),
    ("nabto", r"(nabto(?:[-_ ]\w+)?)"),
    ("jobindex", r"(jobindex(?:[-_ ]\w+)?)"),
    ("miracle", r"(miracle(?:[-_ ]\w+)?)"),
    ("immeo", r"(immeo(?:[-_ ]\w+)?)"),
    ("siteimprove", r"(siteimprove(?:[-_ ]\w+)?)"),
    ("cbrain", r"(cbrain(?:[-_ ]\w+)?)"),
    ("deondigital", r"(deon[-_ ]?digital)"),
    ("pwc", r"(pwc)"),
    ("studiesandme", r"(studiesandme(?:[-_ ]\w+)?)"),
    ("tv2", r"(tv2)"),
    ("pentia", r"(pentia(?:[-_ ]\w+)?)"),
    ("zervme", r"(zervme(?:[-_ ]\w+)?)"),
    ("skat", r"\b(skat)\b"),
    ("codefort", r"(codefort(?:[-_ ]\w+)?)"),
    ("reepay", r"(reepay(?:[-_ ]\w+)?)"),
    ("diviso", r"(diviso(?:[-_ ]\w+)?)"),
    ("uni-soft", r"(uni[-_ ]?soft)"),
    ("delegateas", r"(delegateas(?:[-_ ]\w+)?)"),
    ("proactivedk", r"(proactivedk(?:[-_ ]\w+)?)"),
    ("monstarlab", r"(monstarlab(?:[-_ ]\w+)?)"),
];

/// Text immediately before a pattern match that disqualifies the occurrence:
/// famous namesakes that are not the company. Checked per match occurrence,
/// so a field mentioning both the namesake and the company still matches.
pub const NAMESAKE_PREFIXES: &[(&str, &[&str])] =
    &[("ørsted", &["hc", "h.c.", "h.c. ", "h c ", "h-c-", "h. c. "])];

/// Analyst-assigned ordinal company categories used for coloring and the
/// appendix tables. Companies outside the side table are labeled "NA".
pub const CATEGORY_LABELS: &[(i64, &str)] = &[
    (1, "1 Digital and marketing consultancies"),
    (2, "2 Bespoke app companies"),
    (3, "3 Data-broker- and infrastructure companies"),
    (4, "4 Companies with specific digital part/app as part of service/product"),
];

pub const NA_LABEL: &str = "NA";

/// Readable label for a category ordinal; anything unmapped is "NA".
pub fn category_label(category: Option<i64>) -> String {
    category
        .and_then(|c| {
            CATEGORY_LABELS
                .iter()
                .find(|(ordinal, _)| *ordinal == c)
                .map(|(_, label)| (*label).to_string())
        })
        .unwrap_or_else(|| NA_LABEL.to_string())
}

#[derive(Debug, Deserialize)]
struct CategoryLine {
    company: String,
    category: i64,
}

/// Loads the company → category side table from a JSONL file, one
/// `{"company": ..., "category": 1..=4}` object per line. Companies missing
/// from the table default to category "NA" downstream, so an absent file is
/// not an error.
pub fn load_company_categories(path: &Path) -> Result<HashMap<String, i64>> {
    let mut categories = HashMap::new();
    if !path.exists() {
        warn!(
            "Company category table {:?} not found; all companies will be categorized as NA.",
            path
        );
        return Ok(categories);
    }

    let file = File::open(path).context(format!("Failed to open category table {:?}", path))?;
    let reader = BufReader::new(file);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read line from category table")?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: CategoryLine = serde_json::from_str(&line).context(format!(
            "Malformed category entry at {:?}:{}",
            path,
            lineno + 1
        ))?;
        categories.insert(entry.company, entry.category);
    }

    info!("Loaded {} company category entries from {:?}.", categories.len(), path);
    Ok(categories)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_label_maps_known_ordinals() {
        assert_eq!(category_label(Some(2)), "2 Bespoke app companies");
        assert_eq!(category_label(Some(9)), "NA");
        assert_eq!(category_label(None), "NA");
    }

    #[test]
    fn company_keys_are_unique() {
        let mut keys: Vec<&str> = COMPANY_PATTERNS.iter().map(|(k, _)| *k).collect();
        keys.sort_unstable();
        let before = keys.len();
        keys.dedup();
        assert_eq!(before, keys.len());
    }

    #[test]
    fn load_categories_reads_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("company_categories.jsonl");
        std::fs::write(
            &path,
            "{\"company\": \"trifork\", \"category\": 1}\n{\"company\": \"kmd\", \"category\": 3}\n",
        )
        .unwrap();

        let categories = load_company_categories(&path).unwrap();
        assert_eq!(categories.get("trifork"), Some(&1));
        assert_eq!(categories.get("kmd"), Some(&3));
    }

    #[test]
    fn missing_category_table_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let categories = load_company_categories(&dir.path().join("absent.jsonl")).unwrap();
        assert!(categories.is_empty());
    }
}
