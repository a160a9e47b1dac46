use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;

use crate::companies::{COMPANY_PATTERNS, NAMESAKE_PREFIXES};

/// Danish location keywords: country tags, the larger cities and the common
/// abbreviations people put in GitHub location fields. The same list feeds
/// the user-search filter clause.
pub const DK_LOCATIONS: &[&str] = &[
    "dk",
    "Denmark",
    "Danmark",
    "CPH",
    "KBH",
    "Copenhagen",
    "Cop",
    "København",
    "Odense",
    "Aarhus",
    "Århus",
    "Aalborg",
    "Ålborg",
    "Esbjerg",
    "Randers",
    "Kolding",
    "Horsens",
    "Vejle",
    "Roskilde",
    "Herning",
];

/// Filter clause appended to company search queries to narrow the user
/// search to Danish locations.
pub fn location_filter_clause() -> String {
    let locations: Vec<String> = DK_LOCATIONS
        .iter()
        .map(|loc| format!("location:{}", loc))
        .collect();
    format!("type:user&org {}", locations.join(" "))
}

/// The free-text profile fields the resolver inspects.
#[derive(Debug, Clone, Default)]
pub struct ProfileFields {
    pub login: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
}

impl ProfileFields {
    /// Non-null bio-style fields, lowercased, in a fixed order. The location
    /// field is handled separately by the location stage.
    pub fn bio_fields(&self) -> Vec<String> {
        [
            Some(self.login.as_str()),
            self.company.as_deref(),
            self.email.as_deref(),
            self.bio.as_deref(),
            self.blog.as_deref(),
        ]
        .iter()
        .flatten()
        .filter(|field| !field.is_empty())
        .map(|field| field.to_lowercase())
        .collect()
    }
}

/// External geocoding collaborator: does this free-text place name lie in
/// Denmark? Lookup failures are the caller's to swallow per token.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn is_in_denmark(&self, place: &str) -> Result<bool>;
}

/// GeoNames-backed geocoder. One GET per place-name token against the search
/// page; a response counts as Danish only when the result table's country
/// column contains "denmark". Malformed or table-less responses are "no
/// match", never an error.
pub struct GeoNamesClient {
    http: reqwest::Client,
    base_url: String,
}

impl GeoNamesClient {
    pub const BASE_URL: &'static str = "https://www.geonames.org";

    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: Self::BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl Geocoder for GeoNamesClient {
    async fn is_in_denmark(&self, place: &str) -> Result<bool> {
        let url = format!("{}/search.html?q={}&country=", self.base_url, place);
        let body = self
            .http
            .get(&url)
            .send()
            .await
            .context(format!("GeoNames lookup failed for '{}'", place))?
            .error_for_status()
            .context(format!("GeoNames returned an error status for '{}'", place))?
            .text()
            .await
            .context("Failed to read GeoNames response body")?;
        Ok(result_table_country_is_denmark(&body))
    }
}

/// Scans the `restable` result table of a GeoNames search page for a country
/// cell containing "denmark". Anything that does not look like a result
/// table is treated as no match.
pub fn result_table_country_is_denmark(html: &str) -> bool {
    let Some(start) = html.find("restable") else {
        return false;
    };
    let table = &html[start..];
    let table = match table.find("</table>") {
        Some(end) => &table[..end],
        None => table,
    };
    table.to_lowercase().contains("denmark")
}

/// Classifies a user's free-text fields as Danish-located and/or employed by
/// a known company. Location first; the company dictionary only runs once
/// Danish evidence exists.
pub struct IdentityResolver {
    location_pattern: Regex,
    company_patterns: Vec<(String, Regex)>,
    geocoder: Box<dyn Geocoder>,
}

impl IdentityResolver {
    pub fn new(geocoder: Box<dyn Geocoder>) -> Result<Self> {
        let alternation: Vec<String> = DK_LOCATIONS.iter().map(|loc| regex::escape(loc)).collect();
        let location_pattern = RegexBuilder::new(&format!(r"\b({})\b", alternation.join("|")))
            .case_insensitive(true)
            .build()
            .context("Failed to compile the Danish location pattern")?;

        let mut company_patterns = Vec::with_capacity(COMPANY_PATTERNS.len());
        for (company, pattern) in COMPANY_PATTERNS {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .context(format!("Failed to compile company pattern for '{}'", company))?;
            company_patterns.push(((*company).to_string(), regex));
        }

        Ok(Self {
            location_pattern,
            company_patterns,
            geocoder,
        })
    }

    /// All Danish location keywords found in the given text.
    pub fn match_location_keywords(&self, text: &str) -> Vec<String> {
        self.location_pattern
            .find_iter(text)
            .map(|found| found.as_str().to_string())
            .collect()
    }

    /// Location stage plus geocoding fallback. Returns the Danish evidence,
    /// or `None` when neither the keyword whitelist nor the geocoder places
    /// the user in Denmark.
    pub async fn user_is_from_dk(
        &self,
        bio_fields: &[String],
        location: Option<&str>,
    ) -> Option<Vec<String>> {
        let location_text = location.unwrap_or_default();
        let combined = format!("{} {}", bio_fields.join(" "), location_text);

        let keyword_matches = self.match_location_keywords(&combined);
        if !keyword_matches.is_empty() {
            return Some(keyword_matches);
        }
        if location_text.is_empty() {
            return None;
        }
        self.look_up_location_in_dk(location_text).await
    }

    /// Geocoding fallback over the location field: one lookup per
    /// whitespace token, trailing commas stripped, purely numeric tokens
    /// skipped. A failed lookup silently drops that token.
    async fn look_up_location_in_dk(&self, location: &str) -> Option<Vec<String>> {
        let mut dk_tags = Vec::new();
        for token in location.split_whitespace() {
            let token = token.trim_end_matches(',');
            if token.is_empty() || token.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            match self.geocoder.is_in_denmark(token).await {
                Ok(true) => dk_tags.push(token.to_string()),
                Ok(false) => {}
                Err(err) => {
                    debug!("Geocoding lookup for '{}' failed: {:#}", token, err);
                }
            }
        }
        if dk_tags.is_empty() {
            None
        } else {
            Some(dk_tags)
        }
    }

    /// Company stage: every dictionary pattern against every field. A company
    /// matches when at least one field matches; the match record keeps the
    /// matched substring from every field that matched.
    pub fn search_for_company(&self, bio_fields: &[String]) -> Option<BTreeMap<String, Vec<String>>> {
        let mut matches: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (company, regex) in &self.company_patterns {
            let mut found = Vec::new();
            for field in bio_fields {
                if let Some(matched) = first_valid_match(company, regex, field) {
                    found.push(matched);
                }
            }
            if !found.is_empty() {
                matches.insert(company.clone(), found);
            }
        }
        if matches.is_empty() {
            None
        } else {
            Some(matches)
        }
    }

    /// Full resolution: Danish evidence AND at least one company match, or
    /// nothing. The company dictionary never runs when the location stages
    /// found no evidence.
    pub async fn resolve_dk_and_company(
        &self,
        fields: &ProfileFields,
    ) -> Option<(Vec<String>, BTreeMap<String, Vec<String>>)> {
        let bio_fields = fields.bio_fields();

        let location_evidence = self
            .user_is_from_dk(&bio_fields, fields.location.as_deref())
            .await?;

        let Some(company_matches) = self.search_for_company(&bio_fields) else {
            warn!("User '{}' is Danish-located but matched no company.", fields.login);
            return None;
        };

        Some((location_evidence, company_matches))
    }
}

/// First occurrence of the pattern in the field that is not preceded by a
/// namesake prefix (e.g. "h.c. ørsted" is the physicist, not the company).
fn first_valid_match(company: &str, regex: &Regex, field: &str) -> Option<String> {
    let vetoes = NAMESAKE_PREFIXES
        .iter()
        .find(|(key, _)| *key == company)
        .map(|(_, prefixes)| *prefixes);

    for found in regex.find_iter(field) {
        let vetoed = vetoes.is_some_and(|prefixes| {
            let before = field[..found.start()].trim_end();
            prefixes.iter().any(|prefix| before.ends_with(prefix.trim_end()))
        });
        if !vetoed {
            return Some(found.as_str().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Canned geocoder: answers from a fixed table, errors on demand.
    struct StubGeocoder {
        danish: Vec<&'static str>,
        failing: Vec<&'static str>,
    }

    impl StubGeocoder {
        fn none() -> Self {
            Self { danish: vec![], failing: vec![] }
        }
    }

    #[async_trait]
    impl Geocoder for StubGeocoder {
        async fn is_in_denmark(&self, place: &str) -> Result<bool> {
            if self.failing.contains(&place) {
                anyhow::bail!("lookup failed");
            }
            Ok(self.danish.contains(&place))
        }
    }

    fn resolver(geocoder: StubGeocoder) -> IdentityResolver {
        IdentityResolver::new(Box::new(geocoder)).unwrap()
    }

    fn fields(login: &str, bio: Option<&str>, location: Option<&str>) -> ProfileFields {
        ProfileFields {
            login: login.to_string(),
            bio: bio.map(str::to_string),
            location: location.map(str::to_string),
            ..ProfileFields::default()
        }
    }

    #[tokio::test]
    async fn no_keyword_and_no_geocoding_match_resolves_to_nothing() {
        let resolver = resolver(StubGeocoder::none());
        let fields = fields("octocat", Some("works at trifork"), Some("Berlin"));

        // Idempotent across repeated calls with the same stubbed responses.
        for _ in 0..2 {
            assert!(resolver.resolve_dk_and_company(&fields).await.is_none());
        }
    }

    #[tokio::test]
    async fn location_without_company_resolves_to_nothing() {
        let resolver = resolver(StubGeocoder::none());
        let fields = fields("plainuser", Some("just a developer"), Some("Copenhagen"));
        assert!(resolver.resolve_dk_and_company(&fields).await.is_none());
    }

    #[tokio::test]
    async fn multiple_company_matches_keep_matched_substrings() {
        let resolver = resolver(StubGeocoder::none());
        let fields = ProfileFields {
            login: "devx".to_string(),
            company: Some("Trifork".to_string()),
            bio: Some("ex-netcompany, now at trifork-labs, based in Aarhus".to_string()),
            ..ProfileFields::default()
        };

        let (location, companies) = resolver.resolve_dk_and_company(&fields).await.unwrap();
        assert_eq!(location, vec!["aarhus".to_string()]);
        assert_eq!(
            companies.keys().collect::<Vec<_>>(),
            vec!["netcompany", "trifork"]
        );
        // The matched substring, not the whole field.
        assert_eq!(companies["netcompany"], vec!["netcompany".to_string()]);
        assert_eq!(
            companies["trifork"],
            vec!["trifork".to_string(), "trifork-labs".to_string()]
        );
    }

    #[tokio::test]
    async fn geocoding_fallback_accepts_danish_tokens() {
        let resolver = resolver(StubGeocoder {
            danish: vec!["Billund"],
            failing: vec![],
        });
        let bio = vec!["kmd developer".to_string()];

        let evidence = resolver.user_is_from_dk(&bio, Some("Billund, 7190")).await;
        assert_eq!(evidence, Some(vec!["Billund".to_string()]));
    }

    #[tokio::test]
    async fn geocoding_errors_are_swallowed_per_token() {
        let resolver = resolver(StubGeocoder {
            danish: vec!["Vanløse"],
            failing: vec!["Somewhereville"],
        });
        let bio = vec!["dev".to_string()];

        // The failing token contributes nothing; the other still counts.
        let evidence = resolver
            .user_is_from_dk(&bio, Some("Somewhereville Vanløse"))
            .await;
        assert_eq!(evidence, Some(vec!["Vanløse".to_string()]));

        // All tokens failing or unknown means the stage fails.
        let evidence = resolver.user_is_from_dk(&bio, Some("Somewhereville 42")).await;
        assert_eq!(evidence, None);
    }

    #[tokio::test]
    async fn location_keywords_match_case_insensitively_on_word_boundaries() {
        let resolver = resolver(StubGeocoder::none());
        let matched = resolver.match_location_keywords("Senior dev, AARHUS & copenhagen");
        assert_eq!(matched, vec!["AARHUS".to_string(), "copenhagen".to_string()]);
        // "dkim" must not count as the "dk" tag.
        assert!(resolver.match_location_keywords("dkim signing expert").is_empty());
    }

    #[tokio::test]
    async fn namesake_prefix_suppresses_the_occurrence_not_the_field() {
        let resolver = resolver(StubGeocoder::none());

        let physicist = vec!["studied at h.c. ørsted institute".to_string()];
        assert!(resolver.search_for_company(&physicist).is_none());

        let both = vec!["h.c. ørsted institute alum, engineer at ørsted".to_string()];
        let matches = resolver.search_for_company(&both).unwrap();
        assert_eq!(matches["ørsted"], vec!["ørsted".to_string()]);
    }

    #[test]
    fn geonames_result_table_parsing_is_tolerant() {
        let hit = r#"<table class="restable"><tr><td>Billund</td><td>Denmark</td></tr></table>"#;
        assert!(result_table_country_is_denmark(hit));

        let miss = r#"<table class="restable"><tr><td>Berlin</td><td>Germany</td></tr></table>"#;
        assert!(!result_table_country_is_denmark(miss));

        // Denmark mentioned outside the result table does not count.
        let outside = r#"<p>Denmark</p><table class="restable"><tr><td>Berlin</td><td>Germany</td></tr></table>"#;
        assert!(!result_table_country_is_denmark(outside));

        assert!(!result_table_country_is_denmark("<html>no table here</html>"));
        assert!(!result_table_country_is_denmark(""));
    }

    #[test]
    fn filter_clause_covers_the_whitelist() {
        let clause = location_filter_clause();
        assert!(clause.starts_with("type:user&org "));
        assert!(clause.contains("location:Copenhagen"));
        assert!(clause.contains("location:København"));
        assert_eq!(clause.matches("location:").count(), DK_LOCATIONS.len());
    }
}
