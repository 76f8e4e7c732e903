//! config-rs/repo_mapping.rs
//! Maps cloud resource ARNs to the repository holding their Terraform

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Key that matches any resource without a more specific entry.
pub const DEFAULT_KEY: &str = "default";

/// `{ "<arn or arn prefix>": "owner/repo", "default": "owner/repo" }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoMapping(BTreeMap<String, String>);

impl RepoMapping {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<BTreeMap<String, String>>(raw).map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Exact ARN first, then the longest key that prefixes the ARN, then
    /// the default entry.
    pub fn repo_for(&self, resource_arn: &str) -> Option<&str> {
        if let Some(repo) = self.0.get(resource_arn) {
            return Some(repo);
        }

        self.0
            .iter()
            .filter(|(key, _)| key.as_str() != DEFAULT_KEY && resource_arn.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, repo)| repo.as_str())
            .or_else(|| self.0.get(DEFAULT_KEY).map(String::as_str))
    }

    /// Entries whose repository is not `owner/name`.
    pub fn invalid_entries(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, repo)| {
                let mut parts = repo.split('/');
                !matches!(
                    (parts.next(), parts.next(), parts.next()),
                    (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
                )
            })
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

// Accepts either a JSON string (environment variables) or a table (TOML file).
impl<'de> Deserialize<'de> for RepoMapping {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Json(String),
            Table(BTreeMap<String, String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Json(raw) if raw.trim().is_empty() => Ok(Self::default()),
            Raw::Json(raw) => Self::from_json(&raw).map_err(serde::de::Error::custom),
            Raw::Table(map) => Ok(Self(map)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> RepoMapping {
        RepoMapping::from_json(
            r#"{
                "arn:aws:s3:::special-bucket": "org/special",
                "arn:aws:s3:::": "org/storage",
                "arn:aws:s3:::logs-": "org/logging",
                "default": "org/infra"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn exact_beats_prefix() {
        assert_eq!(mapping().repo_for("arn:aws:s3:::special-bucket"), Some("org/special"));
    }

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(mapping().repo_for("arn:aws:s3:::logs-eu"), Some("org/logging"));
        assert_eq!(mapping().repo_for("arn:aws:s3:::data"), Some("org/storage"));
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(mapping().repo_for("arn:aws:iam::123:role/x"), Some("org/infra"));
        let no_default = RepoMapping::from_json(r#"{"arn:aws:s3:::": "org/storage"}"#).unwrap();
        assert_eq!(no_default.repo_for("arn:aws:iam::123:role/x"), None);
    }

    #[test]
    fn flags_malformed_repositories() {
        let m = RepoMapping::from_json(r#"{"default": "just-a-name", "a": "org/repo", "b": "a/b/c"}"#)
            .unwrap();
        assert_eq!(m.invalid_entries(), vec!["b", "default"]);
    }
}
