//! Build-time asset manifest for the precache.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use url::Url;

const REVISION_PARAM: &str = "__revision";

/// One manifest entry. Assets without a revision carry a content hash in
/// their URL and are keyed by URL alone.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrecacheEntry {
    pub url: String,
    #[serde(default)]
    pub revision: Option<String>,
}

/// The asset list precached at install time.
///
/// Accepts either a bare JSON array of entries or `{"entries": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheManifest {
    pub entries: Vec<PrecacheEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    List(Vec<PrecacheEntry>),
    Wrapped { entries: Vec<PrecacheEntry> },
}

impl PrecacheManifest {
    pub fn new(entries: Vec<PrecacheEntry>) -> Self {
        Self { entries }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let entries = match serde_json::from_str(json)? {
            ManifestFile::List(entries) => entries,
            ManifestFile::Wrapped { entries } => entries,
        };
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&contents)?)
    }
}

/// A manifest resolved against the app origin.
///
/// Maps each asset URL to its revisioned cache key.
#[derive(Debug, Clone, Default)]
pub struct PrecacheIndex {
    by_url: HashMap<String, String>,
}

impl PrecacheIndex {
    /// Resolve every entry against `base`. Entries that do not form a
    /// valid URL are skipped with a warning.
    pub fn resolve(manifest: &PrecacheManifest, base: &Url) -> Self {
        let mut by_url = HashMap::new();
        for entry in &manifest.entries {
            let mut url = match base.join(&entry.url) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(url = %entry.url, error = %e, "Skipping invalid precache entry");
                    continue;
                }
            };
            url.set_fragment(None);
            let key = cache_key(&url, entry.revision.as_deref());
            by_url.insert(url.to_string(), key);
        }
        Self { by_url }
    }

    /// Cache key for a request URL, if the asset is in the manifest.
    pub fn key_for(&self, url: &Url) -> Option<&str> {
        let mut url = url.clone();
        url.set_fragment(None);
        self.by_url.get(url.as_str()).map(String::as_str)
    }

    /// `(asset URL, cache key)` pairs.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_url.iter().map(|(u, k)| (u.as_str(), k.as_str()))
    }

    pub fn keys(&self) -> HashSet<&str> {
        self.by_url.values().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }
}

fn cache_key(url: &Url, revision: Option<&str>) -> String {
    match revision {
        Some(revision) => {
            let mut keyed = url.clone();
            keyed
                .query_pairs_mut()
                .append_pair(REVISION_PARAM, revision);
            keyed.to_string()
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn base() -> Url {
        Url::parse("https://app.example.com/").unwrap()
    }

    #[test]
    fn test_parse_both_shapes() {
        let list = PrecacheManifest::from_json(
            r#"[{"url": "/index.html", "revision": "abc"}, {"url": "/assets/app.1f2e.js"}]"#,
        )
        .unwrap();
        assert_eq!(list.entries.len(), 2);
        assert_eq!(list.entries[0].revision.as_deref(), Some("abc"));
        assert_eq!(list.entries[1].revision, None);

        let wrapped =
            PrecacheManifest::from_json(r#"{"entries": [{"url": "/index.html"}]}"#).unwrap();
        assert_eq!(wrapped.entries.len(), 1);
    }

    #[test]
    fn test_revisioned_keys() {
        let manifest = PrecacheManifest::new(vec![
            PrecacheEntry {
                url: "/index.html".to_string(),
                revision: Some("r1".to_string()),
            },
            PrecacheEntry {
                url: "assets/app.1f2e.js".to_string(),
                revision: None,
            },
        ]);
        let index = PrecacheIndex::resolve(&manifest, &base());
        assert_eq!(index.len(), 2);

        let html = Url::parse("https://app.example.com/index.html#top").unwrap();
        assert_eq!(
            index.key_for(&html),
            Some("https://app.example.com/index.html?__revision=r1")
        );

        let js = Url::parse("https://app.example.com/assets/app.1f2e.js").unwrap();
        assert_eq!(index.key_for(&js), Some(js.as_str()));

        let other = Url::parse("https://app.example.com/missing.css").unwrap();
        assert_eq!(index.key_for(&other), None);
    }
}
