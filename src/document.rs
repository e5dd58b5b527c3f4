//! Persisted shapes: indexed pages and the registry of crawled sites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Suffix shared by every stored vector field.
pub const VECTOR_FIELD_SUFFIX: &str = "_vector";

/// Collection holding [`DomainRecord`]s.
pub const DOMAIN_COLLECTION: &str = "web";
/// Pattern matching every per-language document collection.
pub const ALL_DOCUMENT_COLLECTIONS: &str = "web-*";

/// Name of the document collection for a language code (`web-<code>`).
pub fn collection_for(language: &str) -> String {
    format!("{DOMAIN_COLLECTION}-{language}")
}

/// Host part of a URL, used as the document and registry domain key.
pub fn domain_of(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_ascii_lowercase()
}

/// One indexed page, keyed by `url` inside its language collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Page URL, unique per collection.
    pub url: String,
    /// Host the page belongs to.
    pub domain: String,
    /// Page title, possibly empty.
    #[serde(default)]
    pub title: String,
    /// Declared description, possibly empty.
    #[serde(default)]
    pub description: String,
    /// Cleaned main content.
    #[serde(default)]
    pub body: String,
    /// Quality weight from [`crate::scoring::score`].
    #[serde(default)]
    pub weight: i64,
    /// Optional thumbnail reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Embeddings keyed by vector field name (`bert_vector`, `laser_vector`).
    /// Other unknown fields of a stored document are ignored.
    #[serde(
        flatten,
        default,
        deserialize_with = "vector_fields",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub vectors: BTreeMap<String, Vec<f32>>,
}

fn vector_fields<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let rest = BTreeMap::<String, Value>::deserialize(deserializer)?;
    Ok(rest
        .into_iter()
        .filter(|(key, _)| key.ends_with(VECTOR_FIELD_SUFFIX))
        .filter_map(|(key, value)| {
            serde_json::from_value::<Vec<f32>>(value)
                .ok()
                .map(|vector| (key, vector))
        })
        .collect())
}

/// Acknowledgement returned by a document upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexAck {
    /// Collection written to.
    pub collection: String,
    /// Document key.
    pub url: String,
    /// True when the write replaced an existing document.
    pub replaced: bool,
}

/// Registry entry for a crawled or referenced site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Host name, the registry key.
    pub domain: String,
    /// Resolved homepage URL.
    pub homepage: String,
    /// Contact address supplied by a reference request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Time of the last site exploration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_crawl: Option<DateTime<Utc>>,
}

/// Partial update of a [`DomainRecord`]; `None` fields leave stored values alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainPatch {
    /// Registry key.
    pub domain: String,
    /// Resolved homepage URL.
    pub homepage: String,
    /// Contact address to store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Crawl timestamp to store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_crawl: Option<DateTime<Utc>>,
}

impl DomainPatch {
    /// Patch recorded when a site exploration starts.
    pub fn crawled(homepage: &Url, at: DateTime<Utc>) -> Self {
        Self {
            domain: domain_of(homepage),
            homepage: homepage.to_string(),
            email: None,
            last_crawl: Some(at),
        }
    }

    /// Patch recorded when a site owner asks to be referenced.
    pub fn referenced(homepage: &Url, email: impl Into<String>) -> Self {
        Self {
            domain: domain_of(homepage),
            homepage: homepage.to_string(),
            email: Some(email.into()),
            last_crawl: None,
        }
    }

    /// Applies the patch on top of an existing record (or creates one).
    pub fn apply(self, existing: Option<DomainRecord>) -> DomainRecord {
        let (email, last_crawl) = existing
            .map(|record| (record.email, record.last_crawl))
            .unwrap_or((None, None));
        DomainRecord {
            domain: self.domain,
            homepage: self.homepage,
            email: self.email.or(email),
            last_crawl: self.last_crawl.or(last_crawl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn homepage() -> Url {
        Url::parse("https://Example.com/").unwrap()
    }

    #[test]
    fn names_collections() {
        assert_eq!(collection_for("en"), "web-en");
        assert_eq!(domain_of(&homepage()), "example.com");
    }

    #[test]
    fn reference_after_crawl_keeps_last_crawl() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let crawled = DomainPatch::crawled(&homepage(), at).apply(None);
        let merged = DomainPatch::referenced(&homepage(), "owner@example.com").apply(Some(crawled));
        assert_eq!(merged.last_crawl, Some(at));
        assert_eq!(merged.email.as_deref(), Some("owner@example.com"));
    }

    #[test]
    fn crawl_after_reference_keeps_email() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let referenced = DomainPatch::referenced(&homepage(), "owner@example.com").apply(None);
        let merged = DomainPatch::crawled(&homepage(), at).apply(Some(referenced));
        assert_eq!(merged.email.as_deref(), Some("owner@example.com"));
        assert_eq!(merged.last_crawl, Some(at));
    }

    #[test]
    fn patch_serializes_only_present_fields() {
        let patch = DomainPatch::referenced(&homepage(), "owner@example.com");
        let value = serde_json::to_value(&patch).unwrap();
        assert!(value.get("last_crawl").is_none());
        assert_eq!(value["email"], "owner@example.com");
    }

    #[test]
    fn vectors_flatten_into_document() {
        let mut doc = Document {
            url: "https://example.com/".into(),
            domain: "example.com".into(),
            title: "Home".into(),
            description: String::new(),
            body: String::new(),
            weight: 1,
            thumbnail: None,
            vectors: BTreeMap::new(),
        };
        doc.vectors.insert("bert_vector".into(), vec![0.5, 0.25]);
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["bert_vector"], serde_json::json!([0.5, 0.25]));
        let back: Document = serde_json::from_value(value).unwrap();
        assert_eq!(back.vectors["bert_vector"], vec![0.5, 0.25]);
    }

    #[test]
    fn unknown_source_fields_are_ignored() {
        let source = serde_json::json!({
            "url": "https://example.com/",
            "domain": "example.com",
            "title": "Home",
            "lang": "en",
            "tags": ["pasta", "bread"],
            "crawled_by": {"agent": "other"},
            "laser_vector": [1.0, 0.0],
            "stale_vector": null,
        });
        let doc: Document = serde_json::from_value(source).unwrap();
        assert_eq!(doc.title, "Home");
        assert_eq!(doc.vectors.len(), 1);
        assert_eq!(doc.vectors["laser_vector"], vec![1.0, 0.0]);
    }
}
