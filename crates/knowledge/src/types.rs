use chrono::{DateTime, Utc};
use cycle_vector_store::Metadata;
use serde::{Deserialize, Serialize};

/// Contents of `<collection>/metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    #[serde(rename = "cycle_id", alias = "id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseStatus,
}

impl CollectionMetadata {
    pub(crate) fn new(id: &str, title: &str, description: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description,
            created_at: Utc::now(),
            sessions: Vec::new(),
            knowledge_base: KnowledgeBaseStatus::default(),
        }
    }

    #[must_use]
    pub fn summary(&self) -> CollectionSummary {
        CollectionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            session_count: self.sessions.len(),
            indexed: self.knowledge_base.indexed,
            document_count: self.knowledge_base.document_count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseStatus {
    /// True only when the current index covers every stored document
    pub indexed: bool,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub last_updated: Option<DateTime<Utc>>,
    pub document_count: usize,
}

/// A lab session registered with a collection; extra info is stored inline
/// and must not use the [`SessionRecord::RESERVED_KEYS`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub added_at: DateTime<Utc>,
    #[serde(flatten)]
    pub info: Metadata,
}

impl SessionRecord {
    /// Keys written by the store itself; session info may not override them
    pub const RESERVED_KEYS: [&'static str; 2] = ["session_id", "added_at"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub session_count: usize,
    pub indexed: bool,
    pub document_count: usize,
}

/// Contents of `knowledge_base/<doc_id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub title: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub user_metadata: Metadata,
}

/// Input to [`crate::KnowledgeStore::add_document`]
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub text: String,
    /// Defaults to `Document <id>`
    pub title: Option<String>,
    /// Generated from the current time when absent
    pub document_id: Option<String>,
    pub metadata: Metadata,
}

impl NewDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub meta: DocumentMeta,
    pub text: String,
}

/// Timestamps are written as RFC 3339. Values without an offset, as older
/// collections store them, are read as local time.
mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        Some(
            Local
                .from_local_datetime(&naive)
                .earliest()
                .map_or_else(|| naive.and_utc(), |local| local.with_timezone(&Utc)),
        )
    }

    fn invalid<E: Error>(raw: &str) -> E {
        E::custom(format!("invalid timestamp '{raw}'"))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| invalid(&raw))
    }

    pub(super) fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| parse(&raw).ok_or_else(|| invalid(&raw)))
            .transpose()
    }
}
