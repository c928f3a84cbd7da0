//! Typed per-realm snapshot payloads.
//!
//! A snapshot is the full content of a realm at capture time. Documents are
//! kept as opaque JSON objects; only the collection layout is typed, so the
//! restore path can walk every collection exhaustively and strip the
//! identity fields the content store assigns.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::backup::{BackupRealm, BackupStats, CollectionCount};

/// A single content document.
pub type Document = Map<String, Value>;

/// Fields assigned by the content store that must not survive a restore.
pub const IDENTITY_FIELDS: [&str; 3] = ["_id", "id", "__v"];

pub const PERSONS: &str = "persons";
pub const NEWS: &str = "news";
pub const ARTICLES: &str = "articles";
pub const CONVERSATIONS: &str = "conversations";
pub const PALESTINE: &str = "palestine";
pub const GALLERY: &str = "gallery";
pub const CONTACTS: &str = "contacts";
pub const COMMENTS: &str = "comments";
pub const TICKER_NEWS: &str = "ticker_news";
pub const TICKER_SETTINGS: &str = "ticker_settings";
pub const HERO_SLIDES: &str = "hero_slides";

/// Collections backed up for each realm, in payload order.
pub fn realm_collections(realm: BackupRealm) -> &'static [&'static str] {
    match realm {
        BackupRealm::FamilyTree => &[PERSONS],
        BackupRealm::Cms => &[
            NEWS,
            ARTICLES,
            CONVERSATIONS,
            PALESTINE,
            GALLERY,
            CONTACTS,
            COMMENTS,
            TICKER_NEWS,
            TICKER_SETTINGS,
            HERO_SLIDES,
        ],
    }
}

/// Every CMS content collection. `ticker_settings` is a singleton.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CmsSnapshot {
    #[serde(default)]
    pub news: Vec<Document>,
    #[serde(default)]
    pub articles: Vec<Document>,
    #[serde(default)]
    pub conversations: Vec<Document>,
    #[serde(default)]
    pub palestine: Vec<Document>,
    #[serde(default)]
    pub gallery: Vec<Document>,
    #[serde(default)]
    pub contacts: Vec<Document>,
    #[serde(default)]
    pub comments: Vec<Document>,
    #[serde(default)]
    pub ticker_news: Vec<Document>,
    #[serde(default)]
    pub ticker_settings: Option<Document>,
    #[serde(default)]
    pub hero_slides: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "realm", rename_all = "kebab-case")]
pub enum SnapshotPayload {
    FamilyTree { persons: Vec<Document> },
    Cms(CmsSnapshot),
}

/// A borrowed view of one collection in a payload.
#[derive(Debug, Clone, Copy)]
pub enum CollectionData<'a> {
    Many(&'a [Document]),
    One(Option<&'a Document>),
}

impl CollectionData<'_> {
    pub fn len(&self) -> usize {
        match self {
            CollectionData::Many(docs) => docs.len(),
            CollectionData::One(doc) => usize::from(doc.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotPayload {
    pub fn realm(&self) -> BackupRealm {
        match self {
            SnapshotPayload::FamilyTree { .. } => BackupRealm::FamilyTree,
            SnapshotPayload::Cms(_) => BackupRealm::Cms,
        }
    }

    /// Every collection with its documents, in `realm_collections` order.
    pub fn collections(&self) -> Vec<(&'static str, CollectionData<'_>)> {
        match self {
            SnapshotPayload::FamilyTree { persons } => {
                vec![(PERSONS, CollectionData::Many(persons))]
            }
            SnapshotPayload::Cms(cms) => vec![
                (NEWS, CollectionData::Many(&cms.news)),
                (ARTICLES, CollectionData::Many(&cms.articles)),
                (CONVERSATIONS, CollectionData::Many(&cms.conversations)),
                (PALESTINE, CollectionData::Many(&cms.palestine)),
                (GALLERY, CollectionData::Many(&cms.gallery)),
                (CONTACTS, CollectionData::Many(&cms.contacts)),
                (COMMENTS, CollectionData::Many(&cms.comments)),
                (TICKER_NEWS, CollectionData::Many(&cms.ticker_news)),
                (TICKER_SETTINGS, CollectionData::One(cms.ticker_settings.as_ref())),
                (HERO_SLIDES, CollectionData::Many(&cms.hero_slides)),
            ],
        }
    }

    pub fn total_records(&self) -> u64 {
        self.collections()
            .iter()
            .map(|(_, data)| data.len() as u64)
            .sum()
    }

    /// Canonical serialized form. Object keys are emitted in sorted order at
    /// every depth, so the bytes depend only on the payload's content.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let value = canonicalize(serde_json::to_value(self)?);
        Ok(serde_json::to_vec(&value)?)
    }

    /// SHA-256 hex digest of the canonical bytes.
    pub fn checksum_sha256(&self) -> Result<String> {
        Ok(digest_hex(&self.canonical_bytes()?))
    }

    /// Counts and serialized size, plus the checksum of the same bytes.
    pub fn fingerprint(&self) -> Result<(BackupStats, String)> {
        let bytes = self.canonical_bytes()?;
        let stats = BackupStats {
            total_records: self.total_records(),
            collections: self
                .collections()
                .iter()
                .map(|(name, data)| CollectionCount {
                    name: (*name).to_string(),
                    count: data.len() as u64,
                })
                .collect(),
            size_in_bytes: bytes.len() as u64,
        };
        Ok((stats, digest_hex(&bytes)))
    }
}

fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Remove store-assigned identity fields before reinsertion.
pub fn strip_identity(mut doc: Document) -> Document {
    for field in IDENTITY_FIELDS {
        doc.remove(field);
    }
    doc
}
