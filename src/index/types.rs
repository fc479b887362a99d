use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a record in a store, assigned at insertion
pub type DocId = u32;

/// On-disk format version of [`IndexMeta`] and the postings snapshot
pub const INDEX_VERSION: u32 = 1;

/// Exact-match fields of a build record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Id,
    Md5,
    Sha1,
    Sha256,
    #[serde(rename = "buildid")]
    BuildId,
}

impl Field {
    pub const ALL: [Field; 5] = [Field::Id, Field::Md5, Field::Sha1, Field::Sha256, Field::BuildId];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Md5 => "md5",
            Field::Sha1 => "sha1",
            Field::Sha256 => "sha256",
            Field::BuildId => "buildid",
        }
    }

    /// Tag byte used by the postings snapshot
    pub(crate) fn tag(&self) -> u8 {
        *self as u8 + 1
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag.checked_sub(1)? as usize).copied()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content digests of a build's raw bytes, lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digests {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// The stored, queryable representation of one indexed binary.
/// Records are written once and never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: String,
    #[serde(flatten)]
    pub digests: Digests,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildid: Option<String>,
    /// Space-separated fingerprint terms
    pub symbols: String,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}

impl BuildRecord {
    /// Value of an exact-match field, if the record has one
    pub fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::Id => Some(&self.id),
            Field::Md5 => Some(&self.digests.md5),
            Field::Sha1 => Some(&self.digests.sha1),
            Field::Sha256 => Some(&self.digests.sha256),
            Field::BuildId => self.buildid.as_deref(),
        }
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.symbols.split_whitespace()
    }
}

/// One conjunct of a store query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// Field value equals the given string exactly
    Equals { field: Field, value: String },
    /// The record's symbol terms contain this term
    Term(String),
}

impl Predicate {
    pub fn equals(field: Field, value: impl Into<String>) -> Self {
        Predicate::Equals {
            field,
            value: value.into(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Equals { field, value } => write!(f, "{}={}", field, value),
            Predicate::Term(term) => write!(f, "symbols:{}", term),
        }
    }
}

/// Index metadata stored in meta.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub version: u32,
    pub name: String,
    pub doc_count: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl IndexMeta {
    pub fn new(name: &str, now: u64) -> Self {
        Self {
            version: INDEX_VERSION,
            name: name.to_string(),
            doc_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Seconds since the Unix epoch
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BuildRecord {
        BuildRecord {
            id: "libc6_2.31-0ubuntu9_amd64".to_string(),
            digests: Digests {
                md5: "aa".to_string(),
                sha1: "bb".to_string(),
                sha256: "cc".to_string(),
            },
            buildid: None,
            symbols: "system@410 puts@9c0".to_string(),
            timestamp: 1,
        }
    }

    #[test]
    fn test_field_names_roundtrip() {
        for field in Field::ALL {
            assert_eq!(Field::from_tag(field.tag()), Some(field));
        }
        assert_eq!(Field::from_tag(0), None);
    }

    #[test]
    fn test_record_fields_and_terms() {
        let r = record();
        assert_eq!(r.field(Field::Sha1), Some("bb"));
        assert_eq!(r.field(Field::BuildId), None);
        assert_eq!(r.terms().collect::<Vec<_>>(), vec!["system@410", "puts@9c0"]);
        assert_eq!(Predicate::equals(Field::BuildId, "ab").to_string(), "buildid=ab");
        assert_eq!(Predicate::Term("puts@9c0".into()).to_string(), "symbols:puts@9c0");
    }

    #[test]
    fn test_record_json_shape() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["md5"], "aa");
        assert!(json.get("buildid").is_none());
        assert!(json.get("digests").is_none());
    }
}
