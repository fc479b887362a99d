//! Request and response shapes, and the predicate list a request becomes.

use crate::index::types::{Field, Predicate};
use crate::symbols::fingerprint::encode;
use crate::symbols::table::parse_hex_address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

const NO_FILTER: &str = "must provide at least one filter";

/// Errors surfaced to the caller of `find` / `dump`
#[derive(Debug, Error)]
pub enum QueryError {
    /// The request does not constrain anything
    #[error("{0}")]
    InvalidQuery(String),

    /// A symbol filter whose address is not hex
    #[error("invalid address {value:?} for symbol {symbol}")]
    InvalidAddress { symbol: String, value: String },

    #[error("no build with id {0:?}")]
    NotFound(String),

    /// The store failed; not the caller's fault
    #[error("index store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl QueryError {
    pub fn no_filter() -> Self {
        QueryError::InvalidQuery(NO_FILTER.to_string())
    }

    /// HTTP-style status code
    pub fn status(&self) -> u16 {
        match self {
            QueryError::InvalidQuery(_) | QueryError::InvalidAddress { .. } => 400,
            QueryError::NotFound(_) => 404,
            QueryError::Store(_) => 500,
        }
    }

    pub fn title(&self) -> &'static str {
        match self.status() {
            400 => "Bad request",
            404 => "Not found",
            _ => "Internal error",
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }
}

/// Body of a find request. Every field is optional, but at least one
/// filter must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildid: Option<String>,
    /// Symbol name to leaked absolute address (hex, `0x` optional)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub symbols: BTreeMap<String, String>,
    /// Names to resolve in the output without filtering on them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_symbols: Vec<String>,
}

impl FindRequest {
    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }

    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::Id => self.id.as_deref(),
            Field::Md5 => self.md5.as_deref(),
            Field::Sha1 => self.sha1.as_deref(),
            Field::Sha256 => self.sha256.as_deref(),
            Field::BuildId => self.buildid.as_deref(),
        }
    }
}

/// A validated request: the conjunction to run and the names to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub predicates: Vec<Predicate>,
    /// Names the caller asked about, filter names first, in request order
    pub requested: Vec<String>,
}

impl Query {
    /// Build the conjunction for a find request.
    ///
    /// Blank field values count as absent. Digests and build ids are hex and
    /// compared in lowercase; ids are compared verbatim.
    pub fn from_find(request: &FindRequest) -> Result<Self, QueryError> {
        let mut predicates = Vec::new();

        for field in Field::ALL {
            let Some(value) = request.field(field).map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            let value = match field {
                Field::Id => value.to_string(),
                _ => value.to_ascii_lowercase(),
            };
            predicates.push(Predicate::equals(field, value));
        }

        let mut requested = Vec::with_capacity(request.symbols.len() + request.extra_symbols.len());
        for (name, addr) in &request.symbols {
            let address = parse_hex_address(addr.trim()).ok_or_else(|| QueryError::InvalidAddress {
                symbol: name.clone(),
                value: addr.clone(),
            })?;
            predicates.push(Predicate::Term(encode(name, address)));
            requested.push(name.clone());
        }

        if predicates.is_empty() {
            return Err(QueryError::no_filter());
        }

        for name in &request.extra_symbols {
            if !requested.contains(name) {
                requested.push(name.clone());
            }
        }

        Ok(Self {
            predicates,
            requested,
        })
    }
}

/// One matching build, as returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildid: Option<String>,
    pub sha1: String,
    pub md5: String,
    pub sha256: String,
    /// Resolved name to `0x`-prefixed absolute address
    pub symbols: BTreeMap<String, String>,
    pub download_url: String,
    pub symbols_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_is_invalid() {
        let err = Query::from_find(&FindRequest::default()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
        assert_eq!(err.to_string(), "must provide at least one filter");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_extra_symbols_alone_are_not_a_filter() {
        let request = FindRequest {
            extra_symbols: vec!["system".into()],
            ..FindRequest::default()
        };
        assert!(matches!(
            Query::from_find(&request),
            Err(QueryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_blank_fields_are_absent() {
        let request = FindRequest {
            md5: Some("  ".into()),
            ..FindRequest::default()
        };
        assert!(Query::from_find(&request).is_err());
    }

    #[test]
    fn test_symbol_filters_become_terms() {
        let request: FindRequest = serde_json::from_str(
            r#"{"symbols": {"system": "0x7f1234f7a0", "puts": "5559c0"}}"#,
        )
        .unwrap();
        let query = Query::from_find(&request).unwrap();
        assert_eq!(
            query.predicates,
            vec![
                Predicate::Term("puts@9c0".into()),
                Predicate::Term("system@7a0".into()),
            ]
        );
        assert_eq!(query.requested, vec!["puts", "system"]);
    }

    #[test]
    fn test_hash_fields_lowercased() {
        let request = FindRequest {
            id: Some("Libc-A".into()),
            sha1: Some("ABCDEF".into()),
            ..FindRequest::default()
        };
        let query = Query::from_find(&request).unwrap();
        assert_eq!(
            query.predicates,
            vec![
                Predicate::equals(Field::Id, "Libc-A"),
                Predicate::equals(Field::Sha1, "abcdef"),
            ]
        );
    }

    #[test]
    fn test_bad_address_is_client_error() {
        let mut request = FindRequest::default();
        request.symbols.insert("system".into(), "0xzz".into());
        let err = Query::from_find(&request).unwrap_err();
        assert!(matches!(err, QueryError::InvalidAddress { .. }));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_extra_symbols_deduplicated() {
        let mut request = FindRequest::by_id("x");
        request.symbols.insert("read".into(), "0x10".into());
        request.extra_symbols = vec!["read".into(), "write".into()];
        let query = Query::from_find(&request).unwrap();
        assert_eq!(query.requested, vec!["read", "write"]);
    }

    #[test]
    fn test_match_result_omits_missing_buildid() {
        let result = MatchResult {
            id: "x".into(),
            buildid: None,
            sha1: "a".into(),
            md5: "b".into(),
            sha256: "c".into(),
            symbols: BTreeMap::new(),
            download_url: "u".into(),
            symbols_url: "s".into(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("buildid").is_none());
        assert_eq!(json["download_url"], "u");
    }
}
