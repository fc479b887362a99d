use crate::index::store::BuildStore;
use crate::index::types::BuildRecord;
use crate::query::cache::SymbolCache;
use crate::query::request::{FindRequest, MatchResult, Query, QueryError};
use crate::utils::AppConfig;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Answers find / dump requests against a [`BuildStore`].
///
/// The store is shared; the symbol cache belongs to the matcher. Nothing
/// here mutates the store, so a dropped request leaves no trace.
pub struct Matcher {
    store: Arc<dyn BuildStore>,
    cache: SymbolCache,
    config: AppConfig,
}

impl Matcher {
    /// Matcher resolving symbols from `config.db_dir`
    pub fn new(store: Arc<dyn BuildStore>, config: &AppConfig) -> Self {
        let cache = SymbolCache::new(&config.db_dir, config.cache_capacity);
        Self::with_cache(store, cache, config)
    }

    pub fn with_cache(store: Arc<dyn BuildStore>, cache: SymbolCache, config: &AppConfig) -> Self {
        Self {
            store,
            cache,
            config: config.clone(),
        }
    }

    pub fn store(&self) -> &dyn BuildStore {
        self.store.as_ref()
    }

    pub fn cache(&self) -> &SymbolCache {
        &self.cache
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Every build matching all filters of the request
    pub fn find(&self, request: &FindRequest) -> Result<Vec<MatchResult>, QueryError> {
        let query = Query::from_find(request)?;
        self.run(&query)
    }

    /// Execute an already validated query
    pub fn run(&self, query: &Query) -> Result<Vec<MatchResult>, QueryError> {
        if log::log_enabled!(log::Level::Debug) {
            let terms: Vec<String> = query.predicates.iter().map(ToString::to_string).collect();
            debug!("query: {}", terms.join(" AND "));
        }
        let hits = self.store.query_conjunction(&query.predicates)?;
        Ok(hits
            .into_iter()
            .map(|record| self.resolve(record, &query.requested))
            .collect())
    }

    /// The build with `id`, with `symbols` resolved alongside the defaults
    pub fn dump(&self, id: &str, symbols: &[String]) -> Result<MatchResult, QueryError> {
        let request = FindRequest {
            extra_symbols: symbols.to_vec(),
            ..FindRequest::by_id(id)
        };
        if request.id.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(QueryError::NotFound(id.to_string()));
        }

        self.find(&request)?
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::NotFound(id.to_string()))
    }

    /// Attach digests, locators and the requested symbol addresses.
    /// Names the build does not export are left out.
    fn resolve(&self, record: BuildRecord, requested: &[String]) -> MatchResult {
        let mut symbols = BTreeMap::new();

        match self.cache.get(&record.id) {
            Ok(table) => {
                let names = self.config.default_symbols.iter().chain(requested);
                for name in names {
                    if let Some(address) = table.get(name) {
                        symbols.insert(name.clone(), format!("{:#x}", address));
                    }
                }
            }
            Err(e) => warn!("{}: cannot resolve symbols: {:#}", record.id, e),
        }

        MatchResult {
            download_url: self.config.download_url_for(&record.id),
            symbols_url: self.config.symbols_url_for(&record.id),
            id: record.id,
            buildid: record.buildid,
            sha1: record.digests.sha1,
            md5: record.digests.md5,
            sha256: record.digests.sha256,
            symbols,
        }
    }
}
