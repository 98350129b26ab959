use crate::config::TopPicksConfig;
use crate::providers::{Provider, ProviderError, QueryContext};
use crate::request::SuggestionRequest;
use crate::suggestion::{Suggestion, SuggestionPayload};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use synced_cache::{ParseError, RemoteStore, StoreError, SyncSettings, SyncedCache, get_store};

#[derive(Clone, Debug, Deserialize, PartialEq)]
struct DomainRecord {
    rank: u32,
    domain: String,
    title: String,
    url: String,
    #[serde(default)]
    similars: Vec<String>,
}

#[derive(Deserialize)]
struct DomainList {
    domains: Vec<DomainRecord>,
}

/// Parsed top picks dataset with a keyword index for prefix lookups.
#[derive(Debug)]
pub struct TopPicksIndex {
    records: Vec<DomainRecord>,
    // Lowercased domain names and their similars, pointing into `records`.
    keywords: BTreeMap<String, Vec<usize>>,
}

impl TopPicksIndex {
    pub fn parse(bytes: &[u8]) -> Result<TopPicksIndex, ParseError> {
        let list: DomainList = serde_json::from_slice(bytes).map_err(ParseError::new)?;

        let mut keywords: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, record) in list.domains.iter().enumerate() {
            for keyword in std::iter::once(&record.domain).chain(&record.similars) {
                let entry = keywords.entry(keyword.to_lowercase()).or_default();
                if !entry.contains(&i) {
                    entry.push(i);
                }
            }
        }

        Ok(TopPicksIndex {
            records: list.domains,
            keywords,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Best ranked domain with a keyword starting with `query`.
    fn lookup(&self, query: &str) -> Option<&DomainRecord> {
        self.keywords
            .range(query.to_string()..)
            .take_while(|(keyword, _)| keyword.starts_with(query))
            .flat_map(|(_, indexes)| indexes.iter().map(|i| &self.records[*i]))
            .min_by_key(|record| record.rank)
    }
}

fn normalize(query: &str) -> String {
    let query = query.trim().to_lowercase();
    match query.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => query,
    }
}

/// Suggests a well known domain for a typed prefix. The domain list is kept
/// in a synced cache and refreshed in the background.
pub struct TopPicksProvider {
    name: String,
    score: f64,
    query_char_limit: usize,
    cache: SyncedCache<TopPicksIndex>,
}

impl TopPicksProvider {
    pub fn new(
        name: &str,
        score: f64,
        query_char_limit: usize,
        store: Arc<dyn RemoteStore>,
        settings: SyncSettings,
    ) -> Self {
        TopPicksProvider {
            name: name.to_string(),
            score,
            query_char_limit,
            cache: SyncedCache::new(name, store, TopPicksIndex::parse, settings),
        }
    }

    pub fn from_config(name: &str, score: f64, config: &TopPicksConfig) -> Result<Self, StoreError> {
        let store = get_store(&config.sync.store)?;
        Ok(Self::new(
            name,
            score,
            config.query_char_limit,
            store,
            SyncSettings::from(&config.sync),
        ))
    }
}

#[async_trait]
impl Provider for TopPicksProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, request: &SuggestionRequest) -> Result<(), ProviderError> {
        let chars = normalize(request.query()).chars().count();
        if chars < self.query_char_limit {
            return Err(ProviderError::Validation(format!(
                "query shorter than {} characters",
                self.query_char_limit
            )));
        }
        Ok(())
    }

    async fn query(
        &self,
        request: &SuggestionRequest,
        _ctx: &QueryContext,
    ) -> Result<Vec<Suggestion>, ProviderError> {
        let snapshot = self.cache.get().ok_or(ProviderError::NotReady)?;

        let Some(record) = snapshot.data.lookup(&normalize(request.query())) else {
            return Ok(vec![]);
        };

        let suggestion = Suggestion::new(
            self.name.clone(),
            self.score,
            record.title.clone(),
            record.url.clone(),
            SuggestionPayload::TopPick {
                domain: record.domain.clone(),
                rank: record.rank,
            },
        )?;
        Ok(vec![suggestion])
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        self.cache.initialize().await?;
        if let Some(snapshot) = self.cache.get() {
            tracing::info!(
                provider = %self.name,
                domains = snapshot.data.len(),
                version = %snapshot.version,
                "top picks loaded"
            );
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.cache.shutdown().await;
    }

    fn is_ready(&self) -> bool {
        self.cache.is_ready()
    }
}
