use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Coarse geolocation of the client, as resolved by the edge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Location {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.region.is_none() && self.city.is_none()
    }
}

/// One inbound suggest call. Built once, then shared read-only with every
/// provider queried for it.
#[derive(Clone, Debug)]
pub struct SuggestionRequest {
    query: String,
    location: Option<Location>,
    languages: Vec<String>,
    providers: Option<Vec<String>>,
    correlation_id: String,
    request_id: Option<String>,
    session_id: Option<String>,
    client_variants: Vec<String>,
    limit: Option<usize>,
    received_at: Instant,
    deadline: Option<Instant>,
}

fn new_correlation_id() -> String {
    format!("{:016x}", rand::thread_rng().r#gen::<u64>())
}

impl SuggestionRequest {
    pub fn new(query: impl Into<String>) -> Self {
        SuggestionRequest {
            query: query.into(),
            location: None,
            languages: Vec::new(),
            providers: None,
            correlation_id: new_correlation_id(),
            request_id: None,
            session_id: None,
            client_variants: Vec::new(),
            limit: None,
            received_at: Instant::now(),
            deadline: None,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = (!location.is_empty()).then_some(location);
        self
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    /// Restricts the request to the named providers.
    pub fn with_providers(mut self, providers: Vec<String>) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_client_variants(mut self, client_variants: Vec<String>) -> Self {
        self.client_variants = client_variants;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets an explicit deadline relative to when the request was received.
    /// Without it the orchestrator's global timeout applies.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(self.received_at + timeout);
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn providers(&self) -> Option<&[String]> {
        self.providers.as_deref()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn client_variants(&self) -> &[String] {
        &self.client_variants
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
