use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("score {0} is outside [0, 1]")]
pub struct InvalidScore(pub f64);

/// Provider specific part of a suggestion. One variant per provider kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuggestionPayload {
    TopPick {
        domain: String,
        rank: u32,
    },
    Remote {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

/// A single ranked result. The score is checked when the suggestion is
/// built, so a constructed suggestion always has `0.0 <= score <= 1.0`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Suggestion {
    provider: String,
    score: f64,
    title: String,
    url: String,
    #[serde(flatten)]
    payload: SuggestionPayload,
}

impl Suggestion {
    pub fn new(
        provider: impl Into<String>,
        score: f64,
        title: impl Into<String>,
        url: impl Into<String>,
        payload: SuggestionPayload,
    ) -> Result<Self, InvalidScore> {
        // NaN fails the range check as well
        if !(0.0..=1.0).contains(&score) {
            return Err(InvalidScore(score));
        }
        Ok(Suggestion {
            provider: provider.into(),
            score,
            title: title.into(),
            url: url.into(),
            payload,
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn payload(&self) -> &SuggestionPayload {
        &self.payload
    }

    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.score)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SuggestResponse {
    pub suggestions: Vec<Suggestion>,
    pub request_id: Option<String>,
    pub client_variants: Vec<String>,
    pub server_variants: Vec<String>,
}
