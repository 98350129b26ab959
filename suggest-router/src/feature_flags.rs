use crate::config::{BucketingScheme, FlagConfig};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Outcome of evaluating one flag for one request.
#[derive(Clone, Debug, PartialEq)]
pub struct FlagDecision {
    pub flag: String,
    pub enabled: bool,
    pub scheme: BucketingScheme,
}

/// Static flag definitions, shared by all requests.
#[derive(Clone, Debug, Default)]
pub struct FeatureFlags {
    flags: HashMap<String, FlagConfig>,
}

impl FeatureFlags {
    pub fn new(flags: HashMap<String, FlagConfig>) -> Self {
        FeatureFlags { flags }
    }

    /// Starts a decision set for one request.
    pub fn for_request<'a>(&'a self, session_id: Option<&'a str>) -> RequestFlags<'a> {
        RequestFlags {
            flags: self,
            session_id,
            decisions: Mutex::new(IndexMap::new()),
        }
    }

    fn decide(&self, flag: &str, session_id: Option<&str>) -> Option<FlagDecision> {
        let config = self.flags.get(flag)?;
        let enabled = match config.scheme {
            BucketingScheme::Random => fraction_enabled(config.enabled, || {
                Some(rand::thread_rng().r#gen::<f64>())
            }),
            BucketingScheme::Session => fraction_enabled(config.enabled, || {
                session_id.map(|session| session_bucket(flag, session))
            }),
        };
        Some(FlagDecision {
            flag: flag.to_string(),
            enabled,
            scheme: config.scheme,
        })
    }
}

fn fraction_enabled(fraction: f64, bucket: impl FnOnce() -> Option<f64>) -> bool {
    if fraction >= 1.0 {
        return true;
    }
    if fraction <= 0.0 {
        return false;
    }
    bucket().is_some_and(|bucket| bucket < fraction)
}

/// Maps a session onto [0, 1] for a flag. The flag name is part of the hash
/// so that the same session lands in unrelated buckets for different flags.
pub fn session_bucket(flag: &str, session_id: &str) -> f64 {
    let digest = Sha256::digest(format!("{flag}:{session_id}").as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) as f64 / u64::MAX as f64
}

/// Flag decisions for a single request.
///
/// A flag is evaluated the first time it is checked and the outcome is
/// reused for the rest of the request.
pub struct RequestFlags<'a> {
    flags: &'a FeatureFlags,
    session_id: Option<&'a str>,
    decisions: Mutex<IndexMap<String, FlagDecision>>,
}

impl RequestFlags<'_> {
    /// Unknown flags are disabled and are not recorded.
    pub fn is_enabled(&self, flag: &str) -> bool {
        let mut decisions = self.decisions.lock();
        if let Some(decision) = decisions.get(flag) {
            return decision.enabled;
        }

        match self.flags.decide(flag, self.session_id) {
            Some(decision) => {
                let enabled = decision.enabled;
                decisions.insert(flag.to_string(), decision);
                enabled
            }
            None => {
                tracing::debug!(flag, "unknown feature flag, treating as disabled");
                false
            }
        }
    }

    /// Decisions made so far, in the order the flags were first checked.
    pub fn decisions(&self) -> Vec<FlagDecision> {
        self.decisions.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(entries: &[(&str, BucketingScheme, f64)]) -> FeatureFlags {
        FeatureFlags::new(
            entries
                .iter()
                .map(|(name, scheme, enabled)| {
                    (
                        name.to_string(),
                        FlagConfig {
                            scheme: *scheme,
                            enabled: *enabled,
                        },
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_random_flag_is_consistent_within_request() {
        let flags = flags(&[("coin", BucketingScheme::Random, 0.5)]);
        for _ in 0..50 {
            let request = flags.for_request(None);
            let first = request.is_enabled("coin");
            for _ in 0..10 {
                assert_eq!(request.is_enabled("coin"), first);
            }
            assert_eq!(request.decisions().len(), 1);
        }
    }

    #[test]
    fn test_random_flag_takes_both_values() {
        let flags = flags(&[("coin", BucketingScheme::Random, 0.5)]);
        let outcomes: Vec<bool> = (0..200)
            .map(|_| flags.for_request(None).is_enabled("coin"))
            .collect();
        assert!(outcomes.iter().any(|enabled| *enabled));
        assert!(outcomes.iter().any(|enabled| !*enabled));
    }

    #[test]
    fn test_session_flag_is_stable_across_requests() {
        let flags = flags(&[("rollout", BucketingScheme::Session, 0.5)]);
        for session in ["alpha", "beta", "gamma", "delta"] {
            let expected = session_bucket("rollout", session) < 0.5;
            for _ in 0..5 {
                assert_eq!(
                    flags.for_request(Some(session)).is_enabled("rollout"),
                    expected
                );
            }
        }
    }

    #[test]
    fn test_session_flag_without_session_is_disabled() {
        let flags = flags(&[("rollout", BucketingScheme::Session, 0.99)]);
        let request = flags.for_request(None);
        assert!(!request.is_enabled("rollout"));
        assert_eq!(
            request.decisions(),
            vec![FlagDecision {
                flag: "rollout".into(),
                enabled: false,
                scheme: BucketingScheme::Session,
            }]
        );
    }

    #[test]
    fn test_fraction_edges_and_unknown_flags() {
        let flags = flags(&[
            ("on", BucketingScheme::Random, 1.0),
            ("off", BucketingScheme::Session, 0.0),
        ]);
        let request = flags.for_request(Some("session"));
        assert!(request.is_enabled("on"));
        assert!(!request.is_enabled("off"));
        assert!(!request.is_enabled("missing"));

        let decided: Vec<String> = request.decisions().into_iter().map(|d| d.flag).collect();
        assert_eq!(decided, vec!["on".to_string(), "off".to_string()]);
    }

    #[test]
    fn test_session_bucket_range() {
        for session in 0..100 {
            let bucket = session_bucket("flag", &session.to_string());
            assert!((0.0..=1.0).contains(&bucket));
        }
        assert_ne!(session_bucket("a", "s"), session_bucket("b", "s"));
    }
}
