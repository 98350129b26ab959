use crate::backend::HttpBackend;
use crate::config::{ProviderConfig, ProviderKind};
use crate::errors::SuggestRouterError;
use crate::providers::Provider;
use crate::providers::remote::RemoteProvider;
use crate::providers::top_picks::TopPicksProvider;
use indexmap::IndexMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const BACKEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Static metadata of a registered provider.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderRegistration {
    pub name: String,
    pub enabled_by_default: bool,
    /// Overrides the global deadline for this provider when set.
    pub timeout: Option<Duration>,
    pub score: f64,
    pub flag: Option<String>,
    /// Position in registration order. Breaks ranking ties.
    pub index: usize,
}

impl ProviderRegistration {
    fn from_config(config: &ProviderConfig) -> Self {
        ProviderRegistration {
            name: config.name.clone(),
            enabled_by_default: config.enabled_by_default,
            timeout: config.timeout(),
            score: config.score,
            flag: config.flag.clone(),
            index: 0,
        }
    }
}

pub struct RegisteredProvider {
    pub registration: ProviderRegistration,
    pub provider: Arc<dyn Provider>,
}

/// All providers known to the router, in registration order.
///
/// Built once at startup and shared read-only by every request.
pub struct Registry {
    providers: IndexMap<String, RegisteredProvider>,
    initialized: AtomicBool,
}

impl Registry {
    /// Registration indexes are assigned from the order of `entries`.
    pub fn new(entries: Vec<RegisteredProvider>) -> Self {
        let providers = entries
            .into_iter()
            .enumerate()
            .map(|(index, mut entry)| {
                entry.registration.index = index;
                (entry.registration.name.clone(), entry)
            })
            .collect();

        Registry {
            providers,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn from_config(configs: &[ProviderConfig]) -> Result<Self, SuggestRouterError> {
        let mut entries = Vec::with_capacity(configs.len());

        for config in configs {
            let provider: Arc<dyn Provider> = match &config.kind {
                ProviderKind::TopPicks(top_picks) => Arc::new(
                    TopPicksProvider::from_config(&config.name, config.score, top_picks).map_err(
                        |e| SuggestRouterError::ProviderSetup {
                            provider: config.name.clone(),
                            reason: e.to_string(),
                        },
                    )?,
                ),
                ProviderKind::Remote(remote) => {
                    let backend = HttpBackend::new(remote.url.clone(), BACKEND_CONNECT_TIMEOUT)
                        .map_err(|e| SuggestRouterError::ProviderSetup {
                            provider: config.name.clone(),
                            reason: e.to_string(),
                        })?;
                    Arc::new(RemoteProvider::new(
                        &config.name,
                        config.score,
                        remote,
                        Arc::new(backend),
                    ))
                }
            };

            entries.push(RegisteredProvider {
                registration: ProviderRegistration::from_config(config),
                provider,
            });
        }

        Ok(Registry::new(entries))
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredProvider> {
        self.providers.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProvider> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Initializes every provider. A provider that fails to initialize stays
    /// registered; it answers with no suggestions until it recovers.
    pub async fn initialize_all(&self) {
        for entry in self.providers.values() {
            let name = &entry.registration.name;
            match entry.provider.initialize().await {
                Ok(()) => tracing::info!(provider = %name, "provider initialized"),
                Err(e) => tracing::error!(
                    provider = %name,
                    error = %e,
                    "provider failed to initialize, continuing without it"
                ),
            }
        }
        self.initialized.store(true, Ordering::Release);
    }

    /// True once initialization ran and every provider reports ready.
    pub fn is_ready(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
            && self.providers.values().all(|entry| entry.provider.is_ready())
    }

    pub async fn shutdown_all(&self) {
        for entry in self.providers.values() {
            entry.provider.shutdown().await;
            tracing::info!(provider = %entry.registration.name, "provider shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::FakeProvider;

    fn registration(name: &str) -> ProviderRegistration {
        ProviderRegistration {
            name: name.to_string(),
            enabled_by_default: true,
            timeout: None,
            score: 0.5,
            flag: None,
            index: usize::MAX,
        }
    }

    #[test]
    fn test_indexes_follow_registration_order() {
        let registry = Registry::new(vec![
            RegisteredProvider {
                registration: registration("b"),
                provider: FakeProvider::responding("b", &[]),
            },
            RegisteredProvider {
                registration: registration("a"),
                provider: FakeProvider::responding("a", &[]),
            },
        ]);

        let names: Vec<(&str, usize)> = registry
            .iter()
            .map(|e| (e.registration.name.as_str(), e.registration.index))
            .collect();
        assert_eq!(names, vec![("b", 0), ("a", 1)]);
        assert_eq!(registry.get("a").unwrap().registration.index, 1);
        assert!(registry.get("c").is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_and_readiness() {
        let a = FakeProvider::responding("a", &[]);
        let b = FakeProvider::responding("b", &[]);
        let registry = Registry::new(vec![
            RegisteredProvider {
                registration: registration("a"),
                provider: a.clone(),
            },
            RegisteredProvider {
                registration: registration("b"),
                provider: b.clone(),
            },
        ]);

        assert!(!registry.is_ready());
        registry.initialize_all().await;
        assert!(a.initialized.load(Ordering::SeqCst));
        assert!(registry.is_ready());

        b.set_ready(false);
        assert!(!registry.is_ready());

        registry.shutdown_all().await;
        assert!(a.shut_down.load(Ordering::SeqCst));
        assert!(b.shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            r#"
- name: top_picks
  type: top_picks
  score: 0.25
  sync:
      store:
          type: filesystem
          base_dir: "{}"
      key: top_picks.json
      cron_interval_secs: 60
- name: remote
  type: remote
  score: 0.3
  timeout_ms: 800
  url: "http://127.0.0.1:1/suggest"
"#,
            dir.path().display()
        );
        let configs: Vec<ProviderConfig> = serde_yaml::from_str(&yaml).unwrap();
        let registry = Registry::from_config(&configs).unwrap();

        assert_eq!(registry.len(), 2);
        let remote = registry.get("remote").unwrap();
        assert_eq!(remote.registration.index, 1);
        assert_eq!(remote.registration.timeout, Some(Duration::from_millis(800)));
        assert_eq!(remote.provider.name(), "remote");

        // The dataset is missing, so the top picks provider is not ready
        registry.initialize_all().await;
        assert!(!registry.is_ready());
        registry.shutdown_all().await;
    }
}
