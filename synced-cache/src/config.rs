use crate::cache::SyncSettings;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum RemoteStoreConfig {
    Filesystem {
        base_dir: String,
    },
    Http {
        base_url: Url,
        #[serde(default = "default_request_timeout_secs")]
        request_timeout_secs: u64,
    },
}

/// Where a cache finds its object and how often it checks for a new revision.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct SyncConfig {
    pub store: RemoteStoreConfig,
    pub key: String,
    pub cron_interval_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        SyncSettings {
            key: config.key.clone(),
            cron_interval: Duration::from_secs(config.cron_interval_secs),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filesystem_sync_config() {
        let yaml = r#"
            store:
                type: filesystem
                base_dir: /var/lib/suggest/
            key: top_picks.json
            cron_interval_secs: 60
        "#;
        let config: SyncConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.store,
            RemoteStoreConfig::Filesystem {
                base_dir: "/var/lib/suggest/".into()
            }
        );
        assert_eq!(config.shutdown_grace_secs, 5);

        let settings = SyncSettings::from(&config);
        assert_eq!(settings.key, "top_picks.json");
        assert_eq!(settings.cron_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_http_store_config() {
        let config: RemoteStoreConfig = serde_yaml::from_str(
            r#"
            type: http
            base_url: "https://storage.example.com/suggest/"
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            RemoteStoreConfig::Http {
                base_url: Url::parse("https://storage.example.com/suggest/").unwrap(),
                request_timeout_secs: 10,
            }
        );

        assert!(serde_yaml::from_str::<RemoteStoreConfig>("type: gcs").is_err());
        assert!(
            serde_yaml::from_str::<RemoteStoreConfig>("{type: http, base_url: not-a-url}").is_err()
        );
    }
}
