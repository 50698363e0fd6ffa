use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::sync::backoff::Backoff;
use crate::sync::enumerate::ListingOptions;
use crate::sync::scheduler::SchedulerConfig;
use crate::token_manager::Credential;

pub const DEFAULT_ENV_FILE: &str = ".dropbox-backup.env";
const DEFAULT_DESTINATION: &str = "./backup";
const DEFAULT_LOG_FILE: &str = "dropbox-backup.log";
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 50;
const DEFAULT_REQUEST_DELAY_SECS: f64 = 0.1;
const DEFAULT_LIST_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_LIST_RETRY_BASE_DELAY_SECS: f64 = 2.0;
const LIST_RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingVar(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupConfig {
    pub destination: PathBuf,
    pub temp_dir: PathBuf,
    /// Remote folder to mirror; `""` is the account root.
    pub root_path: String,
    pub max_concurrent_requests: usize,
    pub request_delay: Duration,
    pub list_page_limit: Option<u32>,
    pub list_retry_attempts: u32,
    pub list_retry_base_delay: Duration,
    pub log_file: PathBuf,
}

impl BackupConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok(), dirs::home_dir().as_deref())
    }

    /// Builds the config from `lookup`; `home` is used for `~` expansion.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, home: Option<&Path>) -> Self {
        let path_var = |name: &str, default: PathBuf| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .map(|value| expand_with_home(value.trim(), home))
                .unwrap_or(default)
        };

        let destination = path_var("DESTINATION", PathBuf::from(DEFAULT_DESTINATION));
        let temp_dir = path_var("TEMP_DIR", default_temp_dir());
        let log_file = path_var("LOG_FILE", PathBuf::from(DEFAULT_LOG_FILE));
        let root_path = lookup("ROOT_PATH").unwrap_or_default().trim().to_string();

        Self {
            destination,
            temp_dir,
            root_path,
            max_concurrent_requests: read_positive(
                &lookup,
                "MAX_CONCURRENT_REQUESTS",
                DEFAULT_MAX_CONCURRENT_REQUESTS,
            ),
            request_delay: read_seconds(&lookup, "REQUEST_DELAY", DEFAULT_REQUEST_DELAY_SECS),
            list_page_limit: lookup("LIST_PAGE_LIMIT")
                .and_then(|value| value.trim().parse::<u32>().ok())
                .filter(|value| *value > 0),
            list_retry_attempts: read_positive(
                &lookup,
                "LIST_RETRY_ATTEMPTS",
                DEFAULT_LIST_RETRY_ATTEMPTS,
            ),
            list_retry_base_delay: read_seconds(
                &lookup,
                "LIST_RETRY_BASE_DELAY",
                DEFAULT_LIST_RETRY_BASE_DELAY_SECS,
            ),
            log_file,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_requests: self.max_concurrent_requests,
            request_delay: self.request_delay,
        }
    }

    pub fn listing_options(&self) -> ListingOptions {
        ListingOptions {
            page_limit: self.list_page_limit,
            retry_attempts: self.list_retry_attempts,
            backoff: Backoff::new(self.list_retry_base_delay, LIST_RETRY_MAX_DELAY, true),
        }
    }
}

pub fn credential_from_env() -> Result<Credential, ConfigError> {
    credential_from_lookup(|name| std::env::var(name).ok())
}

/// Reads the app credentials. `ACCESS_TOKEN` may be absent; the first
/// `ensure_valid` then refreshes.
pub fn credential_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Credential, ConfigError> {
    let required = |name: &'static str| {
        lookup(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingVar(name))
    };
    Ok(Credential {
        client_id: required("CLIENT_ID")?,
        client_secret: required("CLIENT_SECRET")?,
        refresh_token: required("REFRESH_TOKEN")?,
        access_token: lookup("ACCESS_TOKEN")
            .map(|value| value.trim().to_string())
            .unwrap_or_default(),
    })
}

fn expand_with_home(value: &str, home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) if value == "~" => home.to_path_buf(),
        Some(home) => match value.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(value),
        },
        None => PathBuf::from(value),
    }
}

fn default_temp_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dropbox-backup")
        .join("tmp")
}

fn read_positive<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
        .unwrap_or(default)
}

fn read_seconds(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: f64) -> Duration {
    let secs = lookup(name)
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .unwrap_or(default);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = BackupConfig::from_lookup(lookup_from(&[]), None);

        assert_eq!(config.destination, PathBuf::from("./backup"));
        assert_eq!(config.root_path, "");
        assert_eq!(config.max_concurrent_requests, 50);
        assert_eq!(config.request_delay, Duration::from_millis(100));
        assert_eq!(config.list_page_limit, None);
        assert_eq!(config.list_retry_attempts, 3);
        assert_eq!(config.list_retry_base_delay, Duration::from_secs(2));
        assert_eq!(config.log_file, PathBuf::from("dropbox-backup.log"));
        assert!(config.temp_dir.ends_with("dropbox-backup/tmp"));
    }

    #[test]
    fn overrides_are_read() {
        let config = BackupConfig::from_lookup(
            lookup_from(&[
                ("DESTINATION", "~/Dropbox"),
                ("TEMP_DIR", "/var/tmp/dbx"),
                ("ROOT_PATH", "/Photos"),
                ("MAX_CONCURRENT_REQUESTS", "8"),
                ("REQUEST_DELAY", "0"),
                ("LIST_PAGE_LIMIT", "500"),
                ("LIST_RETRY_ATTEMPTS", "5"),
                ("LIST_RETRY_BASE_DELAY", "0.5"),
            ]),
            Some(Path::new("/home/user")),
        );

        assert_eq!(config.destination, PathBuf::from("/home/user/Dropbox"));
        assert_eq!(config.temp_dir, PathBuf::from("/var/tmp/dbx"));
        assert_eq!(config.root_path, "/Photos");
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.request_delay, Duration::ZERO);
        assert_eq!(config.list_page_limit, Some(500));
        assert_eq!(config.list_retry_attempts, 5);
        assert_eq!(config.list_retry_base_delay, Duration::from_millis(500));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = BackupConfig::from_lookup(
            lookup_from(&[
                ("MAX_CONCURRENT_REQUESTS", "0"),
                ("REQUEST_DELAY", "-1"),
                ("LIST_PAGE_LIMIT", "lots"),
                ("LIST_RETRY_ATTEMPTS", "three"),
                ("LIST_RETRY_BASE_DELAY", "NaN"),
            ]),
            None,
        );

        assert_eq!(config.max_concurrent_requests, 50);
        assert_eq!(config.request_delay, Duration::from_millis(100));
        assert_eq!(config.list_page_limit, None);
        assert_eq!(config.list_retry_attempts, 3);
        assert_eq!(config.list_retry_base_delay, Duration::from_secs(2));
    }

    #[test]
    fn tilde_is_kept_without_home() {
        assert_eq!(expand_with_home("~/x", None), PathBuf::from("~/x"));
        assert_eq!(
            expand_with_home("~", Some(Path::new("/home/u"))),
            PathBuf::from("/home/u")
        );
    }

    #[test]
    fn scheduler_and_listing_settings_are_derived() {
        let config = BackupConfig::from_lookup(
            lookup_from(&[("MAX_CONCURRENT_REQUESTS", "3"), ("LIST_PAGE_LIMIT", "10")]),
            None,
        );

        assert_eq!(config.scheduler_config().max_concurrent_requests, 3);
        let listing = config.listing_options();
        assert_eq!(listing.page_limit, Some(10));
        assert_eq!(listing.retry_attempts, 3);
    }

    #[test]
    fn credential_requires_app_keys_and_refresh_token() {
        let err = credential_from_lookup(lookup_from(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingVar("REFRESH_TOKEN"));

        let err = credential_from_lookup(lookup_from(&[
            ("CLIENT_ID", "  "),
            ("CLIENT_SECRET", "secret"),
            ("REFRESH_TOKEN", "r"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingVar("CLIENT_ID"));
    }

    #[test]
    fn access_token_is_optional() {
        let credential = credential_from_lookup(lookup_from(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
            ("REFRESH_TOKEN", "r"),
        ]))
        .unwrap();

        assert_eq!(credential.access_token, "");
        assert_eq!(credential.refresh_token, "r");
    }
}
