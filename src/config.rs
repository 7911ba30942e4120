//! Runtime settings from `TRIAGE_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::db::Database;
use crate::store::{NotificationTransport, StoreOptions};

pub const DEFAULT_SUBJECT_PREFIX: &str = "[JARVIS]-";
pub const DEFAULT_BUCKET_TEMPLATE: &str = "jarvis-{project_slug}";
pub const DEFAULT_JOURNAL_BUCKET: &str = "triage-runs";
pub const DEFAULT_QUEUE_ARN: &str = "arn:minio:sqs::WEBHOOK:webhook";
pub const DEFAULT_SYNTHESIS_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("TRIAGE_BUCKET_TEMPLATE must contain {{project_slug}}, got {0:?}")]
    BucketTemplate(String),

    #[error("TRIAGE_NOTIFICATION_WEBHOOK_URL must be an http(s) URL, got {0:?}")]
    WebhookUrl(String),

    #[error("could not determine a data directory for the database")]
    NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub inbox_dir: PathBuf,
    /// Where acknowledgements are queued; `None` disables replies.
    pub outbox_dir: Option<PathBuf>,
    pub subject_prefix: String,
    pub bucket_template: String,
    pub journal_bucket: String,
    pub notification_webhook_url: Option<String>,
    pub notification_queue_arn: String,
    pub synthesis_url: Option<String>,
    pub synthesis_api_key: Option<String>,
    pub synthesis_model: String,
    /// Bound on every store, mailbox and synthesis call.
    pub call_timeout: Duration,
    pub max_concurrent_projects: usize,
    pub lease_ttl: Duration,
    pub api_key: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let db_path = match get("TRIAGE_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => Database::default_path().map_err(|_| ConfigError::NoDataDir)?,
        };

        let settings = Self {
            db_path,
            inbox_dir: get("TRIAGE_INBOX_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./inbox")),
            outbox_dir: get("TRIAGE_OUTBOX_DIR").map(PathBuf::from),
            subject_prefix: get("TRIAGE_SUBJECT_PREFIX")
                .unwrap_or_else(|| DEFAULT_SUBJECT_PREFIX.to_string()),
            bucket_template: get("TRIAGE_BUCKET_TEMPLATE")
                .unwrap_or_else(|| DEFAULT_BUCKET_TEMPLATE.to_string()),
            journal_bucket: get("TRIAGE_JOURNAL_BUCKET")
                .unwrap_or_else(|| DEFAULT_JOURNAL_BUCKET.to_string()),
            notification_webhook_url: get("TRIAGE_NOTIFICATION_WEBHOOK_URL"),
            notification_queue_arn: get("TRIAGE_NOTIFICATION_QUEUE_ARN")
                .unwrap_or_else(|| DEFAULT_QUEUE_ARN.to_string()),
            synthesis_url: get("TRIAGE_SYNTHESIS_URL"),
            synthesis_api_key: get("TRIAGE_SYNTHESIS_API_KEY"),
            synthesis_model: get("TRIAGE_SYNTHESIS_MODEL")
                .unwrap_or_else(|| DEFAULT_SYNTHESIS_MODEL.to_string()),
            call_timeout: Duration::from_secs(number(&get, "TRIAGE_CALL_TIMEOUT_SECS", 120)?),
            max_concurrent_projects: number(&get, "TRIAGE_MAX_CONCURRENT_PROJECTS", 4)? as usize,
            lease_ttl: Duration::from_secs(number(&get, "TRIAGE_LEASE_TTL_SECS", 900)?),
            api_key: get("TRIAGE_API_KEY"),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout.is_zero() {
            return Err(ConfigError::Zero("TRIAGE_CALL_TIMEOUT_SECS"));
        }
        if self.max_concurrent_projects == 0 {
            return Err(ConfigError::Zero("TRIAGE_MAX_CONCURRENT_PROJECTS"));
        }
        if self.lease_ttl.is_zero() {
            return Err(ConfigError::Zero("TRIAGE_LEASE_TTL_SECS"));
        }
        if !self.bucket_template.contains("{project_slug}") {
            return Err(ConfigError::BucketTemplate(self.bucket_template.clone()));
        }
        if let Some(url) = &self.notification_webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::WebhookUrl(url.clone()));
            }
        }
        Ok(())
    }

    pub fn notification_transport(&self) -> NotificationTransport {
        match &self.notification_webhook_url {
            Some(url) => NotificationTransport::Webhook {
                url: url.clone(),
                queue_arn: self.notification_queue_arn.clone(),
            },
            None => NotificationTransport::Poll,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            bucket_template: self.bucket_template.clone(),
            notification: self.notification_transport(),
            call_timeout: self.call_timeout,
        }
    }
}

fn number<G>(get: &G, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            name,
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let mut map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.entry("TRIAGE_DB_PATH".to_string())
            .or_insert_with(|| "/tmp/triage-test.db".to_string());
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.subject_prefix, "[JARVIS]-");
        assert_eq!(s.bucket_template, "jarvis-{project_slug}");
        assert_eq!(s.journal_bucket, "triage-runs");
        assert_eq!(s.call_timeout, Duration::from_secs(120));
        assert_eq!(s.max_concurrent_projects, 4);
        assert_eq!(s.lease_ttl, Duration::from_secs(900));
        assert_eq!(s.notification_transport(), NotificationTransport::Poll);
        assert!(s.synthesis_url.is_none());
        assert!(s.outbox_dir.is_none());
    }

    #[test]
    fn test_outbox_enables_replies() {
        let s = settings(&[("TRIAGE_OUTBOX_DIR", "/var/spool/triage/outbox")]).unwrap();
        assert_eq!(s.outbox_dir, Some(PathBuf::from("/var/spool/triage/outbox")));
    }

    #[test]
    fn test_webhook_transport() {
        let s = settings(&[("TRIAGE_NOTIFICATION_WEBHOOK_URL", "http://hooks.local/epic")]).unwrap();
        assert_eq!(
            s.notification_transport(),
            NotificationTransport::Webhook {
                url: "http://hooks.local/epic".to_string(),
                queue_arn: DEFAULT_QUEUE_ARN.to_string(),
            }
        );
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert_eq!(
            settings(&[("TRIAGE_MAX_CONCURRENT_PROJECTS", "0")]),
            Err(ConfigError::Zero("TRIAGE_MAX_CONCURRENT_PROJECTS"))
        );
        assert!(matches!(
            settings(&[("TRIAGE_CALL_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            settings(&[("TRIAGE_BUCKET_TEMPLATE", "jarvis")]),
            Err(ConfigError::BucketTemplate(_))
        ));
        assert!(matches!(
            settings(&[("TRIAGE_NOTIFICATION_WEBHOOK_URL", "hooks.local")]),
            Err(ConfigError::WebhookUrl(_))
        ));
    }

    #[test]
    fn test_blank_values_count_as_unset() {
        let s = settings(&[("TRIAGE_SYNTHESIS_URL", "  "), ("TRIAGE_SUBJECT_PREFIX", "")]).unwrap();
        assert!(s.synthesis_url.is_none());
        assert_eq!(s.subject_prefix, DEFAULT_SUBJECT_PREFIX);
    }
}
