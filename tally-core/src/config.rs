use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use tally_analytics::AnalyticsConfig;
use tally_notify::WebhookConfig;
use tally_source::{RetryPolicy, DEFAULT_USER_AGENT};
use tally_store::{FileLedger, Ledger, SheetsLedger, DEFAULT_API_BASE};
use tally_types::{LayoutError, LedgerLayout};
use thiserror::Error;

pub const WEBHOOK_URL_ENV: &str = "TALLY_WEBHOOK_URL";
pub const DEFAULT_TOKEN_ENV: &str = "TALLY_SHEETS_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {message}")]
    Read { path: String, message: String },
    #[error("parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error("invalid layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("collaborator setup: {0}")]
    Setup(String),
}

/// Process-wide settings, loaded once and shared read-only.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    pub source: SourceConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub layout: LedgerLayout,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub alert: Option<WebhookConfig>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Page URL prefix; the entity key is appended as the last path segment.
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum LedgerConfig {
    Sheets {
        spreadsheet_id: String,
        worksheet: String,
        #[serde(default = "default_api_base")]
        api_base: String,
        /// Name of the variable holding a pre-issued bearer token.
        #[serde(default = "default_token_env")]
        token_env: String,
        #[serde(default = "default_request_timeout")]
        request_timeout_secs: u64,
    },
    File {
        path: PathBuf,
    },
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Flat pause between consecutive entity fetches.
    pub pacing_secs: f64,
    pub retry_delay_secs: f64,
    pub retry_ceiling_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            pacing_secs: 1.0,
            retry_delay_secs: 2.0,
            retry_ceiling_secs: 120.0,
        }
    }
}

impl TimingConfig {
    pub fn pacing(&self) -> Duration {
        secs(self.pacing_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: secs(self.retry_delay_secs),
            ceiling: secs(self.retry_ceiling_secs),
        }
    }
}

/// Only meaningful for values that passed `validate`.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

fn default_date_format() -> String {
    "%Y-%m-%d".into()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.into()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.into()
}

impl TrackerConfig {
    /// Load, apply environment overrides and validate.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut cfg = Self::from_yaml_str(&text)?;
        cfg.apply_env(|name| std::env::var(name).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// `TALLY_WEBHOOK_URL` replaces (or supplies) the webhook URL.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(WEBHOOK_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.alert.get_or_insert_with(WebhookConfig::default).url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.source.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "source.base_url must be an http(s) URL, got `{base}`"
            )));
        }
        if self.source.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("source.request_timeout_secs must be positive".into()));
        }

        match &self.ledger {
            LedgerConfig::Sheets {
                spreadsheet_id,
                worksheet,
                request_timeout_secs,
                ..
            } => {
                if *request_timeout_secs == 0 {
                    return Err(ConfigError::Invalid(
                        "ledger.request_timeout_secs must be positive".into(),
                    ));
                }
                if spreadsheet_id.trim().is_empty() {
                    return Err(ConfigError::Invalid("ledger.spreadsheet_id is required".into()));
                }
                if worksheet.trim().is_empty() {
                    return Err(ConfigError::Invalid("ledger.worksheet is required".into()));
                }
            }
            LedgerConfig::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid("ledger.path is required".into()));
                }
            }
        }

        self.layout.validate()?;

        for (name, value, allow_zero) in [
            ("timing.pacing_secs", self.timing.pacing_secs, true),
            ("timing.retry_delay_secs", self.timing.retry_delay_secs, false),
            ("timing.retry_ceiling_secs", self.timing.retry_ceiling_secs, true),
        ] {
            let converted = Duration::try_from_secs_f64(value).ok();
            if !converted.is_some_and(|d| allow_zero || !d.is_zero()) {
                return Err(ConfigError::Invalid(format!("{name} is out of range: {value}")));
            }
        }

        if self.analytics.top_n == 0 {
            return Err(ConfigError::Invalid("analytics.top_n must be at least 1".into()));
        }
        let threshold = self.analytics.alert_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "analytics.alert_threshold is out of range: {threshold}"
            )));
        }

        if self.date_format.trim().is_empty()
            || StrftimeItems::new(&self.date_format).any(|item| matches!(item, Item::Error))
        {
            return Err(ConfigError::Invalid(format!(
                "date_format `{}` is not a valid strftime pattern",
                self.date_format
            )));
        }
        Ok(())
    }
}

/// Open the configured ledger backend. Secrets are read through `lookup`.
pub fn open_ledger(
    config: &LedgerConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn Ledger>, ConfigError> {
    match config {
        LedgerConfig::Sheets {
            spreadsheet_id,
            worksheet,
            api_base,
            token_env,
            request_timeout_secs,
        } => {
            let token = lookup(token_env)
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnv(token_env.clone()))?;
            let ledger = SheetsLedger::new(
                api_base.clone(),
                spreadsheet_id.clone(),
                worksheet.clone(),
                token,
                Duration::from_secs(*request_timeout_secs),
            )
            .map_err(|e| ConfigError::Setup(e.to_string()))?;
            Ok(Arc::new(ledger))
        }
        LedgerConfig::File { path } => Ok(Arc::new(FileLedger::new(path))),
    }
}
