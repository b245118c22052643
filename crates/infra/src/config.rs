//! Engine configuration loaded from the environment.

use std::time::Duration;

use forgebatch_core::{BatchError, BatchResult};
use forgebatch_jobs::Redirects;

pub const SLICE_BUDGET_VAR: &str = "BATCH_SLICE_BUDGET_MS";
pub const USE_PERSISTENT_STORES_VAR: &str = "USE_PERSISTENT_STORES";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const SUCCESS_REDIRECT_VAR: &str = "BATCH_DEFAULT_SUCCESS_REDIRECT";
pub const ERROR_REDIRECT_VAR: &str = "BATCH_DEFAULT_ERROR_REDIRECT";

const DEFAULT_SLICE_BUDGET: Duration = Duration::from_millis(1000);

/// Coordinator and wiring configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Wall-clock budget of one `process()` slice.
    pub slice_budget: Duration,
    /// Select Postgres stores instead of the in-memory ones.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    /// Applied to job specs that name no redirect of their own.
    pub default_redirects: Redirects,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slice_budget: DEFAULT_SLICE_BUDGET,
            use_persistent_stores: false,
            database_url: None,
            default_redirects: Redirects::default(),
        }
    }
}

impl EngineConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> BatchResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; unset or blank variables keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> BatchResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(raw) = get(SLICE_BUDGET_VAR) {
            let millis = raw.parse::<u64>().map_err(|_| {
                BatchError::validation(format!("{SLICE_BUDGET_VAR} must be a number of milliseconds, got '{raw}'"))
            })?;
            config.slice_budget = Duration::from_millis(millis);
        }

        if let Some(raw) = get(USE_PERSISTENT_STORES_VAR) {
            config.use_persistent_stores = raw.to_ascii_lowercase().parse::<bool>().map_err(|_| {
                BatchError::validation(format!("{USE_PERSISTENT_STORES_VAR} must be true or false, got '{raw}'"))
            })?;
        }

        config.database_url = get(DATABASE_URL_VAR);
        config.default_redirects = Redirects {
            success: get(SUCCESS_REDIRECT_VAR),
            error: get(ERROR_REDIRECT_VAR),
        };

        if config.use_persistent_stores && config.database_url.is_none() {
            return Err(BatchError::validation(format!(
                "{DATABASE_URL_VAR} must be set when {USE_PERSISTENT_STORES_VAR}=true"
            )));
        }

        Ok(config)
    }

    pub fn with_slice_budget(mut self, budget: Duration) -> Self {
        self.slice_budget = budget;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.use_persistent_stores = true;
        self.database_url = Some(url.into());
        self
    }

    pub fn with_default_redirects(mut self, redirects: Redirects) -> Self {
        self.default_redirects = redirects;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.slice_budget, Duration::from_millis(1000));
    }

    #[test]
    fn reads_every_variable() {
        let config = EngineConfig::from_lookup(lookup(&[
            (SLICE_BUDGET_VAR, "250"),
            (USE_PERSISTENT_STORES_VAR, "TRUE"),
            (DATABASE_URL_VAR, "postgres://localhost/batch"),
            (SUCCESS_REDIRECT_VAR, "/admin/done"),
            (ERROR_REDIRECT_VAR, " /admin/errors "),
        ]))
        .unwrap();

        assert_eq!(config.slice_budget, Duration::from_millis(250));
        assert!(config.use_persistent_stores);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/batch"));
        assert_eq!(config.default_redirects.success.as_deref(), Some("/admin/done"));
        assert_eq!(config.default_redirects.error.as_deref(), Some("/admin/errors"));
    }

    #[test]
    fn rejects_malformed_values() {
        let err = EngineConfig::from_lookup(lookup(&[(SLICE_BUDGET_VAR, "1s")])).unwrap_err();
        assert!(matches!(err, BatchError::Validation(_)));

        let err = EngineConfig::from_lookup(lookup(&[(USE_PERSISTENT_STORES_VAR, "yes")])).unwrap_err();
        assert!(matches!(err, BatchError::Validation(_)));
    }

    #[test]
    fn persistent_stores_require_database_url() {
        let err = EngineConfig::from_lookup(lookup(&[(USE_PERSISTENT_STORES_VAR, "true")])).unwrap_err();
        assert!(err.to_string().contains(DATABASE_URL_VAR));
    }
}
