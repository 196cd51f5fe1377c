//! Restarter configuration file
//!
//! The file is YAML. Durations are human readable (`168h`, `1h30m`, `90s`).
//!
//! ```yaml
//! restartInterval: 168h
//! reconciliationInterval: 5m
//! exclude:
//!   enabled: true
//!   selectors:
//!     - namespace: kube-system
//! ```
//!
//! Files written for the older flat schema (`excludeNamespaces`,
//! `includeAnnotation`, `excludeAnnotation`) are still accepted and are
//! converted into include/exclude matchers when loaded.

use crate::error::ConfigError;
use crate::selection::{Matcher, Selector};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default time between two reconciliation cycles
pub const DEFAULT_RECONCILIATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default bound on a single call to the cluster API
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Loaded configuration, immutable for the lifetime of the process
#[derive(Debug, Clone, PartialEq)]
pub struct RestarterConfig {
    /// Minimum age of the last restart before a workload is restarted again
    pub restart_interval: Duration,
    /// Time between two reconciliation cycles
    pub reconciliation_interval: Duration,
    /// Upper bound on each list/update call
    pub api_timeout: Duration,
    pub include: Matcher,
    pub exclude: Matcher,
}

impl RestarterConfig {
    pub fn new(restart_interval: Duration) -> Self {
        Self {
            restart_interval,
            reconciliation_interval: DEFAULT_RECONCILIATION_INTERVAL,
            api_timeout: DEFAULT_API_TIMEOUT,
            include: Matcher::disabled(),
            exclude: Matcher::disabled(),
        }
    }

    /// Read and parse the configuration file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(path, &content)
    }

    /// Parse configuration text. `path` is only used in error messages.
    pub fn from_yaml(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let restart_interval =
            file.restart_interval
                .ok_or_else(|| ConfigError::MissingRestartInterval {
                    path: path.to_path_buf(),
                })?;

        let legacy = file.legacy.fields_set();
        let (include, exclude) = if legacy.is_empty() {
            (
                file.include.unwrap_or_default(),
                file.exclude.unwrap_or_default(),
            )
        } else if file.include.is_some() || file.exclude.is_some() {
            return Err(ConfigError::MixedSchema {
                path: path.to_path_buf(),
                legacy: legacy.join(", "),
            });
        } else {
            file.legacy.into_matchers()
        };

        Ok(Self {
            restart_interval,
            reconciliation_interval: file
                .reconciliation_interval
                .unwrap_or(DEFAULT_RECONCILIATION_INTERVAL),
            api_timeout: file.api_timeout.unwrap_or(DEFAULT_API_TIMEOUT),
            include,
            exclude,
        })
    }
}

/// On-disk layout covering both the current and the legacy fields
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default, with = "humantime_serde")]
    restart_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde", alias = "reconcilationInterval")]
    reconciliation_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    api_timeout: Option<Duration>,
    #[serde(default)]
    include: Option<Matcher>,
    #[serde(default)]
    exclude: Option<Matcher>,
    #[serde(flatten)]
    legacy: LegacyFilters,
}

/// Flat filters from the first configuration schema
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyFilters {
    #[serde(default)]
    pub exclude_namespaces: Option<Vec<String>>,
    #[serde(default)]
    pub include_annotation: Option<String>,
    #[serde(default)]
    pub exclude_annotation: Option<String>,
}

impl LegacyFilters {
    fn fields_set(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.exclude_namespaces.is_some() {
            fields.push("excludeNamespaces");
        }
        if self.include_annotation.is_some() {
            fields.push("includeAnnotation");
        }
        if self.exclude_annotation.is_some() {
            fields.push("excludeAnnotation");
        }
        fields
    }

    /// Express the legacy filters as `(include, exclude)` matchers.
    ///
    /// A workload is excluded by the result exactly when it lives in an
    /// excluded namespace, carries the exclude annotation, or lacks a
    /// configured include annotation.
    pub fn into_matchers(self) -> (Matcher, Matcher) {
        let mut exclude_selectors: Vec<Selector> = self
            .exclude_namespaces
            .unwrap_or_default()
            .into_iter()
            .map(Selector::namespace)
            .collect();

        if let Some(annotation) = self.exclude_annotation.filter(|a| !a.is_empty()) {
            exclude_selectors.push(Selector::annotation(annotation));
        }

        let exclude = if exclude_selectors.is_empty() {
            Matcher::disabled()
        } else {
            Matcher::new(exclude_selectors)
        };

        let include = match self.include_annotation.filter(|a| !a.is_empty()) {
            Some(annotation) => Matcher::new(vec![Selector::annotation(annotation)]),
            None => Matcher::disabled(),
        };

        (include, exclude)
    }
}
