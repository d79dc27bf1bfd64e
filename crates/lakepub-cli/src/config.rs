//! Configuration loading from TOML files and the environment

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use lakepub_core::HttpSettings;
use lakepub_export::{DateBasis, ExportConfig, Status};
use serde::Deserialize;

/// Global configuration for lakepub
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub export: ExportSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub records_path: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub credential: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let http = HttpSettings::default();
        Self {
            base_url: "http://localhost:3000".to_string(),
            records_path: "records".to_string(),
            credential: None,
            connect_timeout_secs: http.connect_timeout.as_secs(),
            request_timeout_secs: http.request_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    pub target_status: String,
    pub output_base_path: PathBuf,
    /// `utc` or `local`
    pub date_basis: String,
    pub zstd_level: i32,
    pub reconcile_workers: usize,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            target_status: Status::Approved.to_string(),
            output_base_path: PathBuf::from("./data"),
            date_basis: DateBasis::Utc.to_string(),
            zstd_level: 3,
            reconcile_workers: 4,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s, |k| std::env::var(k).ok())))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        lookup(var_name)
    } else {
        Some(s.to_string())
    }
}

/// Show only enough of a secret to tell two apart
pub fn mask_credential(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{prefix}****")
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./lakepub.toml (current directory)
    /// 2. ~/.config/lakepub/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("lakepub.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "lakepub") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Deployment environment overrides the file:
    /// `API_BASE_URL`, `TARGET_STATUS`, `BASE_PATH`, `API_TOKEN`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = set("API_BASE_URL") {
            self.service.base_url = v;
        }
        if let Some(v) = set("TARGET_STATUS") {
            self.export.target_status = v;
        }
        if let Some(v) = set("BASE_PATH") {
            self.export.output_base_path = PathBuf::from(v);
        }
        if let Some(v) = set("API_TOKEN") {
            self.service.credential = Some(v);
        }
    }

    pub fn target_status(&self) -> Result<Status> {
        Status::from_name(&self.export.target_status).with_context(|| {
            format!(
                "Unknown target status {:?} (expected Pending, Approved or Rejected)",
                self.export.target_status
            )
        })
    }

    pub fn date_basis(&self) -> Result<DateBasis> {
        DateBasis::from_name(&self.export.date_basis).with_context(|| {
            format!(
                "Unknown date basis {:?} (expected utc or local)",
                self.export.date_basis
            )
        })
    }

    /// Validated run configuration
    pub fn to_export_config(&self) -> Result<ExportConfig> {
        anyhow::ensure!(
            (1..=22).contains(&self.export.zstd_level),
            "zstd_level must be within 1..=22, got {}",
            self.export.zstd_level
        );
        anyhow::ensure!(
            self.service.connect_timeout_secs > 0 && self.service.request_timeout_secs > 0,
            "connect_timeout_secs and request_timeout_secs must be positive, got {} and {}",
            self.service.connect_timeout_secs,
            self.service.request_timeout_secs
        );
        Ok(ExportConfig {
            base_url: self.service.base_url.clone(),
            records_path: self.service.records_path.clone(),
            credential: self.service.credential.clone(),
            http: HttpSettings {
                connect_timeout: Duration::from_secs(self.service.connect_timeout_secs),
                request_timeout: Duration::from_secs(self.service.request_timeout_secs),
            },
            target_status: self.target_status()?,
            output_base_path: self.export.output_base_path.clone(),
            date_basis: self.date_basis()?,
            reference_date: None,
            zstd_level: self.export.zstd_level,
            reconcile_workers: self.export.reconcile_workers.max(1),
            dry_run: false,
        })
    }
}
