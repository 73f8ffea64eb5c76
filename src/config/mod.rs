use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::journaling::autosave::AutoSavePolicy;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Draftpad";
const APP_NAME: &str = "draftpad";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    /// Explicit paths win over `DRAFTPAD_CONFIG` / `DRAFTPAD_DATA`.
    pub fn discover_with(config: Option<PathBuf>, data: Option<PathBuf>) -> Result<Self> {
        let paths = ConfigPaths::discover_with(config, data)?;
        Ok(Self { paths })
    }

    pub fn from_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths);
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths);
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub export_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover_with(config: Option<PathBuf>, data: Option<PathBuf>) -> Result<Self> {
        let override_config =
            config.or_else(|| env::var("DRAFTPAD_CONFIG").ok().map(PathBuf::from));
        let override_data = data.or_else(|| env::var("DRAFTPAD_DATA").ok().map(PathBuf::from));

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        Ok(Self::rooted(config_dir, config_file, data_root))
    }

    /// Lays out every path under a single data root; used by `discover_with` and tests.
    pub fn rooted(config_dir: PathBuf, config_file: PathBuf, data_dir: PathBuf) -> Self {
        let database_path = data_dir.join("drafts.db");
        let export_dir = data_dir.clone();
        Self {
            config_dir,
            config_file,
            data_dir,
            database_path,
            export_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.export_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub auto_save: AutoSaveConfig,
    pub history: HistoryOptions,
    pub storage: StorageOptions,
    pub export: ExportOptions,
    pub listing: ListingOptions,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) {
        self.storage.resolve(paths);
        self.export.resolve(paths);
        if self.export.file_name.trim().is_empty() {
            tracing::warn!("empty export file name in config, falling back to default");
            self.export.file_name = ExportOptions::default().file_name;
        }
    }
}

/// Quiet windows for the two autosave presets.
///
/// A brand-new draft waits longer than one that already has a row, since
/// nothing has been explicitly saved yet.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    pub enabled: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "new_draft_ms")]
    pub new_draft_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "existing_draft_ms")]
    pub existing_draft_interval: Duration,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            new_draft_interval: Duration::from_millis(10_000),
            existing_draft_interval: Duration::from_millis(2_000),
        }
    }
}

impl AutoSaveConfig {
    pub fn policy(&self) -> AutoSavePolicy {
        AutoSavePolicy {
            enabled: self.enabled,
            new_draft: self.new_draft_interval,
            existing_draft: self.existing_draft_interval,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryOptions {
    /// Cap on retained undo snapshots (0 = unbounded)
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    #[serde(skip)]
    pub directory: PathBuf,
    pub file_name: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            file_name: "draft.html".to_string(),
        }
    }
}

impl ExportOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.directory.as_os_str().is_empty() {
            self.directory = paths.export_dir.clone();
        }
    }

    pub fn target_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingOptions {
    pub preview_chars: usize,
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self { preview_chars: 80 }
    }
}
