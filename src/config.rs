use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default config file, read from the working directory.
pub const CONFIG_FILE: &str = "aircon-site.toml";

/// Application settings read from `aircon-site.toml`.
/// Every key is optional; a missing file yields the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub uploads: UploadConfig,
    pub analytics: AnalyticsConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// "mongodb" or "sqlite"
    pub backend: String,
    pub uri: String,
    pub name: String,
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: "mongodb".to_string(),
            uri: "mongodb://localhost:27017".to_string(),
            name: "aircon_site".to_string(),
            sqlite_path: "data/aircon-site.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_file_mb: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
            max_file_mb: 10,
        }
    }
}

impl UploadConfig {
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_mb.max(1).saturating_mul(1024 * 1024)
    }

    pub fn portfolio_dir(&self) -> PathBuf {
        self.dir.join("portfolio")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Path to a GeoLite2-City database. Geo fields stay null without it.
    pub geoip_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub token: Option<String>,
}

impl AppConfig {
    /// Load from `AIRCON_SITE_CONFIG` (or the default file), then apply
    /// `MONGODB_URI` and `ADMIN_TOKEN` from the environment.
    pub fn load() -> Result<Self, String> {
        let path = std::env::var("AIRCON_SITE_CONFIG").unwrap_or_else(|_| CONFIG_FILE.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        match std::fs::read_to_string(path) {
            Ok(s) => Self::from_toml(&s).map_err(|e| format!("{}: {}", path.display(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No {} found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(format!("Failed to read {}: {}", path.display(), e)),
        }
    }

    pub fn from_toml(s: &str) -> Result<Self, String> {
        toml::from_str(s).map_err(|e| e.to_string())
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup("MONGODB_URI").filter(|v| !v.trim().is_empty()) {
            self.database.uri = uri;
        }
        if let Some(token) = lookup("ADMIN_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.admin.token = Some(token);
        }
    }

    /// Configured admin token, ignoring blank values.
    pub fn admin_token(&self) -> Option<&str> {
        self.admin
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}
