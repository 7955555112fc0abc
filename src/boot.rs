use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use crate::config::AppConfig;

#[derive(Debug, Default, PartialEq)]
pub struct BootReport {
    pub warnings: u32,
    pub errors: u32,
}

fn ensure_dir(path: &Path, report: &mut BootReport) {
    if path.exists() {
        return;
    }
    match fs::create_dir_all(path) {
        Ok(_) => info!("  Created directory: {}", path.display()),
        Err(e) => {
            error!("  FAILED to create directory {}: {}", path.display(), e);
            report.errors += 1;
        }
    }
}

fn writable(dir: &Path) -> Result<(), std::io::Error> {
    let probe = dir.join(".write_test");
    fs::write(&probe, "test")?;
    let _ = fs::remove_file(&probe);
    Ok(())
}

/// Create and probe the directories the server writes to.
pub fn check(config: &AppConfig) -> BootReport {
    let mut report = BootReport::default();

    // ── 1. Upload directories ──────────────────────────
    let portfolio_dir = config.uploads.portfolio_dir();
    ensure_dir(&config.uploads.dir, &mut report);
    ensure_dir(&portfolio_dir, &mut report);
    if portfolio_dir.exists() {
        if let Err(e) = writable(&portfolio_dir) {
            error!("  Upload directory not writable: {}", e);
            report.errors += 1;
        }
    }

    // ── 2. SQLite directory ────────────────────────────
    if config.database.backend == "sqlite" {
        let db_dir = Path::new(&config.database.sqlite_path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        ensure_dir(&db_dir, &mut report);
    }

    // ── 3. Optional GeoIP database ─────────────────────
    if let Some(geo) = &config.analytics.geoip_db {
        if !geo.exists() {
            warn!("  GeoIP database {} not found (country/city stay empty)", geo.display());
            report.warnings += 1;
        }
    }

    // ── 4. Admin token ─────────────────────────────────
    if config.admin_token().is_none() {
        warn!("  No admin token configured; admin endpoints are open");
        report.warnings += 1;
    }

    report
}

/// Run all boot checks. Call this before Rocket launches; aborts on errors.
pub fn run(config: &AppConfig) {
    info!("Boot check starting (backend: {})", config.database.backend);
    let report = check(config);

    if report.errors > 0 {
        error!(
            "Boot check FAILED: {} error(s), {} warning(s). Aborting.",
            report.errors, report.warnings
        );
        process::exit(1);
    }

    if report.warnings > 0 {
        warn!("Boot check passed with {} warning(s).", report.warnings);
    } else {
        info!("Boot check passed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_creates_upload_dirs() {
        let root = std::env::temp_dir().join(format!("aircon-boot-{}", uuid::Uuid::new_v4()));
        let mut config = AppConfig::default();
        config.uploads.dir = root.join("uploads");
        config.admin.token = Some("t".into());

        let report = check(&config);
        assert_eq!(report, BootReport::default());
        assert!(config.uploads.portfolio_dir().is_dir());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_check_warns_without_token() {
        let root = std::env::temp_dir().join(format!("aircon-boot-{}", uuid::Uuid::new_v4()));
        let mut config = AppConfig::default();
        config.uploads.dir = root.join("uploads");
        config.analytics.geoip_db = Some(root.join("missing.mmdb"));

        let report = check(&config);
        assert_eq!(report.errors, 0);
        assert_eq!(report.warnings, 2);
        let _ = fs::remove_dir_all(&root);
    }
}
