use std::env;

use crm_autorefresh::config::{self, ConfigError};
use serial_test::serial;
use tempfile::TempDir;

struct EnvGuard(Vec<&'static str>);

impl EnvGuard {
    fn set(vars: &[(&'static str, &str)]) -> Self {
        for (key, value) in vars {
            env::set_var(key, value);
        }
        Self(vars.iter().map(|(k, _)| *k).collect())
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in &self.0 {
            env::remove_var(key);
        }
    }
}

fn empty_file(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "{}\n").unwrap();
    path
}

#[test]
#[serial]
fn environment_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let _env = EnvGuard::set(&[
        ("CRM_AUTOREFRESH_TIMING__REFRESH_INTERVAL_MS", "12000"),
        ("CRM_AUTOREFRESH_CDP__LAUNCH", "true"),
        ("CRM_AUTOREFRESH_LOCATOR__TOOLTIP_KEYWORD", "reload"),
    ]);
    let loaded = config::load(Some(&empty_file(&dir))).unwrap();
    assert_eq!(loaded.config.timing.refresh_interval_ms, 12000);
    assert!(loaded.config.cdp.launch);
    assert_eq!(loaded.config.locator.tooltip_keyword, "reload");
    assert_eq!(loaded.config.locator.icon_min_path_len, 50);
}

#[test]
#[serial]
fn environment_lists_are_comma_separated() {
    let dir = TempDir::new().unwrap();
    let _env = EnvGuard::set(&[("CRM_AUTOREFRESH_TARGET__PATH_MARKERS", "/crm/prospects,/prospects")]);
    let loaded = config::load(Some(&empty_file(&dir))).unwrap();
    let target = loaded.config.target_page().unwrap();
    assert!(target.is_target_page("/prospects/7"));
    assert!(!target.is_target_page("/crm/leads"));
}

#[test]
#[serial]
fn zero_poll_period_is_rejected() {
    let dir = TempDir::new().unwrap();
    let _env = EnvGuard::set(&[("CRM_AUTOREFRESH_TIMING__BOOT_POLL_MS", "0")]);
    let err = config::load(Some(&empty_file(&dir))).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "timing.boot_poll_ms", .. }));
}
