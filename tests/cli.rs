use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

fn cli(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("crm-autorefresh").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG")
        .env_remove("CRM_AUTOREFRESH_TARGET__PATH_MARKERS")
        .env_remove("CRM_AUTOREFRESH_TIMING__REFRESH_INTERVAL_MS");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is json")
}

#[test]
fn check_path_reports_leads_paths() {
    let home = TempDir::new().unwrap();
    let output = cli(&home)
        .args(["--output", "json", "check-path", "/crm/leads/view/list"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let verdict = stdout_json(&output);
    assert_eq!(verdict["target_page"], Value::Bool(true));
    assert_eq!(verdict["markers"][0], "/crm/leads");

    let output = cli(&home)
        .args(["check-path", "/crm/deals"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert_eq!(text.trim(), "/crm/deals: not the Leads page");
}

#[test]
fn check_path_is_case_sensitive() {
    let home = TempDir::new().unwrap();
    let output = cli(&home)
        .args(["-o", "json", "check-path", "/CRM/LEADS"])
        .output()
        .unwrap();
    assert_eq!(stdout_json(&output)["target_page"], Value::Bool(false));
}

#[test]
fn config_reflects_file_and_environment() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("custom.yaml");
    std::fs::write(
        &file,
        "timing:\n  refresh_interval_ms: 45000\ntarget:\n  route_name: Prospects\n",
    )
    .unwrap();

    let output = cli(&home)
        .env("CRM_AUTOREFRESH_TIMING__ROUTE_SETTLE_MS", "900")
        .args(["-o", "json", "--config"])
        .arg(&file)
        .arg("config")
        .output()
        .unwrap();
    assert!(output.status.success());
    let effective = stdout_json(&output);
    let config = &effective["config"];
    assert_eq!(config["timing"]["refresh_interval_ms"], 45000);
    assert_eq!(config["timing"]["route_settle_ms"], 900);
    assert_eq!(config["timing"]["history_settle_ms"], 500);
    assert_eq!(config["target"]["route_name"], "Prospects");
    assert!(effective["source"].as_str().unwrap().ends_with("custom.yaml"));
}

#[test]
fn default_config_file_is_picked_up() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join("crm-autorefresh");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("config.yaml"),
        "target:\n  path_markers: [\"/prospects\"]\n",
    )
    .unwrap();

    let output = cli(&home)
        .args(["-o", "json", "check-path", "/prospects/42"])
        .output()
        .unwrap();
    assert_eq!(stdout_json(&output)["target_page"], Value::Bool(true));
}

#[test]
fn invalid_configuration_fails_fast() {
    let home = TempDir::new().unwrap();
    let output = cli(&home)
        .env("CRM_AUTOREFRESH_TIMING__REFRESH_INTERVAL_MS", "0")
        .args(["check-path", "/crm/leads"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let output = cli(&home)
        .args(["--config", "/no/such/config.yaml", "config"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn run_rejects_an_http_websocket_url() {
    let home = TempDir::new().unwrap();
    let output = cli(&home)
        .args(["run", "--ws-url", "http://127.0.0.1:9222"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
