use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command isolated from the user's config, `.env` and API keys.
fn invsheet(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("invsheet").unwrap();
    cmd.current_dir(dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("config"))
        .env_remove("GEMINI_API_KEY")
        .env_remove("GOOGLE_SHEETS_ACCESS_TOKEN");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    invsheet(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("process"))
        .stdout(predicate::str::contains("batch"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_process_missing_input() {
    let dir = TempDir::new().unwrap();
    invsheet(&dir)
        .args(["process", "missing.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input file not found"));
}

#[test]
fn test_process_requires_api_key() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("invoice.pdf"), b"%PDF-1.4").unwrap();
    invsheet(&dir)
        .args(["process", "invoice.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GEMINI_API_KEY"));
}

#[test]
fn test_batch_rejects_unknown_month() {
    let dir = TempDir::new().unwrap();
    invsheet(&dir)
        .args(["batch", "a.pdf", "--month", "Smarch", "--workbook", "book.xlsx"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown month: Smarch"));
}

#[test]
fn test_batch_requires_month_unless_local_only() {
    let dir = TempDir::new().unwrap();
    invsheet(&dir)
        .args(["batch", "a.pdf", "--workbook", "book.xlsx"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--month"));
}

#[test]
fn test_batch_without_pdfs() {
    let dir = TempDir::new().unwrap();
    invsheet(&dir)
        .args(["batch", "*.pdf", "--no-remote", "--workbook", "book.xlsx"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No PDF files found"));
}

#[test]
fn test_batch_missing_workbook() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.pdf"), b"%PDF-1.4").unwrap();
    invsheet(&dir)
        .args(["batch", "a.pdf", "--no-remote", "--workbook", "book.xlsx"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Workbook not found"));
}

#[test]
fn test_config_init_get_set() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("invsheet.json");
    let path = path.to_str().unwrap();

    invsheet(&dir)
        .args(["-c", path, "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not created"));

    invsheet(&dir)
        .args(["-c", path, "config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration file"));

    invsheet(&dir)
        .args(["-c", path, "config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    invsheet(&dir)
        .args(["-c", path, "config", "get", "model.model"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gemini-1.5-flash"));

    invsheet(&dir)
        .args(["-c", path, "config", "set", "sink.consistency", "all_or_nothing"])
        .assert()
        .success();

    invsheet(&dir)
        .args(["-c", path, "config", "get", "sink.consistency"])
        .assert()
        .success()
        .stdout(predicate::str::contains("all_or_nothing"));

    invsheet(&dir)
        .args(["-c", path, "config", "set", "sink.consistency", "sometimes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid value"));
}

#[test]
fn test_config_set_rejects_unknown_key() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("invsheet.json");
    let path = path.to_str().unwrap();

    invsheet(&dir)
        .args(["-c", path, "config", "set", "model.tmperature", "0.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key: model.tmperature"));
    assert!(!dir.path().join("invsheet.json").exists());

    invsheet(&dir)
        .args(["-c", path, "config", "set", "model.api_key", "test-key"])
        .assert()
        .success();

    invsheet(&dir)
        .args(["-c", path, "config", "get", "model.api_key"])
        .assert()
        .success()
        .stdout(predicate::str::contains("test-key"));
}

#[test]
fn test_config_show_defaults() {
    let dir = TempDir::new().unwrap();
    invsheet(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No config file found"))
        .stdout(predicate::str::contains("Health&GlowMasterData"));
}
