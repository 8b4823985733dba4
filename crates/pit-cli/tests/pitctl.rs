//! Runs the `pitctl` binary against a temporary database.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// A temporary database plus a config that opens accounts empty.
struct Fixture {
    _dir: TempDir,
    db: PathBuf,
    config: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("pit.db");
        let config = dir.path().join("pit.toml");
        std::fs::write(&config, "[ledger]\nstarting_balance_micro = 0\n").unwrap();
        Self {
            _dir: dir,
            db,
            config,
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        pitctl(&self.db, Some(&self.config), args)
    }
}

fn pitctl(db: &Path, config: Option<&Path>, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pitctl"));
    cmd.env_remove("PIT_CONFIG").env_remove("PIT_DB");
    if let Some(config) = config {
        cmd.arg("--config").arg(config);
    }
    cmd.arg("--db")
        .arg(db)
        .args(args)
        .output()
        .expect("failed to run pitctl")
}

fn json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "pitctl failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn grant_preauth_settle_round() {
    let fx = Fixture::new();
    let grant_args = [
        "--json", "account", "grant", "alice", "--micro", "500", "--reference", "seed",
    ];

    let grant = json(&fx.run(&grant_args));
    assert_eq!(grant["applied"], true);
    let again = json(&fx.run(&grant_args));
    assert_eq!(again["applied"], false);

    let preauth = json(&fx.run(&["--json", "bout", "preauth", "alice", "b1", "--micro", "200"]));
    assert_eq!(preauth["balance_micro"], 300);
    let reservation_id = preauth["reservation"]["id"].as_str().unwrap().to_string();

    let settled = json(&fx.run(&["--json", "bout", "settle", &reservation_id, "--micro", "150"]));
    assert_eq!(settled["refund_micro"], 50);
    assert_eq!(settled["balance_micro"], 350);

    let audit = fx.run(&["account", "audit", "alice"]);
    assert!(audit.status.success());
    assert!(String::from_utf8_lossy(&audit.stdout).contains("consistent"));
}

#[test]
fn overdraw_fails_with_context() {
    let fx = Fixture::new();
    json(&fx.run(&[
        "--json", "account", "grant", "bob", "--micro", "100", "--reference", "seed",
    ]));

    let output = fx.run(&["bout", "preauth", "bob", "b1", "--micro", "200"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to preauthorize bout b1"));
    assert!(stderr.contains("insufficient balance"));
}

#[test]
fn default_config_opens_accounts_with_starting_balance() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("pit.db");

    let balance = json(&pitctl(&db, None, &["--json", "account", "balance", "carol"]));
    assert_eq!(balance["balance_micro"], 50_000);

    let preauth = json(&pitctl(
        &db,
        None,
        &["--json", "bout", "preauth", "carol", "b1", "--micro", "200"],
    ));
    assert_eq!(preauth["balance_micro"], 50_000 - 200);
}

#[test]
fn prompt_hash_matches_known_vector() {
    let fx = Fixture::new();
    let output = fx.run(&["hash", "prompt", "Deterministic output."]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "0xf2d7077205ae5669ec1d82dcaacd45b2480d272bbb3443049899b31fdba6fd80"
    );
}
