use std::io::Write;
use std::path::PathBuf;

use predicates::prelude::*;

fn base_yaml() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("config")
        .join("base.yaml")
}

fn write_yaml(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).expect("create yaml");
    f.write_all(body.as_bytes()).expect("write yaml");
    path
}

#[allow(deprecated)]
fn atl() -> assert_cmd::Command {
    assert_cmd::Command::cargo_bin("atl-cli").expect("atl-cli binary")
}

#[test]
fn help_lists_every_subcommand() {
    atl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("db"))
        .stdout(predicate::str::contains("config-hash"))
        .stdout(predicate::str::contains("sweep"))
        .stdout(predicate::str::contains("outbox"))
        .stdout(predicate::str::contains("user"));
}

#[test]
fn config_hash_prints_hash_and_canonical_json() {
    atl()
        .arg("config-hash")
        .arg(base_yaml())
        .assert()
        .success()
        .stdout(predicate::str::contains("config_hash="))
        .stdout(predicate::str::contains("\"timezone\":\"Africa/Dakar\""));
}

#[test]
fn config_hash_is_stable_across_key_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = write_yaml(&dir, "a.yaml", "sweep:\n  interval_secs: 600\n  reminder_days: [1]\n");
    let b = write_yaml(&dir, "b.yaml", "sweep:\n  reminder_days: [1]\n  interval_secs: 600\n");

    let out_a = atl().arg("config-hash").arg(&a).output().expect("run a");
    let out_b = atl().arg("config-hash").arg(&b).output().expect("run b");
    assert!(out_a.status.success());
    let first_line = |o: &std::process::Output| {
        String::from_utf8_lossy(&o.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    };
    assert_eq!(first_line(&out_a), first_line(&out_b));
}

#[test]
fn secret_literal_in_config_is_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let site = write_yaml(
        &dir,
        "site.yaml",
        "push:\n  access_token_env: sk_live_0123456789abcdef\n",
    );

    atl()
        .arg("config-hash")
        .arg(base_yaml())
        .arg(&site)
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"))
        .stderr(predicate::str::contains("0123456789abcdef").not());
}

#[test]
fn strict_mode_fails_on_unused_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let site = write_yaml(&dir, "site.yaml", "sweep:\n  intervale_secs: 60\n");

    atl()
        .arg("config-hash")
        .arg(base_yaml())
        .arg(&site)
        .assert()
        .success()
        .stdout(predicate::str::contains("unused_keys=/sweep/intervale_secs"));

    atl()
        .arg("config-hash")
        .arg("--strict")
        .arg(base_yaml())
        .arg(&site)
        .assert()
        .failure();
}

#[test]
fn sweep_without_database_url_names_the_variable() {
    atl()
        .env_remove(atl_db::ENV_DB_URL)
        .current_dir(std::env::temp_dir())
        .args(["sweep", "--once"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(atl_db::ENV_DB_URL));
}

/// DB-backed; skipped when ATL_DATABASE_URL is not set.
#[test]
fn db_status_reports_commandes_table_after_migrate() {
    if std::env::var(atl_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: ATL_DATABASE_URL not set");
        return;
    }

    atl().args(["db", "migrate"]).assert().success();
    atl()
        .args(["db", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("db_ok=true has_commandes_table=true"));
}
