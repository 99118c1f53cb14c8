#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! once assert_cmd 2.1 is the floor

mod common;

use assert_cmd::Command;
use common::{SHOP_MANIFEST, TestProject};
use predicates::prelude::*;

fn stackflow() -> Command {
    let mut cmd = Command::cargo_bin("stackflow").unwrap();
    cmd.env_remove("STACKFLOW_CONFIG").env_remove("STACKFLOW_ENV");
    cmd
}

#[test]
fn test_cli_help() {
    stackflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("upgrade"))
        .stdout(predicate::str::contains("check-upgrade"))
        .stdout(predicate::str::contains("rollback"))
        .stdout(predicate::str::contains("remove"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_cli_version() {
    stackflow()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stackflow"));
}

#[test]
fn test_remove_help_mentions_volumes() {
    stackflow()
        .args(["remove", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--purge-volumes"));
}

#[test]
fn test_validate_valid_manifest() {
    let project = TestProject::new();
    let manifest = project.write("shop.yml", SHOP_MANIFEST);

    stackflow()
        .arg("validate")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Manifest is valid"))
        .stdout(predicate::str::contains("services: 2"))
        .stdout(predicate::str::contains("DB_PASSWORD"))
        .stdout(predicate::str::contains("(required)"));
}

#[test]
fn test_validate_invalid_manifest() {
    let project = TestProject::new();
    let manifest = project.write(
        "broken.yml",
        "services:\n  web:\n    image: nginx\n    depends_on: [missing]\n",
    );

    stackflow()
        .arg("validate")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Manifest is invalid"));
}

#[test]
fn test_validate_missing_file() {
    stackflow()
        .args(["validate", "/nonexistent/shop.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn test_plan_orders_dependencies_first() {
    let project = TestProject::new();
    let manifest = project.write("shop.yml", SHOP_MANIFEST);

    let output = stackflow()
        .arg("plan")
        .arg(&manifest)
        .args(["--var", "DB_PASSWORD=secret"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan for stack shop"))
        .stdout(predicate::str::contains("postgres:16"))
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).unwrap();
    let network = stdout.find("shop_default").unwrap();
    let volume = stdout.find("shop_db_data").unwrap();
    let db = stdout.find("shop-db").unwrap();
    let web = stdout.find("shop-web").unwrap();
    assert!(network < db && volume < db);
    assert!(db < web);
}

#[test]
fn test_plan_stack_name_override() {
    let project = TestProject::new();
    let manifest = project.write("shop.yml", SHOP_MANIFEST);

    stackflow()
        .arg("plan")
        .arg(&manifest)
        .args(["--stack", "store", "--var", "DB_PASSWORD=secret"])
        .assert()
        .success()
        .stdout(predicate::str::contains("store-web"));
}

#[test]
fn test_plan_missing_required_variable() {
    let project = TestProject::new();
    let manifest = project.write("shop.yml", SHOP_MANIFEST);

    stackflow()
        .arg("plan")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("DB_PASSWORD"));
}

#[test]
fn test_plan_rejects_malformed_var() {
    let project = TestProject::new();
    let manifest = project.write("shop.yml", SHOP_MANIFEST);

    stackflow()
        .arg("plan")
        .arg(&manifest)
        .args(["--var", "DB_PASSWORD"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_status_without_deployments() {
    let project = TestProject::new();
    let config = project.write_config("");

    stackflow()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No deployments"));
}

#[test]
fn test_status_json_without_deployments() {
    let project = TestProject::new();
    let config = project.write_config("");

    stackflow()
        .arg("--config")
        .arg(&config)
        .args(["status", "shop", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_deploy_without_catalog() {
    let project = TestProject::new();
    let config = project.write_config("");

    stackflow()
        .arg("--config")
        .arg(&config)
        .args(["deploy", "shop"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no catalog configured"));
}

#[test]
fn test_check_upgrade_unknown_group() {
    let project = TestProject::new();
    project.write("stacks/shop.yml", SHOP_MANIFEST);
    project.write(
        "catalog.yml",
        "products:\n  - group: shop\n    version: 1.0.0\n    stacks:\n      - name: app\n        manifest: stacks/shop.yml\n",
    );
    let config = project.write_config("catalog: catalog.yml\n");

    stackflow()
        .arg("--config")
        .arg(&config)
        .args(["check-upgrade", "blog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("blog"));
}

#[test]
fn test_invalid_config_is_reported() {
    let project = TestProject::new();
    let config = project.write("stackflow.yml", "enviroment: prod\n");

    stackflow()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}
