mod common;

use assert_cmd::Command;
use common::{SCHOOL_MAPPING, SCHOOL_SCHEMA, TestWorkspace};
use predicates::str::contains;

const CONFIG_WITHOUT_URL: &str = "name: directorio-escolar\nversion: 0.1.0\n";

fn command() -> Command {
    let mut cmd = Command::cargo_bin("wikibase-bulk").expect("binary exists");
    for var in [
        "WIKIBASE_URL",
        "MEDIAWIKI_API_URL",
        "WIKIBASE_USERNAME",
        "WIKIBASE_PASSWORD",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn workspace_with_mapping(csv: &str) -> (TestWorkspace, std::path::PathBuf) {
    let workspace = TestWorkspace::new();
    workspace.write("directorio.csv", csv);
    let mapping = workspace.write(
        "mapping.yml",
        &SCHOOL_MAPPING.replace("ACTION", "append_or_replace"),
    );
    (workspace, mapping)
}

#[test]
fn validate_accepts_schema_and_mapping() {
    let (workspace, mapping) =
        workspace_with_mapping("NOM_RBD,RBD,NOM_COM_RBD\nLiceo A,123,Talca\n");
    let schema = workspace.write("schema.yml", SCHOOL_SCHEMA);
    command()
        .args([
            "validate",
            "--schema",
            schema.to_str().unwrap(),
            "--mapping",
            mapping.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("4 property(ies), 3 item(s)"))
        .stdout(contains("1 file(s), 1 rule(s)"));
}

#[test]
fn validate_names_columns_missing_from_the_header() {
    let (_workspace, mapping) = workspace_with_mapping("NOM_RBD,RBD\nLiceo A,123\n");
    command()
        .args(["validate", "--mapping", mapping.to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("'NOM_COM_RBD'"));
}

#[test]
fn validate_rejects_unknown_datatypes() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write(
        "schema.yml",
        "properties:\n  - label: región\n    datatype: monolingualtext\n",
    );
    command()
        .args(["validate", "--schema", schema.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("monolingualtext"));
}

#[test]
fn validate_requires_a_description() {
    command().arg("validate").assert().failure().code(2);
}

#[test]
fn schema_errors_surface_before_connecting() {
    let workspace = TestWorkspace::new();
    let config = workspace.write("project.yml", "name: x\nwikibase:\n  url: http://127.0.0.1:9\n");
    let schema = workspace.write("schema.yml", "items:\n  - label: ''\n");
    command()
        .args([
            "schema",
            "--config",
            config.to_str().unwrap(),
            "--path",
            schema.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("error:"))
        .stderr(contains("Loading schema description"));
}

#[test]
fn mapping_without_a_wikibase_url_fails_with_a_hint() {
    let (workspace, mapping) =
        workspace_with_mapping("NOM_RBD,RBD,NOM_COM_RBD\nLiceo A,123,Talca\n");
    let config = workspace.write("project.yml", CONFIG_WITHOUT_URL);
    command()
        .args([
            "mapping",
            "-c",
            config.to_str().unwrap(),
            "-p",
            mapping.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("WIKIBASE_URL"));
}

#[test]
fn missing_config_file_is_reported() {
    let (workspace, mapping) =
        workspace_with_mapping("NOM_RBD,RBD,NOM_COM_RBD\nLiceo A,123,Talca\n");
    let config = workspace.path().join("absent.yml");
    command()
        .args([
            "mapping",
            "--config",
            config.to_str().unwrap(),
            "--path",
            mapping.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("Loading project config"));
}

#[test]
fn workers_must_be_positive() {
    command()
        .args(["mapping", "--path", "mapping.yml", "--workers", "0"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn bundled_demo_descriptions_validate() {
    command()
        .args([
            "validate",
            "--schema",
            "demos/schema.yml",
            "--mapping",
            "demos/mapping.yml",
        ])
        .assert()
        .success()
        .stdout(contains("6 property(ies), 3 item(s)"));
}
