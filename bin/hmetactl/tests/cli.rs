//! ---
//! hmeta_section: "07-cli"
//! hmeta_subsection: "integration-tests"
//! hmeta_type: "source"
//! hmeta_scope: "test"
//! hmeta_description: "End-to-end runs of the hmetactl binary against a scratch metadata tree."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::{tempdir, TempDir};

const PARCELS: &str = "table:\n  schema: public\n  name: parcels\nselect_permissions:\n  - role: viewer\n    permission:\n      columns:\n        - zoning\n        - id\n      filter: {}\n";
const ROLES: &str = "viewer:\n  is_active: true\n  api_data_supersets: [base]\nformer:\n  is_active: false\n  api_data_supersets: [base]\n";
const SUPERSETS: &str = "base:\n  parcels:\n    columns: [id, area]\n    limit: 25\n";

struct Repo {
    dir: TempDir,
}

impl Repo {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let repo = Self { dir };
        fs::create_dir_all(repo.tables_dir()).unwrap();
        fs::write(repo.tables_dir().join("public_parcels.yaml"), PARCELS).unwrap();
        fs::create_dir_all(repo.metadata().join("source_of_truth")).unwrap();
        fs::write(repo.metadata().join("source_of_truth/metadata_roles.yaml"), ROLES).unwrap();
        fs::write(
            repo.metadata().join("source_of_truth/metadata_api_data_supersets.yaml"),
            SUPERSETS,
        )
        .unwrap();
        repo
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn metadata(&self) -> PathBuf {
        self.root().join("metadata")
    }

    fn tables_dir(&self) -> PathBuf {
        self.metadata().join("databases/default/tables")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("hmetactl").unwrap();
        cmd.current_dir(self.root())
            .env("GRAPHQL2_ROOTDIR", self.root())
            .env("HMETA_LOG", "warn")
            .env_remove("HMETA_CONFIG")
            .env_remove("HMETA_DB_SNAPSHOT")
            .env_remove("DATABASE_URL")
            .env_remove("PGHOST");
        cmd
    }
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn shard_then_reconstruct_round_trips() {
    let repo = Repo::new();
    let output = repo.cmd().args(["shard", "--refresh", "True"]).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("1 table(s) sharded into 1 role shard(s)"));
    assert!(repo.metadata().join("tables/parcels/viewer.yaml").is_file());

    let output = repo.cmd().args(["reconstruct", "--overwrite", "false"]).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("0 document(s) written, 1 left in place"));
    assert_eq!(fs::read_to_string(repo.tables_dir().join("public_parcels.yaml")).unwrap(), PARCELS);
}

#[test]
fn sync_roles_applies_the_prescription() {
    let repo = Repo::new();
    let output = repo.cmd().args(["sync-roles", "Viewer/former"]).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.contains("viewer: active, 1 shard(s) written, 0 removed"));
    assert!(text.contains("former: inactive, 0 shard(s) removed"));

    let deployed = fs::read_to_string(repo.tables_dir().join("public_parcels.yaml")).unwrap();
    assert!(deployed.contains("      columns:\n        - area\n        - id\n"));
    assert!(deployed.contains("      limit: 25\n"));
}

#[test]
fn sync_roles_requires_a_role() {
    let repo = Repo::new();
    let output = repo.cmd().args(["sync-roles", "/"]).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn check_duplicates_fails_on_a_repeated_role() {
    let repo = Repo::new();
    let output = repo.cmd().arg("check-duplicates").output().unwrap();
    assert!(output.status.success(), "{output:?}");

    fs::write(
        repo.tables_dir().join("public_parcels.yaml"),
        format!("{PARCELS}  - role: viewer\n    permission:\n      columns: []\n      filter: {{}}\n"),
    )
    .unwrap();
    let output = repo.cmd().args(["check-duplicates", "parcels"]).output().unwrap();
    assert!(!output.status.success());
    assert!(stdout(&output).contains("parcels: viewer"));
}

#[test]
fn db_consistency_uses_the_snapshot() {
    let repo = Repo::new();
    let snapshot = repo.root().join("db.yaml");
    fs::write(&snapshot, "tables:\n  parcels: [id]\n").unwrap();
    let output = repo
        .cmd()
        .arg("check-db-consistency")
        .arg("--db-snapshot")
        .arg(&snapshot)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stdout(&output).contains("missing columns in public.parcels: zoning"));

    fs::write(&snapshot, "tables:\n  parcels: [id, zoning]\n").unwrap();
    let output = repo
        .cmd()
        .args(["check-db-consistency", "--db-snapshot"])
        .arg(&snapshot)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
}

#[test]
fn compare_roles_writes_a_report() {
    let repo = Repo::new();
    repo.cmd().args(["shard"]).assert().success();
    let output = repo.cmd().args(["compare-roles", "viewer", "former"]).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    assert!(repo.root().join("perm_def_diff/role_vs_role/viewer-vs-former.txt").is_file());
}

#[test]
fn reconstruct_requires_an_explicit_overwrite() {
    let repo = Repo::new();
    repo.cmd().args(["shard", "-r", "false"]).assert().success();
    repo.cmd().arg("reconstruct").assert().failure();
    let output = repo.cmd().args(["reconstruct", "-o", "true"]).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("1 document(s) written, 0 left in place"));
}

#[test]
fn api_table_audit_fails_on_empty_tables() {
    let repo = Repo::new();
    let snapshot = repo.root().join("db.yaml");
    fs::write(&snapshot, "tables:\n  parcels: [id]\nrows:\n  parcels: 0\npermissions:\n  viewer: [parcels]\n").unwrap();
    let output = repo
        .cmd()
        .args(["check-api-tables", "--db-snapshot"])
        .arg(&snapshot)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stdout(&output).contains("empty: parcels"));

    fs::write(&snapshot, "tables:\n  parcels: [id]\nrows:\n  parcels: 40\npermissions:\n  viewer: [parcels]\n").unwrap();
    let output = repo
        .cmd()
        .args(["check-api-tables", "-t", "parcels", "--db-snapshot"])
        .arg(&snapshot)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("1 table(s) checked"));
}

#[test]
fn relationships_are_exported_then_listed() {
    let repo = Repo::new();
    fs::write(
        repo.tables_dir().join("public_sales.yaml"),
        "table:\n  schema: public\n  name: sales\nobject_relationships:\n  - name: parcel\n    using:\n      manual_configuration:\n        column_mapping:\n          parcel_id: id\n        remote_table:\n          name: parcels\n          schema: public\n",
    )
    .unwrap();
    repo.cmd().arg("list-relationships").assert().failure();

    let output = repo.cmd().arg("export-relationships").output().unwrap();
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("1 relationship record(s) written"));
    assert!(repo.root().join("tooling/metadata_relationships.yaml").is_file());

    let output = repo
        .cmd()
        .args(["list-relationships", "--by", "remote", "-f", "parcels"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.starts_with("sales:\n  parcel:\n"));
    assert!(text.contains("origin_column: parcel_id"));
}

#[test]
fn superset_listing_groups_roles() {
    let repo = Repo::new();
    let output = repo.cmd().arg("list-supersets").output().unwrap();
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.starts_with("superset_to_roles:\n  base:\n"));
    assert!(text.contains("superset_combinations:\n"));
    assert!(text.contains("former"));
}
