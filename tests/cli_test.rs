use assert_cmd::Command;
use predicates::prelude::*;

fn bioflow() -> Command {
    let mut cmd = Command::cargo_bin("bioflow").unwrap();
    cmd.args(["--config", "tests/fixtures/config.yml"])
        .env("RUST_LOG", "warn")
        .env_remove("BIOFLOW_SSH_HOST");
    cmd
}

#[test]
fn test_validate_pipeline() {
    bioflow()
        .args(["validate", "tests/fixtures/pipeline.json"])
        .args(["--catalog", "tests/fixtures/catalog.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("graph is valid"));
}

#[test]
fn test_validate_without_catalog_flags_unknown_tools() {
    bioflow()
        .args(["validate", "tests/fixtures/pipeline.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("unknown component 'fastqc' for node node_2"));
}

#[test]
fn test_validate_cycle() {
    bioflow()
        .args(["validate", "tests/fixtures/cyclic.yml"])
        .args(["--catalog", "tests/fixtures/catalog.yml"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("cycle detected: node_1 -> node_2 -> node_1"));
}

#[test]
fn test_order() {
    bioflow()
        .args(["order", "tests/fixtures/pipeline.json"])
        .assert()
        .success()
        .stdout("node_1\nnode_2\nnode_3\nnode_4\n");
}

#[test]
fn test_dry_run_prints_commands() {
    bioflow()
        .args(["run", "--dry-run", "tests/fixtures/pipeline.json"])
        .args(["--catalog", "tests/fixtures/catalog.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "$ fastqc -t 4 -q /data/sample1.fq /data/sample2.fq -o /scratch/bioflow/fastqc_node_2_fastqc.html",
        ))
        .stdout(predicate::str::contains(
            "$ conda run -n qc multiqc /scratch/bioflow/fastqc_node_2_fastqc.html",
        ))
        .stdout(predicate::str::contains(
            "$ mkdir -p /results/qc && cp -r -- /scratch/bioflow/multiqc_node_3.out /results/qc/multiqc_node_3-report.out",
        ));
}

#[test]
fn test_remote_commands_need_credentials() {
    bioflow()
        .args(["ls", "/data"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("BIOFLOW_SSH_HOST is not set"));
}
