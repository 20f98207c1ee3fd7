//! Build command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn build_chain_then_nothing_to_do() {
  let env = TestEnv::from_fixture("chain.json");
  env.write_file("a.txt", "hello");

  env
    .kiln_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("compiling a.txt"))
    .stdout(predicate::str::contains("linking app"))
    .stdout(predicate::str::contains("Build complete!"));
  assert_eq!(env.read_file("build/app"), "hello");
  assert!(env.build_data_path().exists());

  env
    .kiln_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to do"));
}

#[test]
fn build_after_source_change_reruns_chain() {
  let env = TestEnv::from_fixture("chain.json");
  env.write_file("a.txt", "hello");
  env.build(&[]);

  env.write_file("a.txt", "changed");
  env
    .kiln_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Executed: 2"));
  assert_eq!(env.read_file("build/app"), "changed");
}

#[test]
fn build_with_rules() {
  let env = TestEnv::from_fixture("rules.json");
  env.write_file("src/a.cpp", "int a;");
  env.write_file("src/b.cpp", "int b;");

  env
    .kiln_cmd()
    .args(["build", "-j", "2"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Executed: 3"));
  assert_eq!(env.read_file("build/a.o"), "int a;");
  assert!(env.exists("build/app"));
}

#[test]
fn failed_build_exits_nonzero_and_keeps_going() {
  let env = TestEnv::from_fixture("failing.json");
  env.write_file("a.txt", "a");
  env.write_file("c.txt", "c");

  env
    .kiln_cmd()
    .arg("build")
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("Build failed"))
    .stderr(predicate::str::contains("missing.txt"))
    .stdout(predicate::str::contains("Skipped: 1"));
  assert_eq!(env.read_file("build/c.o"), "c");
  assert!(!env.exists("build/app"));
}

#[test]
fn failed_build_json_report() {
  let env = TestEnv::from_fixture("failing.json");
  env.write_file("a.txt", "a");
  env.write_file("c.txt", "c");

  let output = env.kiln_cmd().args(["build", "--json"]).output().unwrap();
  assert!(!output.status.success());

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["status"], "failed");
  assert_eq!(report["failures"][0]["rule"], "broken");
  assert_eq!(report["skipped"][0]["rule"], "link");
  assert_eq!(report["skipped"][0]["failed_ancestor"], report["failures"][0]["id"]);
  assert_eq!(report["executed"].as_array().unwrap().len(), 1);
}

#[test]
fn dry_run_builds_nothing() {
  let env = TestEnv::from_fixture("chain.json");
  env.write_file("a.txt", "hello");

  env
    .kiln_cmd()
    .args(["build", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Would run: 2"));
  assert!(!env.exists("build/a.o"));
  assert!(!env.build_data_path().exists());
}

#[test]
fn unknown_product_fails() {
  let env = TestEnv::from_fixture("chain.json");
  env.write_file("a.txt", "hello");

  env
    .kiln_cmd()
    .args(["build", "--product", "nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("nope"));
}

#[test]
fn missing_project_file_fails() {
  let env = TestEnv::from_fixture("chain.json");

  env
    .kiln_cmd()
    .args(["build", "other.json"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to open project"));
}

#[test]
fn header_found_through_include_path_triggers_rebuild() {
  let env = TestEnv::from_fixture("rules.json");
  env.write_file("src/a.cpp", "#include <config.h>\nint a;");
  env.write_file("src/b.cpp", "int b;");
  env.write_file("include/config.h", "#define LEVEL 1");
  env.build(&["-I", "include"]);

  env.write_file("include/config.h", "#define LEVEL 2");
  env
    .kiln_cmd()
    .args(["build", "--include-path", "include"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Executed: 2"));

  env
    .kiln_cmd()
    .args(["build", "-I", "include"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to do"));
}
