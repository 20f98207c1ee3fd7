//! Check command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn check_valid_project() {
  let env = TestEnv::from_fixture("chain.json");
  env.write_file("a.txt", "hello");

  env
    .kiln_cmd()
    .arg("check")
    .assert()
    .success()
    .stdout(predicate::str::contains("No problems found in 1 product(s)"));
}

#[test]
fn check_verbose_prints_order() {
  let env = TestEnv::from_fixture("chain.json");
  env.write_file("a.txt", "hello");

  let output = env.kiln_cmd().args(["check", "-v"]).output().unwrap();
  assert!(output.status.success());

  let stdout = String::from_utf8_lossy(&output.stdout);
  let source = stdout.find("a.txt").unwrap();
  let object = stdout.find("a.o").unwrap();
  let app = stdout.rfind("app").unwrap();
  assert!(source < object && object < app);
}

#[test]
fn check_reports_cycle() {
  let env = TestEnv::from_fixture("cycle.json");

  env
    .kiln_cmd()
    .arg("check")
    .assert()
    .failure()
    .stderr(predicate::str::contains("dependency cycle detected"));
}
