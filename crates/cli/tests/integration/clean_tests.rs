//! Clean command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn clean_dry_run_keeps_files() {
  let env = TestEnv::from_fixture("chain.json");
  env.write_file("a.txt", "hello");
  env.build(&[]);

  env
    .kiln_cmd()
    .args(["clean", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Would remove: 2"));
  assert!(env.exists("build/app"));
  assert!(env.build_data_path().exists());
}

#[test]
fn clean_removes_outputs_and_build_data() {
  let env = TestEnv::from_fixture("chain.json");
  env.write_file("a.txt", "hello");
  env.build(&[]);

  env
    .kiln_cmd()
    .arg("clean")
    .assert()
    .success()
    .stdout(predicate::str::contains("Removed: 2"));
  assert!(!env.exists("build/a.o"));
  assert!(!env.exists("build/app"));
  assert!(env.exists("a.txt"));
  assert!(!env.build_data_path().exists());

  env
    .kiln_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Executed: 2"));
}
