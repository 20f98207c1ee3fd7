//! Status command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn status_before_and_after_build() {
  let env = TestEnv::from_fixture("chain.json");
  env.write_file("a.txt", "hello");

  env
    .kiln_cmd()
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("2 transformer(s) out of date"))
    .stdout(predicate::str::contains("never"));
  assert!(!env.exists("build/a.o"));

  env.build(&[]);

  env
    .kiln_cmd()
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("Up to date"));
}

#[test]
fn status_json_lists_outdated() {
  let env = TestEnv::from_fixture("chain.json");
  env.write_file("a.txt", "hello");
  env.build(&[]);
  env.write_file("a.txt", "changed");

  let output = env.kiln_cmd().args(["status", "--json"]).output().unwrap();
  assert!(output.status.success());

  let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let rules: Vec<_> = status["outdated"]
    .as_array()
    .unwrap()
    .iter()
    .map(|t| t["rule"].as_str().unwrap().to_string())
    .collect();
  assert_eq!(rules, vec!["compile", "link"]);
  assert!(status["products"][0]["last_build"].is_u64());
}
