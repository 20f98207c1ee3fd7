//! End-to-end builds driven through project descriptions and sessions.

use std::time::{Duration, Instant};

use kiln_lib::execute::{
  BuildContext, BuildOptions, BuildStatus, CancellationToken, Session, TransformerError, TransformerState,
};
use kiln_lib::lock::LockMode;
use kiln_lib::transformer::TransformerId;
use serde_json::json;

use super::common::{TestProject, builtin, compile_and_link, options, rules};

fn transformer_by_rule(session: &Session, rule: &str) -> TransformerId {
  session
    .project()
    .graph
    .transformers()
    .find(|(_, t)| t.rule.0 == rule)
    .map(|(id, _)| id)
    .unwrap()
}

#[tokio::test]
async fn rules_compile_and_link_incrementally() {
  let project = TestProject::new();
  project.write("a.cpp", "int a;");
  project.write("b.cpp", "int b;");
  project.describe(&compile_and_link(&["a.cpp", "b.cpp"]));

  let first = project.build().await;
  assert_eq!(first.status, BuildStatus::Succeeded);
  assert_eq!(first.executed.len(), 3);
  assert_eq!(project.read("build/b.o"), "int b;");
  assert!(project.path("build/app").exists());

  let second = project.build().await;
  assert!(second.executed.is_empty());

  project.write("b.cpp", "int b = 1;");
  let mut session = project.open(LockMode::Exclusive);
  let third = session.build(&options(), BuildContext::default()).await.unwrap();
  assert_eq!(rules(&session, &third.executed), vec!["compile", "link"]);
  assert_eq!(project.read("build/b.o"), "int b = 1;");
  assert_eq!(project.read("build/a.o"), "int a;");
}

#[tokio::test]
async fn state_survives_between_sessions() {
  let project = TestProject::new();
  project.write("a.cpp", "int a;");
  project.describe(&compile_and_link(&["a.cpp"]));
  project.build().await;

  let session = project.open(LockMode::Shared);
  assert!(session.project().graph.transformers().all(|(_, t)| t.last_run.is_some()));
  assert!(session.status(&options()).unwrap().outdated.is_empty());
  assert!(session.project().product("app").unwrap().build_data.last_build.is_some());
}

#[tokio::test]
async fn failure_skips_dependents_and_keeps_going() {
  let project = TestProject::new();
  project.write("a.txt", "a");
  project.write("c.txt", "c");
  project.describe(&json!({
    "name": "demo",
    "products": [{
      "name": "app",
      "sources": [{ "path": "a.txt" }, { "path": "c.txt" }],
      "transformers": [
        {
          "rule": "t1",
          "inputs": ["a.txt"],
          "outputs": [{ "path": "build/a.o" }],
          "commands": [builtin("copy", &["missing.txt", "build/a.o"])]
        },
        {
          "rule": "t2",
          "inputs": ["build/a.o"],
          "outputs": [{ "path": "build/app" }],
          "commands": [builtin("copy", &["build/a.o", "build/app"])]
        },
        {
          "rule": "t3",
          "inputs": ["c.txt"],
          "outputs": [{ "path": "build/c.o" }],
          "commands": [builtin("copy", &["c.txt", "build/c.o"])]
        }
      ]
    }]
  }));

  let mut session = project.open(LockMode::Exclusive);
  let report = session.build(&options(), BuildContext::default()).await.unwrap();
  let (t1, t2, t3) = (
    transformer_by_rule(&session, "t1"),
    transformer_by_rule(&session, "t2"),
    transformer_by_rule(&session, "t3"),
  );

  assert_eq!(report.status, BuildStatus::Failed);
  assert_eq!(report.state(t1), Some(TransformerState::Failed));
  assert_eq!(report.state(t2), Some(TransformerState::Skipped));
  assert_eq!(report.state(t3), Some(TransformerState::Succeeded));
  assert!(matches!(report.failures[0].error, TransformerError::Builtin { .. }));
  assert_eq!(report.skipped[0].failed_ancestor, Some(t1));
  assert_eq!(project.read("build/c.o"), "c");
  drop(session);

  project.write("missing.txt", "now present");
  let mut session = project.open(LockMode::Exclusive);
  let retry = session.build(&options(), BuildContext::default()).await.unwrap();
  assert_eq!(retry.status, BuildStatus::Succeeded);
  assert_eq!(rules(&session, &retry.executed), vec!["t1", "t2"]);
  assert_eq!(project.read("build/app"), "now present");
}

#[tokio::test]
async fn stop_on_error_leaves_independent_work_undone() {
  let project = TestProject::new();
  project.write("a.txt", "a");
  project.write("c.txt", "c");
  project.describe(&json!({
    "name": "demo",
    "products": [{
      "name": "app",
      "sources": [{ "path": "a.txt" }, { "path": "c.txt" }],
      "transformers": [
        {
          "rule": "broken",
          "inputs": ["a.txt"],
          "outputs": [{ "path": "build/a.o" }],
          "commands": [builtin("copy", &["missing.txt", "build/a.o"])]
        },
        {
          "rule": "fine",
          "inputs": ["c.txt"],
          "outputs": [{ "path": "build/c.o" }],
          "commands": [builtin("copy", &["c.txt", "build/c.o"])]
        }
      ]
    }]
  }));

  let opts = BuildOptions {
    jobs: 1,
    keep_going: false,
    ..options()
  };
  let mut session = project.open(LockMode::Exclusive);
  let report = session.build(&opts, BuildContext::default()).await.unwrap();
  let fine = transformer_by_rule(&session, "fine");

  assert_eq!(report.status, BuildStatus::Failed);
  assert_eq!(report.state(fine), Some(TransformerState::Skipped));
  assert!(!project.path("build/c.o").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn cancellation_interrupts_running_process() {
  let project = TestProject::new();
  project.write("a.txt", "a");
  project.describe(&json!({
    "name": "demo",
    "products": [{
      "name": "app",
      "sources": [{ "path": "a.txt" }],
      "transformers": [
        {
          "rule": "slow",
          "inputs": ["a.txt"],
          "outputs": [{ "path": "build/a.o" }],
          "commands": [{ "type": "process", "program": "/bin/sh", "arguments": ["-c", "sleep 30"] }]
        },
        {
          "rule": "link",
          "inputs": ["build/a.o"],
          "outputs": [{ "path": "build/app" }],
          "commands": [builtin("copy", &["build/a.o", "build/app"])]
        }
      ]
    }]
  }));

  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(300)).await;
    trigger.cancel();
  });
  let ctx = BuildContext {
    cancel,
    ..BuildContext::default()
  };
  let opts = BuildOptions {
    kill_timeout: Duration::from_secs(2),
    ..options()
  };

  let started = Instant::now();
  let mut session = project.open(LockMode::Exclusive);
  let report = session.build(&opts, ctx).await.unwrap();
  let (slow, link) = (transformer_by_rule(&session, "slow"), transformer_by_rule(&session, "link"));

  assert!(started.elapsed() < Duration::from_secs(10));
  assert_eq!(report.status, BuildStatus::Cancelled);
  assert_eq!(report.state(slow), Some(TransformerState::Failed));
  assert!(matches!(report.failures[0].error, TransformerError::Interrupted { .. }));
  assert_eq!(report.state(link), Some(TransformerState::Skipped));

  let status = session.status(&options()).unwrap();
  assert_eq!(status.outdated.len(), 2);
}

#[tokio::test]
async fn changed_files_limit_what_is_hashed() {
  let project = TestProject::new();
  project.write("a.cpp", "int a;");
  project.write("b.cpp", "int b;");
  project.describe(&compile_and_link(&["a.cpp", "b.cpp"]));
  project.build().await;

  project.write("a.cpp", "int a = 2;");
  project.write("b.cpp", "int b = 2;");
  let mut session = project.open(LockMode::Exclusive);
  let opts = BuildOptions {
    changed_files: [session.project().root.join("b.cpp")].into_iter().collect(),
    ..options()
  };
  let report = session.build(&opts, BuildContext::default()).await.unwrap();

  assert_eq!(report.executed.len(), 2);
  assert_eq!(project.read("build/b.o"), "int b = 2;");
  assert_eq!(project.read("build/a.o"), "int a;");
}

#[tokio::test]
async fn selective_build_keeps_shared_source_change_for_other_product() {
  let project = TestProject::new();
  project.write("shared.c", "v1");
  project.describe(&json!({
    "name": "demo",
    "products": [
      {
        "name": "p",
        "sources": [{ "path": "shared.c" }],
        "transformers": [{
          "rule": "compile_p",
          "inputs": ["shared.c"],
          "outputs": [{ "path": "build/p.o" }],
          "commands": [builtin("copy", &["shared.c", "build/p.o"])]
        }]
      },
      {
        "name": "q",
        "transformers": [{
          "rule": "compile_q",
          "inputs": ["shared.c"],
          "outputs": [{ "path": "build/q.o" }],
          "commands": [builtin("copy", &["shared.c", "build/q.o"])]
        }]
      }
    ]
  }));
  project.build().await;

  project.write("shared.c", "v2");
  let only = |name: &str| BuildOptions {
    products: vec![name.to_string()],
    ..options()
  };

  let mut session = project.open(LockMode::Exclusive);
  let report = session.build(&only("p"), BuildContext::default()).await.unwrap();
  assert_eq!(rules(&session, &report.executed), vec!["compile_p"]);
  assert_eq!(project.read("build/q.o"), "v1");
  drop(session);

  let mut session = project.open(LockMode::Exclusive);
  let report = session.build(&only("q"), BuildContext::default()).await.unwrap();
  assert_eq!(rules(&session, &report.executed), vec!["compile_q"]);
  assert_eq!(project.read("build/q.o"), "v2");
}

#[tokio::test]
async fn included_header_change_rebuilds_its_includers() {
  let project = TestProject::new();
  project.write("a.cpp", "#include \"config.h\"\nint a;");
  project.write("b.cpp", "int b;");
  project.write("config.h", "#define LEVEL 1");
  project.describe(&compile_and_link(&["a.cpp", "b.cpp"]));

  assert_eq!(project.build().await.executed.len(), 3);
  assert!(project.build().await.executed.is_empty());

  project.write("config.h", "#define LEVEL 2");
  let session = project.open(LockMode::Shared);
  let outdated = session.status(&options()).unwrap().outdated;
  assert_eq!(outdated.len(), 2);
  assert_eq!(outdated[0].outputs, vec!["build/a.o"]);
  drop(session);

  let mut session = project.open(LockMode::Exclusive);
  let report = session.build(&options(), BuildContext::default()).await.unwrap();
  assert_eq!(rules(&session, &report.executed), vec!["compile", "link"]);
  drop(session);

  assert!(project.build().await.executed.is_empty());
}

#[tokio::test]
async fn new_header_of_unchanged_includer_is_picked_up() {
  let project = TestProject::new();
  project.write("a.cpp", "#include \"a.h\"\n");
  project.write("a.h", "#include \"detail.h\"\n");
  project.describe(&compile_and_link(&["a.cpp"]));
  project.build().await;

  // detail.h did not resolve before; once it exists a.h is unchanged but the
  // implicit dependency set grows.
  project.write("detail.h", "int detail;");
  let mut session = project.open(LockMode::Exclusive);
  let report = session.build(&options(), BuildContext::default()).await.unwrap();
  assert_eq!(rules(&session, &report.executed), vec!["compile", "link"]);
}

