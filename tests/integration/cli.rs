//! `devflow resolve` and `devflow build` through the binary

use predicates::prelude::*;

use super::common::TestWorkspace;

fn with_deps(name: &str, deps: &[&str]) -> String {
    let mut config = format!("name: {name}\n");
    if !deps.is_empty() {
        config.push_str("dependencies:\n");
        for dep in deps {
            config.push_str(&format!("  - name: {dep}\n    source:\n      path: ../{dep}\n"));
        }
    }
    config
}

#[test]
fn test_resolve_prints_tree() {
    let ws = TestWorkspace::new().unwrap();
    ws.write_project("db", &with_deps("db", &[])).unwrap();
    ws.write_project("api", &with_deps("api", &["db"])).unwrap();
    ws.write_project("app", &with_deps("app", &["api", "db"])).unwrap();

    ws.devflow("app")
        .arg("resolve")
        .assert()
        .success()
        .stdout(predicate::str::contains("app\n├── api\n│   └── db\n└── db\n"));
}

#[test]
fn test_resolve_flat_is_leaves_first() {
    let ws = TestWorkspace::new().unwrap();
    ws.write_project("db", &with_deps("db", &[])).unwrap();
    ws.write_project("api", &with_deps("api", &["db"])).unwrap();
    ws.write_project("app", &with_deps("app", &["api"])).unwrap();

    let output = ws.devflow("app").args(["resolve", "--flat"]).output().unwrap();
    assert!(output.status.success());
    let names: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.split_whitespace().next().map(str::to_string))
        .collect();
    assert_eq!(names, vec!["db", "api"]);
}

#[test]
fn test_resolve_dot_output() {
    let ws = TestWorkspace::new().unwrap();
    ws.write_project("db", &with_deps("db", &[])).unwrap();
    ws.write_project("app", &with_deps("app", &["db"])).unwrap();

    ws.devflow("app")
        .args(["resolve", "--dot"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("digraph"))
        .stdout(predicate::str::contains("->"));
}

#[test]
fn test_cycle_fails_unless_allowed() {
    let ws = TestWorkspace::new().unwrap();
    ws.write_project("a", &with_deps("a", &["b"])).unwrap();
    ws.write_project("b", &with_deps("b", &["a"])).unwrap();
    ws.write_project("app", &with_deps("app", &["a"])).unwrap();

    ws.devflow("app")
        .arg("resolve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--allow-cyclic"));

    ws.devflow("app").args(["resolve", "--allow-cyclic"]).assert().success();
}

#[test]
fn test_missing_config_is_reported() {
    let ws = TestWorkspace::new().unwrap();
    std::fs::create_dir_all(ws.root().join("empty")).unwrap();

    ws.devflow("empty")
        .arg("build")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("devflow.yaml"));
}

#[test]
fn test_build_without_images() {
    let ws = TestWorkspace::new().unwrap();
    ws.write_project("db", &with_deps("db", &[])).unwrap();
    ws.write_project("app", &with_deps("app", &["db"])).unwrap();

    ws.devflow("app")
        .args(["build", "--skip-push"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No images were built"));
}

#[test]
fn test_resolve_fires_dependency_hooks() {
    let ws = TestWorkspace::new().unwrap();
    ws.write_project("db", &with_deps("db", &[])).unwrap();
    let app = format!(
        "{}hooks:\n  - events: [\"before:resolveDependencies\", \"after:resolveDependency:db\", \"after:resolveDependencies\"]\n    command: echo \"$DEVFLOW_HOOK_EVENT\" >> ../events.txt\n",
        with_deps("app", &["db"])
    );
    ws.write_project("app", &app).unwrap();

    ws.devflow("app").arg("resolve").assert().success();

    let events: Vec<String> = ws.read("events.txt").unwrap().lines().map(str::to_string).collect();
    assert_eq!(
        events,
        vec!["before:resolveDependencies", "after:resolveDependency:db", "after:resolveDependencies"]
    );
}
