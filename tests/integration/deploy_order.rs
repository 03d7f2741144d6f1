//! Deploy order across a diamond of dependencies

use predicates::prelude::*;

use super::common::TestWorkspace;

/// Project whose deployment appends its name to `<workspace>/order.txt`.
fn project(deps: &[&str], name: &str) -> String {
    let mut config = format!("name: {name}\n");
    if !deps.is_empty() {
        config.push_str("dependencies:\n");
        for dep in deps {
            config.push_str(&format!("  - name: {dep}\n    source:\n      path: ../{dep}\n"));
        }
    }
    config.push_str(&format!("deployments:\n  - name: {name}\n    command: echo {name} >> ../order.txt\n"));
    config
}

#[test]
fn test_diamond_deploys_shared_dependency_once_and_first() {
    let ws = TestWorkspace::new().unwrap();
    ws.write_project("dep1", &project(&[], "dep1")).unwrap();
    ws.write_project("dep2", &project(&["dep1"], "dep2")).unwrap();
    ws.write_project("root", &project(&["dep1", "dep2"], "root")).unwrap();

    ws.devflow("root").arg("deploy").assert().success();

    let order: Vec<String> = ws.read("order.txt").unwrap().lines().map(str::to_string).collect();
    assert_eq!(order, vec!["dep1", "dep2", "root"]);
}

#[test]
fn test_skip_dependency_filter() {
    let ws = TestWorkspace::new().unwrap();
    ws.write_project("dep1", &project(&[], "dep1")).unwrap();
    ws.write_project("dep2", &project(&["dep1"], "dep2")).unwrap();
    ws.write_project("root", &project(&["dep2"], "root")).unwrap();

    ws.devflow("root").args(["deploy", "--skip-dependency", "dep2.dep1"]).assert().success();

    let order: Vec<String> = ws.read("order.txt").unwrap().lines().map(str::to_string).collect();
    assert_eq!(order, vec!["dep2", "root"]);
}

#[test]
fn test_failing_dependency_stops_deploy() {
    let ws = TestWorkspace::new().unwrap();
    ws.write_project(
        "broken",
        "name: broken\ndeployments:\n  - name: broken\n    command: echo rollout failed; exit 3\n",
    )
    .unwrap();
    ws.write_project("root", &project(&["broken"], "root")).unwrap();

    ws.devflow("root")
        .arg("deploy")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("deploy dependency broken failed"))
        .stderr(predicate::str::contains("rollout failed"));

    assert!(ws.read("order.txt").is_err());
}

#[test]
fn test_dependency_hooks_fire_around_deploy() {
    let ws = TestWorkspace::new().unwrap();
    ws.write_project("dep1", &project(&[], "dep1")).unwrap();
    let root = format!(
        "{}hooks:\n  - events: [\"before:deployDependencies\", \"after:deployDependency:dep1\"]\n    command: echo \"hook $DEVFLOW_HOOK_EVENT\" >> ../order.txt\n",
        project(&["dep1"], "root")
    );
    ws.write_project("root", &root).unwrap();

    ws.devflow("root").arg("deploy").assert().success();

    let order: Vec<String> = ws.read("order.txt").unwrap().lines().map(str::to_string).collect();
    assert_eq!(
        order,
        vec![
            "hook before:deployDependencies",
            "dep1",
            "hook after:deployDependency:dep1",
            "root",
        ]
    );
}
