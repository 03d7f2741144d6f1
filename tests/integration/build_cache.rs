//! Orchestrator and rebuild cache working together on a project on disk

use std::sync::Arc;

use devflow_cli::build::hash::hash_file;
use devflow_cli::build::{BuildOptions, BuildRuntime, BuiltImages, LocalCache};
use devflow_cli::interrupt::InterruptRegistry;
use devflow_cli::kube::LocalContexts;
use devflow_cli::test_utils::{FakeFactory, write_image_project};
use devflow_cli::utils::output::OutputSink;
use tempfile::TempDir;

fn runtime(factory: Arc<FakeFactory>) -> BuildRuntime {
    BuildRuntime {
        factory,
        kube: None,
        local_contexts: LocalContexts::default(),
        interrupts: InterruptRegistry::new(),
    }
}

#[tokio::test]
async fn test_single_slot_builds_one_at_a_time() {
    devflow_cli::test_utils::init_test_logging(None);
    let temp = TempDir::new().unwrap();
    let config = Arc::new(write_image_project(temp.path(), &["api", "worker"]).unwrap());
    let factory = Arc::new(FakeFactory::default());

    let options = BuildOptions {
        tags: vec!["ci-1".to_string()],
        max_concurrent_builds: 1,
        ..Default::default()
    };
    let mut registry = BuiltImages::new();
    runtime(factory.clone())
        .build_project(temp.path(), config, &options, OutputSink::discard(), &mut registry)
        .await
        .unwrap();

    assert_eq!(registry.get("api").unwrap().reference(), "registry.example.com/api:ci-1");
    assert_eq!(registry.get("worker").unwrap().reference(), "registry.example.com/worker:ci-1");
    assert_eq!(factory.max_in_flight(), 1);
}

#[tokio::test]
async fn test_dockerfile_change_triggers_rebuild_and_persists_hash() {
    devflow_cli::test_utils::init_test_logging(None);
    let temp = TempDir::new().unwrap();
    let config = Arc::new(write_image_project(temp.path(), &["api"]).unwrap());
    let factory = Arc::new(FakeFactory::default());
    let runtime = runtime(factory.clone());
    let dockerfile = temp.path().join("api.Dockerfile");
    let options = BuildOptions {
        tags: vec!["v1".to_string()],
        ..Default::default()
    };

    runtime
        .build_project(temp.path(), config.clone(), &options, OutputSink::discard(), &mut BuiltImages::new())
        .await
        .unwrap();
    let first_hash = hash_file(&dockerfile).unwrap();
    let cache = LocalCache::load(LocalCache::path_for(temp.path())).unwrap();
    assert_eq!(cache.image("api").dockerfile_hash, first_hash);

    // Nothing changed: no build.
    let built = runtime
        .build_project(temp.path(), config.clone(), &options, OutputSink::discard(), &mut BuiltImages::new())
        .await
        .unwrap();
    assert!(built.is_empty());
    assert_eq!(factory.builds().len(), 1);

    std::fs::write(&dockerfile, "FROM alpine:3.20\nRUN echo changed\n").unwrap();
    let built = runtime
        .build_project(temp.path(), config, &options, OutputSink::discard(), &mut BuiltImages::new())
        .await
        .unwrap();
    assert_eq!(built.len(), 1);
    assert_eq!(factory.builds().len(), 2);

    let second_hash = hash_file(&dockerfile).unwrap();
    assert_ne!(first_hash, second_hash);
    let cache = LocalCache::load(LocalCache::path_for(temp.path())).unwrap();
    assert_eq!(cache.image("api").dockerfile_hash, second_hash);
    assert_eq!(cache.image("api").tag, "v1");
}

#[tokio::test]
async fn test_failed_build_does_not_persist_cache() {
    let temp = TempDir::new().unwrap();
    let config = Arc::new(write_image_project(temp.path(), &["api"]).unwrap());
    let factory = Arc::new(FakeFactory::failing(&["api"]));

    let result = runtime(factory)
        .build_project(temp.path(), config, &BuildOptions::default(), OutputSink::discard(), &mut BuiltImages::new())
        .await;

    assert!(result.is_err());
    assert!(!LocalCache::path_for(temp.path()).exists());
}
