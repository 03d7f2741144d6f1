//! devflow - developer workflow orchestrator
//!
//! devflow resolves a tree of sub-project dependencies declared in `devflow.yaml`
//! files, runs build and deploy actions across that tree children-first, and builds
//! container images with bounded concurrency while skipping images whose inputs did
//! not change since the last successful build.
//!
//! # Architecture Overview
//!
//! - A project declares images, dependencies (git or local path sources), hooks and
//!   deployment commands in `devflow.yaml`
//! - Dependencies are identified by a canonical ID; the same ID reached from two
//!   parents becomes one shared node in the dependency graph
//! - Execution walks the graph children-first and runs every node exactly once
//! - Image builds record content hashes in `.devflow/cache.yaml` so unchanged images
//!   are not rebuilt
//!
//! # Core Modules
//!
//! - [`graph`] - Arena DAG with cycle-safe edge insertion
//! - [`dependency`] - Canonical IDs, source materialization, resolver, execution manager
//! - [`build`] - Rebuild decisions, persisted cache, builder backends, build orchestrator
//! - [`hooks`] - Lifecycle hook execution
//! - [`interrupt`] - Cleanup registry driven by termination signals
//! - [`deploy`] - Deployment command execution
//!
//! ## Supporting Modules
//! - [`config`] - Project config (`devflow.yaml`) and global settings (`~/.devflow/config.toml`)
//! - [`core`] - Error types and user-facing error formatting
//! - [`git`] - Git operations wrapper using the system git command
//! - [`kube`] - Cluster context helpers
//! - [`utils`] - Process execution, filesystem and output helpers
//!
//! # Project Format (devflow.yaml)
//!
//! ```yaml
//! name: frontend
//! images:
//!   web:
//!     image: registry.example.com/web
//!     dockerfile: Dockerfile
//!     context: .
//! dependencies:
//!   - name: api
//!     source:
//!       git: https://github.com/example/api.git
//!       branch: main
//!   - name: shared
//!     source:
//!       path: ../shared
//! hooks:
//!   - events: ["before:build"]
//!     command: ./scripts/prepare.sh
//! deployments:
//!   - name: app
//!     command: kubectl apply -f k8s/
//! ```

pub mod build;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod dependency;
pub mod deploy;
pub mod git;
pub mod graph;
pub mod hooks;
pub mod interrupt;
pub mod kube;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
