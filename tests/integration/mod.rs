//! Integration test suite for devflow
//!
//! End-to-end tests running the `devflow` binary against projects in temporary
//! directories, plus library-level tests of the build orchestrator with fake
//! builders. No docker daemon or cluster is needed.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **build_cache**: Bounded builds and rebuild cache persistence
//! - **cli**: `resolve` and `build` commands, error reporting
//! - **deploy_order**: Children-first deploys, filters, dependency hooks

mod build_cache;
mod cli;
mod common;
mod deploy_order;
