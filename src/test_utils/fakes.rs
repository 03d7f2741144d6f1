//! In-process stand-ins for hooks and image builders.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::build::builder::{BuildContext, BuildHelper, BuildOutcome, BuilderFactory, ImageBuilder};
use crate::config::BuilderKind;
use crate::hooks::{HookExecutor, HookPayload};

/// Records every fired hook event, optionally failing some of them.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl RecordingHooks {
    /// Hooks for the named events are recorded, then fail.
    pub fn failing(events: &[&str]) -> Self {
        Self {
            events: Mutex::default(),
            failing: events.iter().map(|event| event.to_string()).collect(),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl HookExecutor for RecordingHooks {
    async fn execute(&self, event: &str, _payload: &HookPayload) -> Result<()> {
        self.events.lock().unwrap().push(event.to_string());
        if self.failing.contains(event) {
            bail!("hook for {event} exited with status 1");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakeState {
    failing: HashSet<String>,
    builds: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Creates builders that pretend to build for a short while.
///
/// Rebuild checks go through the real [`BuildHelper::should_rebuild`], so the
/// cache behaves as it does with a real engine.
#[derive(Debug, Default)]
pub struct FakeFactory {
    state: Arc<FakeState>,
}

impl FakeFactory {
    /// Builds of the named image configs fail.
    pub fn failing(names: &[&str]) -> Self {
        Self {
            state: Arc::new(FakeState {
                failing: names.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            }),
        }
    }

    /// Config names of the images built so far, in completion order.
    pub fn builds(&self) -> Vec<String> {
        self.state.builds.lock().unwrap().clone()
    }

    /// Highest number of builds that ran at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuilderFactory for FakeFactory {
    async fn create(&self, helper: BuildHelper) -> Result<Box<dyn ImageBuilder>> {
        Ok(Box::new(FakeBuilder {
            helper,
            state: self.state.clone(),
        }))
    }
}

struct FakeBuilder {
    helper: BuildHelper,
    state: Arc<FakeState>,
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    fn engine(&self) -> BuilderKind {
        BuilderKind::Docker
    }

    fn helper(&self) -> &BuildHelper {
        &self.helper
    }

    async fn should_rebuild(&self, ctx: &BuildContext, force: bool) -> Result<bool> {
        self.helper.should_rebuild(ctx, force, None).await
    }

    async fn build(&self, _ctx: &BuildContext) -> Result<BuildOutcome> {
        let running = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let name = &self.helper.config_name;
        if self.state.failing.contains(name) {
            bail!("simulated failure building {name}");
        }
        self.state.builds.lock().unwrap().push(name.clone());
        Ok(BuildOutcome::default())
    }
}
