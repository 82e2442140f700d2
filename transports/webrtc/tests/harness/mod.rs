//! Mesh test harness
//!
//! Provides infrastructure for driving the mesh without real networking:
//! - Recording signal sink and scripted relay connector
//! - Fake media links whose health the test controls
//! - A [`MeshFixture`] that feeds inputs to an orchestrator step by step
//!
//! Basic usage pattern:
//!
//! 1. Create a `MeshFixture` with the local identity
//! 2. Join and feed relay messages with `fixture.signal(...)`
//! 3. Drive link health through `fixture.factory.latest(peer)`
//! 4. Call `fixture.pump()` (or `next_input()` for timers) and assert

#![allow(dead_code)]

pub mod fakes;
pub mod loopback;
pub mod mesh;

use std::time::Duration;
use tokio::sync::mpsc;
use voicemesh_webrtc::MeshEvent;

pub use fakes::{FailingCapture, FakeLink, FakeLinkFactory, RecordingSink};
pub use loopback::LoopbackConnector;
pub use mesh::MeshFixture;

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Stream closed: {0}")]
    Closed(String),
}

/// Initialize test logging (safe to call from every test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,voicemesh_webrtc=debug")
        .with_test_writer()
        .try_init();
}

/// Wait for the first mesh event matching `pred`, skipping others
pub async fn wait_for_event<F>(
    events: &mut mpsc::UnboundedReceiver<MeshEvent>,
    timeout: Duration,
    mut pred: F,
) -> HarnessResult<MeshEvent>
where
    F: FnMut(&MeshEvent) -> bool,
{
    let result = tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;

    match result {
        Ok(Some(event)) => Ok(event),
        Ok(None) => Err(HarnessError::Closed("mesh events".to_string())),
        Err(_) => Err(HarnessError::Timeout(format!(
            "no matching event within {:?}",
            timeout
        ))),
    }
}
