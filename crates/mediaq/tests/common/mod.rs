//! Shared test utilities for mediaq integration tests.
//!
//! - `TestHarness`: a file-backed store in a temp directory plus queue,
//!   tracker and dispatcher wired to scripted backends
//! - scripted fake backends implementing the strategy traits

pub mod fakes;
pub mod harness;

pub use fakes::{Reply, ScriptedSummarizer, ScriptedTranscriber};
pub use harness::TestHarness;
