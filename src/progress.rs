//! Progress-callback trait for per-request ingestion events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive events
//! as a request moves through its states and as images are persisted.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ingest::{IngestConfig, IngestProgressCallback, ProcessingState};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl IngestProgressCallback for Printer {
//!     fn on_state_change(&self, document_id: &str, state: ProcessingState) {
//!         eprintln!("{document_id}: {state}");
//!     }
//! }
//!
//! let config = IngestConfig::builder()
//!     .progress_callback(Arc::new(Printer))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ProcessingState;
use std::sync::Arc;

/// Called by the orchestrator as a request advances.
///
/// Implementations must be `Send + Sync`; concurrent requests may share one
/// callback. All methods have default no-op implementations.
pub trait IngestProgressCallback: Send + Sync {
    /// Called on every state transition, including the terminal one.
    fn on_state_change(&self, document_id: &str, state: ProcessingState) {
        let _ = (document_id, state);
    }

    /// Called after an image has been written to durable storage.
    fn on_image_persisted(&self, key: &str, url: &str) {
        let _ = (key, url);
    }

    /// Called when an image could not be fetched or stored and was left out.
    fn on_image_skipped(&self, reference: &str, error: &str) {
        let _ = (reference, error);
    }

    /// Called once the Markdown has been persisted.
    fn on_complete(&self, document_id: &str, markdown_url: &str, image_count: usize) {
        let _ = (document_id, markdown_url, image_count);
    }

    /// Called when the request aborts.
    fn on_failed(&self, document_id: &str, error: &str) {
        let _ = (document_id, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<ProcessingState>>,
        skipped: Mutex<Vec<String>>,
    }

    impl IngestProgressCallback for Recorder {
        fn on_state_change(&self, _document_id: &str, state: ProcessingState) {
            self.states.lock().unwrap().push(state);
        }

        fn on_image_skipped(&self, reference: &str, _error: &str) {
            self.skipped.lock().unwrap().push(reference.to_string());
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_state_change("doc", ProcessingState::Received);
        cb.on_image_persisted("k", "u");
        cb.on_image_skipped("r", "boom");
        cb.on_complete("doc", "u", 0);
        cb.on_failed("doc", "boom");
    }

    #[test]
    fn recorder_receives_events_through_arc_dyn() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();
        cb.on_state_change("doc", ProcessingState::Received);
        cb.on_state_change("doc", ProcessingState::Done);
        cb.on_image_skipped("http://x/a.png", "404");

        assert_eq!(
            *rec.states.lock().unwrap(),
            vec![ProcessingState::Received, ProcessingState::Done]
        );
        assert_eq!(rec.skipped.lock().unwrap().len(), 1);
    }
}
