//! Test utilities for the Stowage engine.
//!
//! - [`MockTransport`] - in-memory content server that records every request
//! - [`RecordingHost`] - archive host that logs calls and can hold scene
//!   transitions open
//! - [`ContentFixture`] - temporary build-in, download and temp directories
//!   with helpers to write archives, manifests and version files
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stowage_test_utils::{ContentFixture, MockTransport, RecordingHost};
//!
//! let fixture = ContentFixture::new();
//! let transport = Arc::new(MockTransport::new());
//! let host = Arc::new(RecordingHost::new());
//! let engine = fixture.engine(fixture.config(), transport, host.clone());
//! assert!(host.calls().is_empty());
//! engine.shutdown();
//! ```

mod fixture;
mod host;
mod transport;

pub use fixture::{ContentFixture, REMOTE_BASE};
pub use host::{HostCall, RecordingHost};
pub use transport::{MockTransport, RecordedRequest};
