//! Nzbstream Web - streaming endpoint and JSON API
//!
//! Serves `/stream` by resolving a request hash through the acquisition
//! service and relaying the file from the remote filesystem with range
//! support. Anything that goes wrong is answered with the failure video so
//! media players show a message instead of choking on an error body.

pub mod fallback;
pub mod handlers;
pub mod proxy;
pub mod server;

// Re-export main types
pub use fallback::{FAILURE_HEADER, FailureStream};
pub use proxy::{StreamingProxy, UpstreamError};
pub use server::{AppState, build_router, build_state, run_server};
