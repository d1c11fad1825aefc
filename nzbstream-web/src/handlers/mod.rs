//! HTTP request handlers organized by functionality

pub mod api;
pub mod range;
pub mod stream;

// Re-export handler functions
pub use api::{PublishResponse, delete_stream, health, inspect_stream, publish_stream};
pub use range::{RangeOutcome, extract_range_header, parse_range_header};
pub use stream::{StreamQuery, stream_media};
