//! # Host Bridge Traits
//!
//! Capabilities the streaming core needs from its host but does not implement
//! itself.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - request/response calls plus streamed
//!   response bodies, used to reach the speech-synthesis service
//! - [`LoggerSink`](logging::LoggerSink) - forward structured logs into a host
//!   logging pipeline
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | Web      | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits report failures through [`BridgeError`](error::BridgeError).
//! Implementations convert platform errors into it and keep enough context
//! (URL, status code) for the caller to build a user-facing message.
//!
//! ## Thread Safety
//!
//! Bridge traits require `Send + Sync` so one implementation can be shared
//! by the engine's network task and the caller.

pub mod error;
pub mod http;
pub mod logging;

pub use error::BridgeError;

pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, StreamingResponse};
pub use logging::{LogEntry, LogLevel, LoggerSink, MemoryLogger};
