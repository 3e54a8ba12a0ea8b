//! Filament Common Types and Adapters
//!
//! This crate provides the protocol definitions and the pluggable adapter
//! seams shared by every Filament component.
//!
//! # Overview
//!
//! Filament is a service-mesh runtime: a set of broker processes (nodes) that
//! announce the services they host, watch each other through heartbeats, and
//! route calls to healthy instances. This crate contains everything those
//! processes have in common:
//!
//! - **Protocol Layer**: call request/response types, gossip packets and the
//!   error taxonomy
//! - **Serializer**: pluggable wire encoding (JSON today)
//! - **Transport Adapters**: the [`transport::Transporter`] seam plus the
//!   built-in TCP and null implementations
//! - **Cache Adapters**: the [`cache::Cacher`] seam plus the built-in memory
//!   and null implementations
//!
//! # Wire Format
//!
//! The built-in TCP transport frames every packet as
//! `[1-byte packet kind] + [4-byte length prefix as u32 big-endian] + [payload]`,
//! with payloads encoded by the configured [`serializer::Serializer`].
//! Frames are capped at 100 MB.
//!
//! # Example
//!
//! ```
//! use filament_common::{CallRequest, CallResponse};
//! use serde_json::json;
//!
//! // Create a call request
//! let request = CallRequest::new("math", "add", json!({"a": 2, "b": 3}))
//!     .with_timeout(5000);
//!
//! // Process and create a response
//! let response = CallResponse::success(request.id, json!(5));
//! ```

pub mod cache;
pub mod protocol;
pub mod serializer;
pub mod transport;

pub use protocol::*;
