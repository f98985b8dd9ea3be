//! Wire types for the Telegram client JSON interface.
//!
//! This crate contains the serde-serializable shapes exchanged with the
//! external client engine: outbound requests, inbound frames classified into
//! [`UpdateEnvelope`]s, the authorization states the engine reports, and the
//! parameter block sent during the handshake.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No I/O, no async, no knowledge of pending calls
//! - **Closed**: Every frame the coordinator consumes maps to one variant
//! - **Forward-compatible**: Frames nobody asked about become [`Event`]s

pub mod authorization;
pub mod envelope;
pub mod methods;
pub mod params;

pub use authorization::SessionState;
pub use envelope::{
	CorrelationToken, EnvelopeError, Event, RemoteError, Request, UpdateEnvelope,
};
pub use params::{DeviceInfo, TdlibParameters};
