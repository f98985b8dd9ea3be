//! Session runtime for a Telegram client engine.
//!
//! The engine is an asynchronous RPC endpoint: it accepts `@type`-tagged
//! requests and emits replies and unsolicited updates on a single ordered
//! stream. This crate turns that stream into request/response semantics and
//! tracks the authorization handshake in front of it.
//!
//! # Layers
//!
//! - [`transport`]: framed byte pipe to the engine process
//! - [`correlator`]: pairs calls with replies through `@extra` tokens
//! - [`dispatcher`]: single reader of the stream, routes every frame
//! - [`coordinator`]: readiness gate, credentials, retries, lifecycle
//!
//! # Example
//!
//! ```ignore
//! let (process, parts) = ClientProcess::launch(&ClientCommand::new("tdjson-pipe")).await?;
//! let coordinator = Coordinator::initialize(config, parts)?;
//! coordinator.supply_phone_number("+15551234567").await?;
//! coordinator.supply_code("12345").await?;
//! let me = coordinator.call("getMe", json!({}), None).await?;
//! ```

mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod correlator;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod updates;

pub use config::{Credentials, RetryPolicy, SessionConfig, Timeouts};
pub use coordinator::{Coordinator, Health};
pub use driver::{ClientCommand, ClientProcess};
pub use error::{Error, Result};
pub use tg_protocol::{Event, SessionState};
pub use transport::{PipeTransport, Transport, TransportParts, TransportReceiver};
pub use updates::UpdateQueue;
