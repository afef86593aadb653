//! dbrelay-core: shared types for the database change relay
//!
//! - [`event`]: change events decoded from NOTIFY payloads
//! - [`frame`]: JSON frames spoken over the subscriber WebSocket
//! - [`config`]: layered server configuration and process role

pub mod config;
pub mod error;
pub mod event;
pub mod frame;

pub use config::{ProcessRole, RelayConfig, RelaySettings};
pub use error::{ConfigError, PayloadError};
pub use event::{ChangeEvent, Operation};
pub use frame::{ClientFrame, ServerFrame};
