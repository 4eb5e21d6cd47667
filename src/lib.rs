//! # Sockrelay - Endpoint Establishment for a Socket Relay
//!
//! Sockrelay turns address specifications such as `tcp:example.com:9000` or
//! `udp6-listen:5353` into established IP endpoints. It resolves names, binds
//! local addresses (optionally searching a source port range), connects with
//! retries and back-off, and can keep connecting while every established
//! session runs in its own task.
//!
//! ## Features
//!
//! - **Connect with retries**: refused connections are retried immediately,
//!   other transient failures after an interval, fatal ones never
//! - **Source port ranges**: random start, downward sweep with wrap-around
//! - **Fork mode**: each connection becomes an independent session task
//! - **Phased socket options**: applied before bind and after connect
//! - **Listen preparation**: local address resolution for an acceptor
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sockrelay::config::load_config;
//! use sockrelay::controller::{run_target, Collaborators};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("sockrelay.toml")?;
//!     let target = "tcp:example.com:9000".parse()?;
//!     let collaborators: Collaborators = my_collaborators();
//!
//!     run_target(&target, &config.endpoint, &collaborators, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Target -> ListenController -> Acceptor
//! Target -> ConnectController -> Resolver -> Transport (bind, connect) -> Finalizer
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bind;
pub mod config;
pub mod controller;
pub mod error;
pub mod helper;
pub mod options;
pub mod retry;
pub mod session;
pub mod target;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use controller::{run_target, Collaborators, ConnectController, ListenController};
pub use error::{RelayError, Result};
pub use target::Target;

/// Version of the Sockrelay library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
