//! RackHD bridge - AMQP commands in, RackHD HTTP calls out
//!
//! This crate consumes command messages from a topic exchange, runs each one
//! against the RackHD API (or waits for a RackHD event), and publishes one
//! correlated reply per command.

pub mod actions;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod rackhd;
pub mod reply;
pub mod server;

pub use config::Config;
pub use dispatcher::{DispatchError, Dispatcher};
pub use server::Server;
