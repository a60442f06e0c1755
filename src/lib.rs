//! `payoutd`: bridges a banknote validator and a coin hopper speaking SSP
//! v6 to a redis-backed JSON request/response and event bus.

pub mod bus;
pub mod command_session;
pub mod config;
pub mod daemon;
pub mod device;
pub mod error;
pub mod poll_loop;
pub mod protocol;
pub mod router;
pub mod serial_link;
