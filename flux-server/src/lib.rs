//! Flux messaging server library.
//!
//! Exposes the server for use in tests and embedding. The server accepts
//! authenticated WebSocket connections, registers them per user, persists
//! inbound chat messages and fans them out to the recipient's live
//! connections through a single dispatch hub.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod intake;
pub mod registry;
pub mod server;
