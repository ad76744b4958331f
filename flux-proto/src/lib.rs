//! Shared protocol definitions for the Flux messaging wire format.

pub mod api;
pub mod codec;
pub mod message;
