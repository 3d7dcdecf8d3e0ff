//! HTTP layer of the bridge.
//!
//! This module provides the axum-based server that maps git smart-HTTP
//! requests onto `git upload-pack` / `git receive-pack` helpers, decoding
//! compressed request bodies on the way in and streaming helper output on
//! the way out.

pub mod bridge;
pub mod codec;
pub mod handler;
pub mod pktline;
pub mod router;

#[cfg(test)]
mod tests;
