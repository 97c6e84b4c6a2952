//! Core types shared by every layer
//!
//! - ClientId: 8-byte big-endian identifier that opens every connection
//! - read_client_id: bounded header decode

pub mod client_id;

pub use client_id::{read_client_id, ClientId, HeaderError};
