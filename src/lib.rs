//! # Bridge Relay
//!
//! Library for the implementation of the cross-chain swap batching relay.

pub mod batch;
pub mod chains;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod serde;
pub mod service;
pub mod spawn;
pub mod storage;
pub mod types;
pub mod wallet;
