#![cfg_attr(docsrs, feature(doc_cfg))]
//! Lattice is a hardware signer provider: it pairs with a remote signing
//! device, derives and caches HD addresses through it, and brokers message
//! signing without ever holding key material.
//!
//! # Overview
//!
//! - [`credential`]: origin-checked, token-correlated credential exchange
//!   with an out-of-process pairing agent
//! - [`session`]: single-flight device session state machine
//! - [`address`]: derivation planning and the address cache
//! - [`chain`]: per-chain signing payloads and signature encodings
//! - [`provider`]: the [`LatticeProvider`] façade
//! - [`rpc`]: JSON-RPC collaborator for chain nodes
//!
//! Device SDK access is abstracted behind [`device::DeviceConnector`] and
//! [`device::DeviceClient`], so the crate carries no transport of its own.

pub mod address;
pub mod chain;
pub mod config;
pub mod credential;
pub mod device;
pub mod error;
pub mod path;
pub mod prelude;
pub mod provider;
pub mod rpc;
pub mod session;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use error::{Result, WalletError};
pub use provider::{Backend, LatticeProvider};
