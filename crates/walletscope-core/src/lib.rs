//! Core types and trait definitions for the walletscope identity graph.
//!
//! This crate is deliberately free of database and CLI dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod aggregate;
pub mod cluster;
pub mod entity;
pub mod error;
pub mod evidence;
pub mod label;
pub mod relationship;
pub mod store;

pub use error::{Error, Result};
