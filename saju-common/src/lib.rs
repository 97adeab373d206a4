//! Shared library for the saju services
//!
//! Holds the pieces every saju binary needs: the common error type,
//! TOML configuration loading, SQLite schema setup, session signature
//! helpers and a few small time/id utilities.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod time;

pub use error::{Error, Result};
