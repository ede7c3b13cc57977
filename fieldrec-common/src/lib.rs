//! # fieldrec common library
//!
//! Shared code for the field-recording services:
//! - Common error type
//! - TOML configuration model and discovery
//! - Atomic file writes for persisted state

pub mod config;
pub mod error;
pub mod fs;

pub use error::{Error, Result};
