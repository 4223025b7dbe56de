//! `coda-core` — shared types, configuration, and errors for the Coda
//! voice-assistant core.
//!
//! Every other crate in the workspace depends on this one. It carries no
//! runtime machinery of its own: just the conversation data model
//! ([`types::Turn`], [`types::Role`]), the merged TOML + env configuration
//! ([`config::CodaConfig`]), the workspace-wide error enum
//! ([`error::CodaError`]), and the on-disk data layout helpers
//! ([`paths`]).

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use error::{CodaError, Result};
