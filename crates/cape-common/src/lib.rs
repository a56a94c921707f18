//! Cape Common Types and Utilities
//!
//! Shared types, configuration, and error handling for the Cape RLS engine.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{CapeConfig, RlsConfig};
pub use error::{Error, Result};
pub use types::{Action, Subject, SubjectContext, Value};
