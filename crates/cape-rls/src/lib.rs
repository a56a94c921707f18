//! Row Level Security (RLS) Engine
//!
//! Provides policy based row filtering for relational stores:
//! - Policy definition and storage (per resource, action, role)
//! - Ownership and context field conditions
//! - Per-row authorization through a pluggable decision authority
//! - Query rewriting with security predicates
//! - Secure sessions enforcing checks before writes are committed

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod authority;
pub mod authorizer;
pub mod context;
pub mod engine;
pub mod manifest;
pub mod memory;
pub mod policy;
pub mod query;
pub mod record;
pub mod rewriter;
pub mod session;

pub use authority::{AccessControl, DecisionAuthority, DecisionRequest};
pub use authorizer::{CreateTarget, RowAuthorizer};
pub use context::{build_resource_context, ResourceContext};
pub use engine::RowLevelSecurity;
pub use manifest::{Permission, PolicyManifest};
pub use memory::{MemoryDatabase, QueryOutput};
pub use policy::{Policy, PolicyStore};
pub use query::{InsertStatement, Predicate, Query};
pub use record::{Model, Record, Row};
pub use rewriter::QueryRewriter;
pub use session::SecureSession;
