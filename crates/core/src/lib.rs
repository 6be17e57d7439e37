//! `cryocat-core`: pure catalog logic.
//!
//! Entity kinds and identities, the URI grammar and pattern matcher, target
//! templates, project configuration, and the run-name transform. No storage
//! access lives here.

pub mod config;
pub mod error;
pub mod kind;
pub mod picks;
pub mod run_names;
pub mod template;
pub mod uri;

pub use error::CoreError;
pub use kind::{EntityId, EntityKind, Field};
pub use template::{resolve_targets, TargetAssignment, TargetTemplate};
pub use uri::{parse_pattern, UriPattern};
