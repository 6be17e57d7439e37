//! Two-layer entity store.
//!
//! A project is backed by a writable overlay [`Layer`] and an optional
//! read-only static [`Layer`]. [`Root`] and [`Run`] expose the merged view,
//! [`find_matches`] selects entities by URI pattern.

pub mod codec;
pub mod error;
pub mod layer;
pub mod layout;
pub mod matcher;
pub mod resolver;
pub mod root;

pub use codec::{CodecRegistry, EntityCodec, Payload};
pub use error::{StoreError, StoreResult};
pub use layer::{Layer, LocalLayer, MemoryLayer};
pub use matcher::find_matches;
pub use resolver::{LayerResolver, Presence};
pub use root::{Entity, EntityLocation, Root, Run, VoxelSpacing};
