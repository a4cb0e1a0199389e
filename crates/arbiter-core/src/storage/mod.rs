//! Storage layer - JSON snapshots of engine state
//!
//! The engine itself is purely in-memory. Callers that want learning to
//! survive a restart export an [`EngineSnapshot`](crate::routing::EngineSnapshot)
//! and persist it through a [`SnapshotStore`].
//!
//! # Usage
//!
//! ```ignore
//! use arbiter_core::storage::SnapshotStore;
//!
//! let store = SnapshotStore::in_dir(state_dir);
//! store.save(&engine.export())?;
//!
//! if let Some(snapshot) = store.load()? {
//!     engine.import(snapshot)?;
//! }
//! ```

pub mod snapshot;

pub use snapshot::{SNAPSHOT_FILE, SnapshotStore};
