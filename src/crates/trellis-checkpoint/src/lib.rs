//! # trellis-checkpoint - checkpoint storage for hosted graphs
//!
//! Data model and storage abstraction for the checkpoints a trellis server
//! records while executing graph runs. A checkpoint is a snapshot of a
//! thread's state at one step, addressed by
//! `(thread_id, checkpoint_ns, checkpoint_id)`.
//!
//! The crate provides:
//!
//! - [`Checkpoint`], [`CheckpointRef`], [`CheckpointMetadata`],
//!   [`CheckpointTuple`] - the persisted shapes
//! - [`Checkpointer`] - the async storage trait backends implement
//! - [`InMemoryCheckpointer`] - the reference implementation used in
//!   development and tests
//!
//! The hosting server treats stored payloads as opaque apart from the
//! `values`, `next` and `tasks` fields, which drive thread status
//! derivation and interrupt reporting.

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointId, CheckpointMetadata, CheckpointRef, CheckpointSource, CheckpointTask,
    CheckpointTuple, PendingWrite,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointer;
pub use traits::Checkpointer;
