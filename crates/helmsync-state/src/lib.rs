//! helmsync-state: release records and cluster backends
//!
//! This crate is the persistence and cluster-access layer of helmsync. It
//! defines the release records shared by every layer and the
//! `ReleaseBackend` trait through which all cluster I/O happens.
//!
//! ## Layer 0 - Data/Cluster access
//!
//! Focus: revision history integrity and reversible resource writes.
//!
//! ## Key Components
//!
//! - `ReleaseBackend`: install/upgrade/history/compensation primitives
//! - `ReleaseRevision`: one apply attempt with its status
//! - `MemoryReleaseBackend`: in-memory fake with fault injection
//! - `FsReleaseBackend`: JSON-file backend used by the CLI

pub mod backend;
mod error;
pub mod fakes;
mod fs_backend;
pub mod materialize;
mod schema;

pub use backend::{BackendResult, ReleaseBackend};
pub use error::BackendError;
pub use fs_backend::FsReleaseBackend;
pub use schema::{
    ApplyPayload, LiveState, ReleaseId, ReleaseRevision, ReleaseSpec, ResourceChange,
    RevisionStatus, SpecDigest,
};
