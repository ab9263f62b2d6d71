//! Domain models for helmsync.
//!
//! - `RawReleaseConfig` / `build`: the desired state descriptor
//! - `ReconcileReport`: outcome of a reconciliation
//! - Error taxonomy: validation, cluster unreachable, apply, fatal inconsistency

pub mod descriptor;
pub mod error;
pub mod report;

pub use descriptor::{build, release_id, RawReleaseConfig, SetEntry};
pub use error::{
    ApplyError, ClusterUnreachableError, ErrorKind, ReconcileError, Result, ValidationError,
};
pub use report::{aggregate_exit_code, ReconcileAction, ReconcileReport};
