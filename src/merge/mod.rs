//! The Merge Coordinator: serializes worker branches into mainline.

pub mod coordinator;

pub use coordinator::{FailedMerge, MergeCoordinator, MergeCounters, StashPopWarning};
