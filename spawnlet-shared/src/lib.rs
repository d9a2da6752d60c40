//! Types shared between the spawnlet library and its binaries.

pub mod errors;

pub use errors::{SpawnletError, SpawnletResult, TaskFailure};
