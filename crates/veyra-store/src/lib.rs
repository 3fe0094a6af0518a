pub mod checkpoint;

pub use checkpoint::{CheckpointRecord, SqliteStateStore};
