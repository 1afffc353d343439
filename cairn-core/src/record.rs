//! Types for recording values obtained during training and evaluation.
//!
//! A [`Record`] maps names to [`RecordValue`]s. Learners return one per update,
//! the [`Trainer`](crate::Trainer) adds environment statistics to it and
//! hands it to an [`AggregateRecorder`], which aggregates the stored records
//! when flushed.
//!
//! ```rust
//! use cairn_core::record::{Record, RecordValue};
//!
//! let mut record = Record::from_scalar("loss", 0.5);
//! record.insert("episode_return", RecordValue::Scalar(1.0));
//! assert_eq!(record.get_scalar("loss").unwrap(), 0.5);
//! ```
mod base;
mod buffered_recorder;
mod log_recorder;
mod null_recorder;
mod recorder;
mod storage;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use log_recorder::LogRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::{AggregateRecorder, Recorder};
pub use storage::RecordStorage;
