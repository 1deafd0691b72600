//! Core systems for Horizon Rowset.
//!
//! This crate provides the building blocks the dataset engine is made of:
//!
//! - **Signal/Slot System**: Type-safe change notification ([`Signal`])
//! - **Update Batching**: Reentrant, depth-counted coalescing of change
//!   reports ([`UpdateBatch`])
//! - **Logging**: `tracing` targets per subsystem and [`PerfSpan`] guards
//!
//! # Signal/Slot Example
//!
//! ```
//! use horizon_rowset_core::Signal;
//!
//! let focused_row_changed = Signal::<Option<usize>>::new();
//! let conn_id = focused_row_changed.connect(|row| {
//!     println!("focus moved to {:?}", row);
//! });
//! focused_row_changed.emit(Some(3));
//! focused_row_changed.disconnect(conn_id);
//! ```

pub mod batch;
pub mod logging;
pub mod signal;

pub use batch::{Coalesce, UpdateBatch};
pub use logging::{PerfSpan, targets};
pub use signal::{ConnectionId, Signal};
