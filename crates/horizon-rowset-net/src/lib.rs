//! HTTP transport for Horizon Rowset.
//!
//! [`HttpTransport`] implements the engine's [`Transport`](horizon_rowset::Transport)
//! contract with `reqwest` on a `tokio` runtime:
//!
//! - **Load**: `GET <rowset_url>`, with master-detail parameters encoded as
//!   a JSON array in the `params` query argument. The body is a
//!   [`RowsetDoc`](horizon_rowset::RowsetDoc).
//! - **Save**: `POST <rowset_url>` with the JSON
//!   [`ChangeSet`](horizon_rowset::ChangeSet); the body is a
//!   [`SaveResult`](horizon_rowset::SaveResult).
//!
//! Non-success statuses, network failures, timeouts and undecodable bodies
//! are reported as [`TransportError`](horizon_rowset::TransportError) in the
//! completion event.
//!
//! # Delivery
//!
//! Completions never touch the dataset from the runtime's threads. They are
//! queued on a channel and handed over by the thread that owns the dataset:
//!
//! ```ignore
//! use std::sync::Arc;
//! use horizon_rowset::{Nav, NavConfig};
//! use horizon_rowset_net::HttpTransport;
//!
//! let transport = Arc::new(HttpTransport::builder().build()?);
//! let mut nav = Nav::new(NavConfig::default().with_url("https://example.com/rowsets/orders"))
//!     .with_transport(transport.clone());
//! nav.reload()?;
//!
//! // in the event loop
//! transport.deliver(&mut nav);
//! ```

pub mod error;
pub mod transport;

pub use error::{NetError, Result};
pub use transport::{HttpTransport, HttpTransportBuilder, HttpTransportConfig};
