//! Client-side ingestion and query pipelines for the Data Platform.
//!
//! Two independent end-user entry points compose the modules below:
//! [`ingestion_facade::IngestionFacade`] for the write path (registers a
//! provider, decomposes and transmits frames, reports per-request outcomes)
//! and [`query_facade::QueryFacade`] for the read path (decomposes a request,
//! recovers and correlates responses, assembles a typed [`table::ResultTable`]).
//!
//! Connection/TLS setup, configuration-file loading, and log sink
//! initialization are external collaborators; see [`stub_factory`] and
//! [`config`] for the seams this crate exposes to them.

pub mod assembler;
pub mod buffer;
pub mod cancel;
pub mod config;
pub mod correlator;
pub mod decomposer;
pub mod error;
pub mod frame;
pub mod frame_processor;
pub mod ingestion_channel;
pub mod ingestion_facade;
pub mod query_facade;
pub mod recoverer;
pub mod request;
pub mod stub_factory;
pub mod table;
pub mod types;
pub mod wire;

pub use config::{ClientConfig, ConnectionConfig, IngestConfig, QueryConfig};
pub use error::{DpError, DpResult, RequestOutcome};
pub use frame::{Frame, FrameColumn};
pub use ingestion_facade::IngestionFacade;
pub use query_facade::QueryFacade;
pub use request::{Request, RequestBuilder};
pub use table::ResultTable;
pub use types::{ScalarValue, SupportedType, Timebase, TimestampList, TypedColumn, UniformClock};
