//! Generated wire types and gRPC client stubs for the Data Platform.
//!
//! Everything in [`pb`] is `prost`/`tonic` codegen output and is treated as
//! an opaque encodable record by `dp-core`: the core pipeline assembles and
//! reads fields on these types but never hand-rolls their wire encoding.

pub mod pb {
    tonic::include_proto!("dataplatform.core.v1");
}

pub use pb::{
    DataColumn, DataTimebase, ExplicitTimebase, FixedIntervalTimebase, FrameDescriptor,
    IngestDataRequest, IngestDataResponse, QueryDataFrame, QueryDataRequest, QueryDataResponse,
    QueryError, RegisterProviderRequest, RegisterProviderResponse, RejectionDetail, ScalarType,
    Timestamp, data_timebase::Kind as DataTimebaseKind,
    ingest_data_response::Outcome as IngestOutcome, query_data_response::Payload as QueryPayload,
};

pub use pb::ingestion_service_client::IngestionServiceClient;
pub use pb::query_service_client::QueryServiceClient;

/// Server-side trait/wrapper pair, primarily for `dp-core`'s in-process
/// mock transports in its integration tests (§10.7); the client entry
/// points above are this crate's real surface.
pub use pb::ingestion_service_server::{IngestionService, IngestionServiceServer};
pub use pb::query_service_server::{QueryService, QueryServiceServer};

/// Convenience conversion from a `std::time::SystemTime` to the wire timestamp form.
impl From<std::time::SystemTime> for Timestamp {
    fn from(value: std::time::SystemTime) -> Self {
        let duration = value
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            epoch_seconds: duration.as_secs() as i64,
            nanos: duration.subsec_nanos(),
        }
    }
}

impl From<Timestamp> for std::time::SystemTime {
    fn from(value: Timestamp) -> Self {
        std::time::UNIX_EPOCH
            + std::time::Duration::new(value.epoch_seconds.max(0) as u64, value.nanos)
    }
}
