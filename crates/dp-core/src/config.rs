//! Client configuration (§6 and §10.3).
//!
//! Plain, `serde`-deserializable data: loading it from a file, environment,
//! or flag set is out of scope for this crate (§4.8 Non-goals). Callers
//! assemble a [`ClientConfig`] however they like and hand it to the
//! facades; [`ClientConfig::validate`] is the only gate this crate applies.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{DpError, DpResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutUnit {
    Millis,
    Seconds,
}

impl Default for TimeoutUnit {
    fn default() -> Self {
        TimeoutUnit::Seconds
    }
}

/// `connection.tls.*` (§6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub active: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self { active: false }
    }
}

/// `connection.grpc.*` (§6): per-channel transport knobs independent of
/// application-level timeouts in [`ConnectionConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrpcConfig {
    pub use_plain_text: bool,
    pub message_size_max: usize,
    pub keep_alive_without_calls: bool,
    pub gzip: bool,
    pub timeout_limit: u64,
    pub timeout_unit: TimeoutUnit,
}

impl GrpcConfig {
    pub fn timeout(&self) -> Duration {
        match self.timeout_unit {
            TimeoutUnit::Millis => Duration::from_millis(self.timeout_limit),
            TimeoutUnit::Seconds => Duration::from_secs(self.timeout_limit),
        }
    }
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            use_plain_text: true,
            message_size_max: 4 * 1024 * 1024,
            keep_alive_without_calls: false,
            gzip: false,
            timeout_limit: 30,
            timeout_unit: TimeoutUnit::Seconds,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub target_uri: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub tls: TlsConfig,
    pub grpc: GrpcConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            target_uri: "http://localhost:50051".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            tls: TlsConfig::default(),
            grpc: GrpcConfig::default(),
        }
    }
}

/// `ingest.frame.decompose.*` (§6, §4.2).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrameDecomposeConfig {
    pub enabled: bool,
    pub max_bytes: usize,
}

impl Default for FrameDecomposeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: 4 * 1024 * 1024,
        }
    }
}

/// `ingest.processor.*` (§6, §4.2): C4's worker pool shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub concurrency: bool,
    pub worker_count: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: true,
            worker_count: 4,
        }
    }
}

/// `ingest.buffer.*` (§6, §4.1): C3 sizing between the facade and C4.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity: Option<usize>,
    pub backpressure: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: Some(256),
            backpressure: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Upper bound on a single wire frame's estimated byte size (§4.2).
    /// Mirrors `frame.max_bytes`; kept as a top-level field since C4 and C6
    /// read it directly on every call.
    pub max_frame_bytes: usize,
    /// Buffer capacity between the facade and the frame processor (§4.3).
    /// Mirrors `buffer.capacity`.
    pub buffer_capacity: Option<usize>,
    /// Number of concurrent ingestion streams the channel fans out to (§4.5).
    pub stream_count: usize,
    pub frame: FrameDecomposeConfig,
    pub processor: ProcessorConfig,
    pub buffer: BufferConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 4 * 1024 * 1024,
            buffer_capacity: Some(256),
            stream_count: 4,
            frame: FrameDecomposeConfig::default(),
            processor: ProcessorConfig::default(),
            buffer: BufferConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Effective decomposition budget honoring `frame.enabled` (§4.2): when
    /// decomposition is disabled, oversized frames are transmitted whole.
    pub fn effective_max_frame_bytes(&self) -> usize {
        if self.frame.enabled {
            self.max_frame_bytes
        } else {
            usize::MAX
        }
    }

    pub fn effective_worker_count(&self) -> usize {
        if self.processor.concurrency {
            self.processor.worker_count.max(1)
        } else {
            1
        }
    }
}

/// `query.recovery.multistream.*` (§6, §4.6): C8's fan-out decision.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MultistreamConfig {
    pub enabled: bool,
    pub max_streams: usize,
    pub domain_size_min: usize,
}

impl Default for MultistreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_streams: 4,
            domain_size_min: 1,
        }
    }
}

/// `query.recovery.correlate.*` (§6, §4.7): C9's worker mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelateConfig {
    pub concurrency: bool,
    pub while_streaming: bool,
    pub worker_count: usize,
}

impl Default for CorrelateConfig {
    fn default() -> Self {
        Self {
            concurrency: true,
            while_streaming: true,
            worker_count: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub multistream: MultistreamConfig,
    pub correlate: CorrelateConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            multistream: MultistreamConfig::default(),
            correlate: CorrelateConfig::default(),
        }
    }
}

/// `query.request.decompose.*` (§6, §4.5): C7's caps.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestDecomposeConfig {
    pub max_sources: usize,
    pub max_duration: Duration,
}

impl Default for RequestDecomposeConfig {
    fn default() -> Self {
        Self {
            max_sources: 64,
            max_duration: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub max_sources_per_request: usize,
    pub max_duration_per_request: Duration,
    /// Number of concurrent recovery streams the query pipeline runs (§4.7).
    /// Mirrors `recovery.multistream.max_streams`.
    pub recovery_stream_count: usize,
    pub recovery: RecoveryConfig,
    pub request: RequestDecomposeConfig,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_sources_per_request: 64,
            max_duration_per_request: Duration::from_secs(3600),
            recovery_stream_count: 4,
            recovery: RecoveryConfig::default(),
            request: RequestDecomposeConfig::default(),
        }
    }
}

impl QueryConfig {
    /// Effective recovery fan-out, honoring `recovery.multistream.enabled`
    /// and the domain-size floor below which fanning out isn't worthwhile.
    pub fn effective_stream_count(&self, domain_size: usize) -> usize {
        if self.recovery.multistream.enabled && domain_size >= self.recovery.multistream.domain_size_min {
            self.recovery_stream_count.max(1)
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub ingest: IngestConfig,
    pub query: QueryConfig,
}

impl ClientConfig {
    pub fn validate(&self) -> DpResult<()> {
        if self.ingest.max_frame_bytes == 0 {
            return Err(DpError::configuration(
                "ingest.max_frame_bytes must be greater than zero",
            ));
        }
        if self.ingest.stream_count == 0 {
            return Err(DpError::configuration(
                "ingest.stream_count must be greater than zero",
            ));
        }
        if self.ingest.processor.worker_count == 0 {
            return Err(DpError::configuration(
                "ingest.processor.worker_count must be greater than zero",
            ));
        }
        if self.query.max_sources_per_request == 0 {
            return Err(DpError::configuration(
                "query.max_sources_per_request must be greater than zero",
            ));
        }
        if self.query.recovery_stream_count == 0 {
            return Err(DpError::configuration(
                "query.recovery_stream_count must be greater than zero",
            ));
        }
        if self.query.recovery.correlate.worker_count == 0 {
            return Err(DpError::configuration(
                "query.recovery.correlate.worker_count must be greater than zero",
            ));
        }
        if self.connection.target_uri.is_empty() {
            return Err(DpError::configuration(
                "connection.target_uri must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        ClientConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_max_frame_bytes_is_rejected() {
        let mut config = ClientConfig::default();
        config.ingest.max_frame_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_stream_count_is_rejected() {
        let mut config = ClientConfig::default();
        config.ingest.stream_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn disabling_decomposition_yields_an_unbounded_effective_budget() {
        let mut config = IngestConfig::default();
        config.frame.enabled = false;
        assert_eq!(config.effective_max_frame_bytes(), usize::MAX);
    }

    #[test]
    fn disabling_processor_concurrency_pins_a_single_worker() {
        let mut config = IngestConfig::default();
        config.processor.concurrency = false;
        assert_eq!(config.effective_worker_count(), 1);
    }

    #[test]
    fn multistream_below_the_domain_floor_falls_back_to_one_stream() {
        let config = QueryConfig::default();
        assert_eq!(config.effective_stream_count(0), 1);
        assert!(config.effective_stream_count(100) > 1);
    }
}
