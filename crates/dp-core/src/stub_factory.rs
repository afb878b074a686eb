//! Connection and authentication setup are out of scope for this crate
//! (§4.8 Non-goals); [`StubFactory`] is the seam a caller plugs a concrete
//! channel (TLS, interceptors, load balancing, ...) into, or a test
//! substitutes an in-process mock for.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dp_proto::{IngestionServiceClient, QueryServiceClient};
use tonic::transport::Channel;

use crate::config::ConnectionConfig;
use crate::error::{DpError, DpResult};

/// Produces ready-to-use gRPC client stubs against a single logical target.
#[async_trait]
pub trait StubFactory: Send + Sync {
    async fn ingestion_stub(&self) -> DpResult<IngestionServiceClient<Channel>>;
    async fn query_stub(&self) -> DpResult<QueryServiceClient<Channel>>;
}

/// Default [`StubFactory`] backed by a lazily-connected, cached `tonic`
/// channel. The channel is established on first use and reused by every
/// later stub rather than reconnecting per call; it is held behind an
/// [`ArcSwapOption`] so concurrent callers read it lock-free, the same way
/// the teacher framework's transport layer swaps a hot-reloaded connection
/// in without blocking in-flight readers.
pub struct ChannelStubFactory {
    endpoint: tonic::transport::Endpoint,
    message_size_max: usize,
    cached_channel: ArcSwapOption<Channel>,
}

impl ChannelStubFactory {
    pub fn new(
        target_uri: impl Into<String>,
        connect_timeout: std::time::Duration,
        request_timeout: std::time::Duration,
    ) -> DpResult<Self> {
        let endpoint = Channel::from_shared(target_uri.into())
            .map_err(|e| DpError::configuration(e.to_string()))?
            .connect_timeout(connect_timeout)
            .timeout(request_timeout);
        Ok(Self {
            endpoint,
            message_size_max: 4 * 1024 * 1024,
            cached_channel: ArcSwapOption::empty(),
        })
    }

    /// Builds an endpoint honoring `connection.tls.active` and the
    /// `connection.grpc.*` transport knobs (§6) in addition to the plain
    /// connect/request timeouts.
    pub fn from_config(connection: &ConnectionConfig) -> DpResult<Self> {
        let mut endpoint = Channel::from_shared(connection.target_uri.clone())
            .map_err(|e| DpError::configuration(e.to_string()))?
            .connect_timeout(connection.connect_timeout)
            .timeout(connection.grpc.timeout().max(connection.request_timeout))
            .keep_alive_while_idle(connection.grpc.keep_alive_without_calls);

        if connection.tls.active && !connection.grpc.use_plain_text {
            endpoint = endpoint
                .tls_config(tonic::transport::ClientTlsConfig::new())
                .map_err(|e| DpError::configuration(format!("invalid TLS config: {e}")))?;
        }

        Ok(Self {
            endpoint,
            message_size_max: connection.grpc.message_size_max,
            cached_channel: ArcSwapOption::empty(),
        })
    }

    /// Forces the next call to reconnect rather than reuse the cached
    /// channel, e.g. after observing repeated transport failures.
    pub fn invalidate(&self) {
        self.cached_channel.store(None);
    }

    async fn channel(&self) -> DpResult<Channel> {
        if let Some(channel) = self.cached_channel.load_full() {
            return Ok((*channel).clone());
        }
        let channel = self
            .endpoint
            .connect()
            .await
            .map_err(|e| DpError::configuration(format!("failed to connect: {e}")))?;
        self.cached_channel.store(Some(std::sync::Arc::new(channel.clone())));
        Ok(channel)
    }
}

#[async_trait]
impl StubFactory for ChannelStubFactory {
    async fn ingestion_stub(&self) -> DpResult<IngestionServiceClient<Channel>> {
        Ok(IngestionServiceClient::new(self.channel().await?)
            .max_decoding_message_size(self.message_size_max)
            .max_encoding_message_size(self.message_size_max))
    }

    async fn query_stub(&self) -> DpResult<QueryServiceClient<Channel>> {
        Ok(QueryServiceClient::new(self.channel().await?)
            .max_decoding_message_size(self.message_size_max)
            .max_encoding_message_size(self.message_size_max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_rejects_an_invalid_target_uri() {
        let mut connection = ConnectionConfig::default();
        connection.target_uri = "not a uri".into();
        assert!(ChannelStubFactory::from_config(&connection).is_err());
    }

    #[test]
    fn from_config_accepts_the_default_connection_config() {
        let connection = ConnectionConfig::default();
        assert!(ChannelStubFactory::from_config(&connection).is_ok());
    }

    #[test]
    fn a_fresh_factory_has_no_cached_channel() {
        let connection = ConnectionConfig::default();
        let factory = ChannelStubFactory::from_config(&connection).unwrap();
        assert!(factory.cached_channel.load().is_none());
        factory.invalidate();
        assert!(factory.cached_channel.load().is_none());
    }
}
