//! `IngestionFacade` (C6): the end-user-facing entry point composing the
//! buffer (C3), frame processor (C4), and ingestion channel (C5) into one
//! `register_provider`/`ingest`/`shutdown` surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tonic::Request as TonicRequest;

use crate::buffer::BoundedMessageBuffer;
use crate::cancel::CancelToken;
use crate::config::IngestConfig;
use crate::error::{DpError, DpResult, RequestOutcome};
use crate::frame::Frame;
use crate::frame_processor::FrameProcessor;
use crate::ingestion_channel::{IngestionChannel, StreamType};
use crate::stub_factory::StubFactory;

#[derive(Debug, Default)]
struct LifecycleFlags {
    provider_id: Option<String>,
    shutdown: bool,
    terminated: bool,
}

/// Accepts frames from the caller, decomposes them to the configured byte
/// budget, and ingests the pieces over `stream_count` concurrent streams.
///
/// Mirrors the non-destructive decomposition rule in §10.5: [`Self::ingest`]
/// takes ownership of the [`Frame`] it is given. Each call to `ingest` runs
/// its own short-lived buffer/processor/channel pipeline so the per-call
/// outcome list the spec's C6 API requires can be returned without buffering
/// unrelated frames' outcomes alongside it; `stream_type`/`stream_count`
/// still bound how that pipeline fans its wire messages out.
pub struct IngestionFacade {
    stub_factory: Arc<dyn StubFactory>,
    config: IngestConfig,
    stream_type: StreamType,
    state: AsyncMutex<LifecycleFlags>,
    transmission_count: AtomicU64,
}

impl IngestionFacade {
    pub fn new(stub_factory: Arc<dyn StubFactory>, config: IngestConfig, stream_type: StreamType) -> Self {
        Self {
            stub_factory,
            config,
            stream_type,
            state: AsyncMutex::new(LifecycleFlags::default()),
            transmission_count: AtomicU64::new(0),
        }
    }

    /// Registers a provider with the Ingestion Service and records its id as
    /// this facade's active provider. Fails if a provider is already
    /// registered (§4.4 invariant: at most one active provider per facade).
    #[tracing::instrument(skip(self, attributes))]
    pub async fn register_provider(
        &self,
        name: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> DpResult<String> {
        let mut state = self.state.lock().await;
        if state.provider_id.is_some() {
            return Err(DpError::state("no active provider", "provider already registered"));
        }
        let mut stub = self.stub_factory.ingestion_stub().await?;
        let response = stub
            .register_provider(TonicRequest::new(dp_proto::RegisterProviderRequest {
                name: name.into(),
                attributes,
            }))
            .await
            .map_err(DpError::Transport)?
            .into_inner();
        state.provider_id = Some(response.provider_id.clone());
        Ok(response.provider_id)
    }

    pub async fn get_provider_uid(&self) -> Option<String> {
        self.state.lock().await.provider_id.clone()
    }

    pub fn get_transmission_count(&self) -> u64 {
        self.transmission_count.load(Ordering::Relaxed)
    }

    pub async fn is_shutdown(&self) -> bool {
        self.state.lock().await.shutdown
    }

    pub async fn is_terminated(&self) -> bool {
        self.state.lock().await.terminated
    }

    /// Decomposes and transmits `frame`, blocking until every wire message it
    /// produced has a matched response or exception, and returns one
    /// [`RequestOutcome`] per wire message (§4.4).
    #[tracing::instrument(skip(self, frame, token))]
    pub async fn ingest(
        &self,
        frame: Frame,
        token: Option<CancelToken>,
    ) -> DpResult<Vec<RequestOutcome>> {
        let provider_id = {
            let state = self.state.lock().await;
            if state.shutdown {
                return Err(DpError::state("accepting", "shutdown already requested"));
            }
            state
                .provider_id
                .clone()
                .ok_or_else(|| DpError::state("provider registered", "no provider registered"))?
        };

        let input = BoundedMessageBuffer::<Frame>::new(self.config.buffer_capacity);
        let processed = BoundedMessageBuffer::<Frame>::new(self.config.buffer_capacity);
        input.activate().await?;

        let processor = FrameProcessor::new(
            input.clone(),
            processed.clone(),
            self.config.effective_max_frame_bytes(),
            self.config.effective_worker_count(),
        );
        let processor_token = token.clone();
        let processor_handle = tokio::spawn(processor.run(processor_token));

        // A cancellation during submission (e.g. a pre-cancelled token) is
        // per-call, not pipeline-fatal: report it as an exception outcome
        // rather than aborting `ingest` outright, so a caller racing
        // cancellation against submission still gets a result back instead
        // of a hard error (§7 propagation policy: per-message failures are
        // recorded, not raised).
        if let Err(e) = input.enqueue(frame, token.as_ref()).await {
            input.shutdown_now().await;
            processed.shutdown_now().await;
            let _ = processor_handle.await;
            return Ok(vec![RequestOutcome::Exception { detail: e.to_string() }]);
        }
        if let Err(e) = input.shutdown(token.as_ref()).await {
            input.shutdown_now().await;
            processed.shutdown_now().await;
            let _ = processor_handle.await;
            return Ok(vec![RequestOutcome::Exception { detail: e.to_string() }]);
        }

        let channel = IngestionChannel::new(
            self.stub_factory.clone(),
            provider_id,
            self.stream_type,
            self.config.stream_count,
        );
        // Best-effort: the processor task activates `processed` concurrently
        // with this call, so it may not be Supplying yet (or may already be
        // Draining, for a frame small enough that the processor outran us).
        // `run` itself doesn't require Active state to drain correctly, so a
        // lost race here is harmless.
        let _ = channel.activate(&processed).await;
        let outcome = channel.run(processed, token).await?;

        processor_handle
            .await
            .map_err(|e| DpError::consistency(format!("frame processor task panicked: {e}")))??;

        self.transmission_count.fetch_add(1, Ordering::Relaxed);

        let rejected: std::collections::HashSet<u64> =
            outcome.rejected_request_ids.iter().copied().collect();
        let mut responses = Vec::with_capacity(outcome.received_request_ids.len());
        for id in &outcome.received_request_ids {
            responses.push(if rejected.contains(id) {
                RequestOutcome::Rejected {
                    code: "rejected".into(),
                    message: format!("client-request-id {id} rejected by server"),
                }
            } else {
                RequestOutcome::Accepted
            });
        }
        for exception in outcome.exceptions {
            responses.push(RequestOutcome::Exception {
                detail: exception.detail,
            });
        }
        Ok(responses)
    }

    /// Marks this facade as shut down: no further `ingest` calls are
    /// accepted. Idempotent.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shutdown = true;
        state.terminated = true;
    }

    /// Same as [`Self::shutdown`]; there is no in-flight pipeline state to
    /// discard since each `ingest` call owns its own short-lived pipeline.
    pub async fn shutdown_now(&self) {
        self.shutdown().await;
    }

    /// Waits (up to `timeout`, if given) for termination, then reports
    /// whether it has completed.
    pub async fn await_termination(&self, timeout: Option<Duration>) -> DpResult<bool> {
        if self.is_terminated().await {
            return Ok(true);
        }
        if let Some(timeout) = timeout {
            tokio::time::sleep(timeout.min(Duration::from_millis(1))).await;
        }
        Ok(self.is_terminated().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameColumn;
    use crate::types::{Timebase, TypedColumn, UniformClock};
    use async_trait::async_trait;
    use dp_proto::{IngestionServiceClient, QueryServiceClient};
    use tonic::transport::Channel;

    struct UnreachableStubFactory;

    #[async_trait]
    impl StubFactory for UnreachableStubFactory {
        async fn ingestion_stub(&self) -> DpResult<IngestionServiceClient<Channel>> {
            Err(DpError::configuration("no transport in this test"))
        }

        async fn query_stub(&self) -> DpResult<QueryServiceClient<Channel>> {
            Err(DpError::configuration("no transport in this test"))
        }
    }

    fn sample_frame() -> Frame {
        let timebase = Timebase::Uniform(UniformClock {
            start: std::time::UNIX_EPOCH,
            count: 4,
            period: Duration::from_millis(1),
        });
        Frame::new(
            "facade-test",
            std::time::UNIX_EPOCH,
            timebase,
            vec![FrameColumn {
                source_name: "sensor.a".into(),
                values: TypedColumn::Int32(vec![1, 2, 3, 4]),
            }],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ingest_without_a_registered_provider_is_a_state_error() {
        let facade = IngestionFacade::new(
            Arc::new(UnreachableStubFactory),
            IngestConfig::default(),
            StreamType::BidirectionalStreaming,
        );
        let result = facade.ingest(sample_frame(), None).await;
        assert!(matches!(result, Err(DpError::State { .. })));
    }

    #[tokio::test]
    async fn register_provider_surfaces_the_connection_error_with_no_transport() {
        let facade = IngestionFacade::new(
            Arc::new(UnreachableStubFactory),
            IngestConfig::default(),
            StreamType::BidirectionalStreaming,
        );
        let result = facade.register_provider("acme-sensors", HashMap::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shutdown_then_terminated_is_true_and_ingest_is_rejected() {
        let facade = IngestionFacade::new(
            Arc::new(UnreachableStubFactory),
            IngestConfig::default(),
            StreamType::BidirectionalStreaming,
        );
        facade.shutdown().await;
        assert!(facade.is_shutdown().await);
        assert!(facade.await_termination(None).await.unwrap());
        let result = facade.ingest(sample_frame(), None).await;
        assert!(matches!(result, Err(DpError::State { .. })));
    }
}
