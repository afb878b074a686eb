//! `IngestionChannel` (C5): fans a single frame stream out across N
//! concurrent gRPC streams, and fans the per-message outcomes back in as
//! they arrive (§4.3).

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use dp_proto::IngestOutcome;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tonic::Request as TonicRequest;

use crate::buffer::BoundedMessageBuffer;
use crate::cancel::CancelToken;
use crate::error::{DpError, DpResult, RequestOutcome};
use crate::frame::Frame;
use crate::stub_factory::StubFactory;
use crate::wire::{ClientRequestIdAllocator, frame_to_ingest_request};

/// Which RPC shape the channel drives (§4.3, §6). A "unary backward" mode is
/// referenced by the source this spec distills but is permanently
/// unsupported (§9 open question 2); no variant for it exists here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    ForwardUnary,
    BidirectionalStreaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ChannelState {
    Inactive = 0,
    Active = 1,
    ShuttingDown = 2,
    Closed = 3,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Inactive,
            1 => ChannelState::Active,
            2 => ChannelState::ShuttingDown,
            _ => ChannelState::Closed,
        }
    }
}

/// One exception encountered while transmitting or receiving, carrying the
/// offending client-request-id when it could be determined (§9 open
/// question 3: an unrecognized id is recorded here rather than dropped).
#[derive(Debug, Clone)]
pub struct ExceptionRecord {
    pub client_request_id: Option<u64>,
    pub detail: String,
}

/// Final tally exposed once [`IngestionChannel::run`] drains (§4.3).
#[derive(Debug, Clone, Default)]
pub struct IngestOutcomeRecord {
    pub sent_request_ids: Vec<u64>,
    pub received_request_ids: Vec<u64>,
    pub rejected_request_ids: Vec<u64>,
    pub exceptions: Vec<ExceptionRecord>,
}

struct LaneResult {
    received: Vec<u64>,
    rejected: Vec<u64>,
    exceptions: Vec<ExceptionRecord>,
}

/// Pulls wire-ready frames from an input [`BoundedMessageBuffer`] and
/// transmits them over `stream_count` concurrent streams to a single
/// provider, collecting every response into one outcome record.
pub struct IngestionChannel {
    stub_factory: Arc<dyn StubFactory>,
    provider_id: String,
    stream_type: StreamType,
    stream_count: usize,
    request_ids: ClientRequestIdAllocator,
    state: AtomicU8,
}

impl IngestionChannel {
    pub fn new(
        stub_factory: Arc<dyn StubFactory>,
        provider_id: impl Into<String>,
        stream_type: StreamType,
        stream_count: usize,
    ) -> Self {
        Self {
            stub_factory,
            provider_id: provider_id.into(),
            stream_type,
            stream_count: stream_count.max(1),
            request_ids: ClientRequestIdAllocator::new(),
            state: AtomicU8::new(ChannelState::Inactive as u8),
        }
    }

    fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self.state(), ChannelState::ShuttingDown | ChannelState::Closed)
    }

    /// `Inactive -> Active`. Requires `input` already be `Supplying`, mirroring
    /// the spec's `activate` precondition (§4.3 state machine).
    pub async fn activate(&self, input: &BoundedMessageBuffer<Frame>) -> DpResult<()> {
        if self.state() != ChannelState::Inactive {
            return Err(DpError::state("Inactive", "already active"));
        }
        if !input.is_supplying() {
            return Err(DpError::state("Supplying", "input buffer not supplying"));
        }
        self.state.store(ChannelState::Active as u8, Ordering::Release);
        Ok(())
    }

    /// Drains `input` until it closes, assigning each frame a fresh
    /// client-request-id and dispatching it to one of `stream_count`
    /// concurrent streams round-robin; blocks until every stream resolves
    /// every in-flight request, then returns the combined outcome (§4.3
    /// `shutdown`, blocking variant).
    #[tracing::instrument(skip(self, input, token))]
    pub async fn run(
        &self,
        input: Arc<BoundedMessageBuffer<Frame>>,
        token: Option<CancelToken>,
    ) -> DpResult<IngestOutcomeRecord> {
        let (lane_txs, lane_rxs): (Vec<_>, Vec<_>) = (0..self.stream_count)
            .map(|_| mpsc::channel::<(u64, Frame)>(64))
            .unzip();

        let mut sent_ids = Vec::new();
        {
            let mut lane_txs = lane_txs;
            let mut next_lane = 0usize;
            loop {
                if self.state() == ChannelState::Closed {
                    break;
                }
                match input.take(token.as_ref()).await {
                    Ok(Some(frame)) => {
                        let id = self.request_ids.next();
                        sent_ids.push(id);
                        let lane = next_lane % lane_txs.len();
                        next_lane += 1;
                        if lane_txs[lane].send((id, frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(DpError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "ingestion channel input read failed");
                        break;
                    }
                }
            }
            lane_txs.clear();
        }

        self.state
            .store(ChannelState::ShuttingDown as u8, Ordering::Release);

        let mut tasks = Vec::with_capacity(lane_rxs.len());
        for (lane_id, rx) in lane_rxs.into_iter().enumerate() {
            let stub_factory = self.stub_factory.clone();
            let provider_id = self.provider_id.clone();
            let stream_type = self.stream_type;
            let lane_token = token.clone();
            tasks.push(tokio::spawn(async move {
                run_stream(lane_id, stub_factory, provider_id, stream_type, rx, lane_token).await
            }));
        }

        let mut received_ids = Vec::new();
        let mut rejected_ids = Vec::new();
        let mut exceptions = Vec::new();
        for (lane_id, task) in tasks.into_iter().enumerate() {
            match task.await {
                Ok(Ok(lane_result)) => {
                    received_ids.extend(lane_result.received);
                    rejected_ids.extend(lane_result.rejected);
                    exceptions.extend(lane_result.exceptions);
                }
                Ok(Err(e)) => exceptions.push(ExceptionRecord {
                    client_request_id: None,
                    detail: format!("stream {lane_id}: {e}"),
                }),
                Err(join_error) => exceptions.push(ExceptionRecord {
                    client_request_id: None,
                    detail: format!("stream {lane_id} task panicked: {join_error}"),
                }),
            }
        }

        self.state.store(ChannelState::Closed as u8, Ordering::Release);
        Ok(IngestOutcomeRecord {
            sent_request_ids: sent_ids,
            received_request_ids: received_ids,
            rejected_request_ids: rejected_ids,
            exceptions,
        })
    }

    /// Cancels every in-flight stream immediately and drops pending
    /// responses (§4.3 `shutdown_now`).
    pub fn shutdown_now(&self) {
        self.state.store(ChannelState::Closed as u8, Ordering::Release);
    }
}

async fn run_stream(
    lane_id: usize,
    stub_factory: Arc<dyn StubFactory>,
    provider_id: String,
    stream_type: StreamType,
    rx: mpsc::Receiver<(u64, Frame)>,
    token: Option<CancelToken>,
) -> DpResult<LaneResult> {
    match stream_type {
        StreamType::BidirectionalStreaming => {
            run_bidi_stream(stub_factory, provider_id, rx, token).await
        }
        StreamType::ForwardUnary => {
            run_unary_stream(lane_id, stub_factory, provider_id, rx, token).await
        }
    }
}

async fn run_bidi_stream(
    stub_factory: Arc<dyn StubFactory>,
    provider_id: String,
    mut rx: mpsc::Receiver<(u64, Frame)>,
    token: Option<CancelToken>,
) -> DpResult<LaneResult> {
    let mut stub = stub_factory.ingestion_stub().await?;

    let mut requests = Vec::new();
    let mut expected_ids = std::collections::HashSet::new();
    while let Some((id, frame)) = rx.recv().await {
        expected_ids.insert(id);
        requests.push(frame_to_ingest_request(&provider_id, id, &frame));
    }

    let mut result = LaneResult {
        received: Vec::new(),
        rejected: Vec::new(),
        exceptions: Vec::new(),
    };
    if requests.is_empty() {
        return Ok(result);
    }

    let (tx, outbound_rx) = mpsc::channel(requests.len());
    for request in requests {
        if tx.send(request).await.is_err() {
            break;
        }
    }
    drop(tx);

    let outbound = tokio_stream::wrappers::ReceiverStream::new(outbound_rx);
    let response = stub
        .ingest_data(TonicRequest::new(outbound))
        .await
        .map_err(DpError::Transport)?;

    let mut inbound = response.into_inner();
    loop {
        let next = match &token {
            Some(t) => crate::cancel::cancellable(Some(t), inbound.next()).await?,
            None => inbound.next().await,
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(status)) => {
                result.exceptions.push(ExceptionRecord {
                    client_request_id: None,
                    detail: status.to_string(),
                });
                continue;
            }
            None => break,
        };
        if !expected_ids.contains(&message.client_request_id) {
            tracing::warn!(
                client_request_id = message.client_request_id,
                "ingestion response referenced an id this stream never sent"
            );
        }
        match message.outcome {
            Some(IngestOutcome::Accepted(true)) => result.received.push(message.client_request_id),
            Some(IngestOutcome::Accepted(false)) => result.exceptions.push(ExceptionRecord {
                client_request_id: Some(message.client_request_id),
                detail: "server reported an unaccepted outcome".into(),
            }),
            Some(IngestOutcome::Rejected(_)) => {
                result.received.push(message.client_request_id);
                result.rejected.push(message.client_request_id);
            }
            None => result.exceptions.push(ExceptionRecord {
                client_request_id: Some(message.client_request_id),
                detail: "response carried no outcome payload".into(),
            }),
        }
    }
    Ok(result)
}

async fn run_unary_stream(
    lane_id: usize,
    stub_factory: Arc<dyn StubFactory>,
    provider_id: String,
    mut rx: mpsc::Receiver<(u64, Frame)>,
    token: Option<CancelToken>,
) -> DpResult<LaneResult> {
    let mut stub = stub_factory.ingestion_stub().await?;
    let mut result = LaneResult {
        received: Vec::new(),
        rejected: Vec::new(),
        exceptions: Vec::new(),
    };

    while let Some((id, frame)) = rx.recv().await {
        let request = frame_to_ingest_request(&provider_id, id, &frame);
        let call = stub.ingest_data_unary(TonicRequest::new(request));
        let outcome = match &token {
            Some(t) => crate::cancel::cancellable(Some(t), call).await?,
            None => call.await,
        };
        match outcome {
            Ok(response) => {
                let message = response.into_inner();
                match message.outcome {
                    Some(IngestOutcome::Accepted(true)) => result.received.push(id),
                    Some(IngestOutcome::Accepted(false)) => result.exceptions.push(ExceptionRecord {
                        client_request_id: Some(id),
                        detail: "server reported an unaccepted outcome".into(),
                    }),
                    Some(IngestOutcome::Rejected(_)) => {
                        result.received.push(id);
                        result.rejected.push(id);
                    }
                    None => result.exceptions.push(ExceptionRecord {
                        client_request_id: Some(id),
                        detail: "response carried no outcome payload".into(),
                    }),
                }
            }
            Err(status) => {
                tracing::debug!(lane_id, client_request_id = id, %status, "unary ingest call failed");
                result.exceptions.push(ExceptionRecord {
                    client_request_id: Some(id),
                    detail: status.to_string(),
                });
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[tokio::test]
    async fn empty_input_buffer_yields_an_empty_outcome() {
        let input = BoundedMessageBuffer::<Frame>::new(Some(4));
        input.activate().await.unwrap();
        input.shutdown(None).await.unwrap();

        let channel = IngestionChannel::new(
            Arc::new(UnreachableStubFactory),
            "provider-1",
            StreamType::BidirectionalStreaming,
            2,
        );
        let outcome = channel.run(input, None).await.unwrap();
        assert!(outcome.sent_request_ids.is_empty());
        assert!(outcome.received_request_ids.is_empty());
        assert!(outcome.exceptions.is_empty());
    }

    #[tokio::test]
    async fn activate_requires_a_supplying_input_buffer() {
        let input = BoundedMessageBuffer::<Frame>::new(Some(4));
        let channel = IngestionChannel::new(
            Arc::new(UnreachableStubFactory),
            "provider-1",
            StreamType::BidirectionalStreaming,
            1,
        );
        let result = channel.activate(&input).await;
        assert!(matches!(result, Err(DpError::State { .. })));
    }
}
