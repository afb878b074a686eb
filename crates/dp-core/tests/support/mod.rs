//! In-process mock Ingestion/Query services for the integration tests in
//! this directory, mirroring the teacher's "blind to implementation, only
//! capability interface matters" stance: these tests talk to a real
//! `tonic::transport::Server` over a loopback socket, never to `dp-core`
//! internals directly.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dp_proto::{
    IngestDataRequest, IngestDataResponse, IngestOutcome, IngestionService, IngestionServiceClient,
    IngestionServiceServer, QueryDataRequest, QueryDataResponse, QueryService, QueryServiceClient,
    QueryServiceServer, RegisterProviderRequest, RegisterProviderResponse,
};
use dp_core::error::{DpError, DpResult};
use dp_core::stub_factory::StubFactory;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::Channel;
use tonic::{Request, Response, Status, Streaming};

type ResponseStream<T> = Pin<Box<dyn tokio_stream::Stream<Item = Result<T, Status>> + Send + 'static>>;

/// Accepts every frame it receives and counts how many it has seen.
#[derive(Default)]
pub struct MockIngestionService {
    pub accepted: Arc<AtomicU64>,
}

impl MockIngestionService {
    pub fn new() -> Self {
        Self {
            accepted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn accepted_count(&self) -> Arc<AtomicU64> {
        self.accepted.clone()
    }
}

#[async_trait]
impl IngestionService for MockIngestionService {
    type IngestDataStream = ResponseStream<IngestDataResponse>;

    async fn register_provider(
        &self,
        request: Request<RegisterProviderRequest>,
    ) -> Result<Response<RegisterProviderResponse>, Status> {
        let name = request.into_inner().name;
        Ok(Response::new(RegisterProviderResponse {
            provider_id: format!("provider::{name}"),
        }))
    }

    async fn ingest_data(
        &self,
        request: Request<Streaming<IngestDataRequest>>,
    ) -> Result<Response<Self::IngestDataStream>, Status> {
        let mut inbound = request.into_inner();
        let accepted = self.accepted.clone();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Ok(Some(message)) = inbound.message().await {
                accepted.fetch_add(1, Ordering::Relaxed);
                let response = IngestDataResponse {
                    provider_id: message.provider_id,
                    client_request_id: message.client_request_id,
                    outcome: Some(IngestOutcome::Accepted(true)),
                };
                if tx.send(Ok(response)).await.is_err() {
                    break;
                }
            }
        });
        Ok(Response::new(
            Box::pin(ReceiverStream::new(rx)) as Self::IngestDataStream
        ))
    }

    async fn ingest_data_unary(
        &self,
        request: Request<IngestDataRequest>,
    ) -> Result<Response<IngestDataResponse>, Status> {
        let message = request.into_inner();
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(Response::new(IngestDataResponse {
            provider_id: message.provider_id,
            client_request_id: message.client_request_id,
            outcome: Some(IngestOutcome::Accepted(true)),
        }))
    }
}

/// Streams back a fixed, canned set of responses for every query,
/// regardless of the request's contents.
pub struct MockQueryService {
    pub responses: Vec<QueryDataResponse>,
}

#[async_trait]
impl QueryService for MockQueryService {
    type QueryDataStream = ResponseStream<QueryDataResponse>;

    async fn query_data(
        &self,
        _request: Request<QueryDataRequest>,
    ) -> Result<Response<Self::QueryDataStream>, Status> {
        let responses = self.responses.clone();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for response in responses {
                if tx.send(Ok(response)).await.is_err() {
                    break;
                }
            }
        });
        Ok(Response::new(
            Box::pin(ReceiverStream::new(rx)) as Self::QueryDataStream
        ))
    }
}

pub struct SharedChannelStubFactory {
    channel: Channel,
}

#[async_trait]
impl StubFactory for SharedChannelStubFactory {
    async fn ingestion_stub(&self) -> DpResult<IngestionServiceClient<Channel>> {
        Ok(IngestionServiceClient::new(self.channel.clone()))
    }

    async fn query_stub(&self) -> DpResult<QueryServiceClient<Channel>> {
        Ok(QueryServiceClient::new(self.channel.clone()))
    }
}

/// Binds both mock services to an OS-assigned loopback port and returns a
/// [`StubFactory`] wired to it. The server task runs for the test's
/// lifetime; it is never explicitly shut down since the process exit (or
/// test harness thread teardown) reclaims it.
pub async fn spawn_mock(
    ingestion: MockIngestionService,
    query: MockQueryService,
) -> Arc<dyn StubFactory> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener has a local address");
    let incoming = TcpListenerStream::new(listener);

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(IngestionServiceServer::new(ingestion))
            .add_service(QueryServiceServer::new(query))
            .serve_with_incoming(incoming)
            .await
            .expect("mock server exited");
    });

    let channel = tonic::transport::Endpoint::from_shared(format!("http://{addr}"))
        .expect("valid loopback endpoint")
        .connect()
        .await
        .map_err(|e| DpError::configuration(format!("failed to connect to mock server: {e}")))
        .expect("mock server accepts connections");

    Arc::new(SharedChannelStubFactory { channel })
}
