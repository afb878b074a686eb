//! `QueryRecoverer` (C8): drives a set of sub-requests across concurrent
//! `QueryData` streams and feeds every recovered frame into a [`Correlator`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dp_proto::QueryPayload;
use tokio_stream::StreamExt;

use crate::cancel::{CancelToken, cancellable};
use crate::correlator::Correlator;
use crate::error::{DpError, DpResult};
use crate::request::Request;
use crate::stub_factory::StubFactory;
use crate::wire::{decode_column, scalar_type_from_wire, timebase_from_wire};

/// Running tallies kept across the lifetime of a recovery.
#[derive(Debug, Default)]
pub struct RecoveryCounters {
    pub frames_received: AtomicU64,
    pub errors_received: AtomicU64,
    /// Sum of the serialized byte size of every column payload seen.
    pub processed_byte_count: AtomicU64,
    /// Number of `recover` calls made against a decomposed (more than one
    /// sub-request) request set.
    pub processed_composite_request: AtomicU64,
}

/// Coordinates recovery of one decomposed request set into a shared
/// [`Correlator`], running up to `stream_count` sub-requests concurrently.
pub struct QueryRecoverer {
    stub_factory: Arc<dyn StubFactory>,
    stream_count: usize,
    correlator: Arc<Correlator>,
    counters: Arc<RecoveryCounters>,
}

impl QueryRecoverer {
    pub fn new(stub_factory: Arc<dyn StubFactory>, stream_count: usize) -> Self {
        Self {
            stub_factory,
            stream_count: stream_count.max(1),
            correlator: Arc::new(Correlator::new()),
            counters: Arc::new(RecoveryCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<RecoveryCounters> {
        self.counters.clone()
    }

    /// Runs every sub-request, at most `stream_count` concurrently, and
    /// returns the shared correlator once all of them complete.
    #[tracing::instrument(skip(self, sub_requests, token))]
    pub async fn recover(
        &self,
        sub_requests: Vec<Request>,
        token: Option<CancelToken>,
    ) -> DpResult<Arc<Correlator>> {
        if sub_requests.len() > 1 {
            self.counters
                .processed_composite_request
                .fetch_add(1, Ordering::Relaxed);
        }

        let mut remaining = sub_requests.into_iter();
        let mut in_flight = tokio::task::JoinSet::new();

        for _ in 0..self.stream_count {
            if let Some(request) = remaining.next() {
                self.spawn_one(&mut in_flight, request, token.clone());
            }
        }

        let mut first_error = None;
        while let Some(result) = in_flight.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "query recovery stream failed");
                    self.counters.errors_received.fetch_add(1, Ordering::Relaxed);
                    first_error.get_or_insert(e);
                }
                Err(join_error) => {
                    tracing::warn!(%join_error, "query recovery stream task panicked");
                }
            }
            if let Some(request) = remaining.next() {
                self.spawn_one(&mut in_flight, request, token.clone());
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(self.correlator.clone()),
        }
    }

    fn spawn_one(
        &self,
        in_flight: &mut tokio::task::JoinSet<DpResult<()>>,
        request: Request,
        token: Option<CancelToken>,
    ) {
        let stub_factory = self.stub_factory.clone();
        let correlator = self.correlator.clone();
        let counters = self.counters.clone();
        in_flight.spawn(async move {
            recover_one(stub_factory, correlator, counters, request, token).await
        });
    }
}

async fn recover_one(
    stub_factory: Arc<dyn StubFactory>,
    correlator: Arc<Correlator>,
    counters: Arc<RecoveryCounters>,
    request: Request,
    token: Option<CancelToken>,
) -> DpResult<()> {
    let mut stub = stub_factory.query_stub().await?;

    let wire_request = dp_proto::QueryDataRequest {
        sources: request.sources.clone(),
        begin: Some(request.range.begin.into()),
        end: Some(request.range.end.into()),
        options: Default::default(),
    };

    let response = stub
        .query_data(tonic::Request::new(wire_request))
        .await
        .map_err(DpError::Transport)?;
    let mut inbound = response.into_inner();

    loop {
        let next = cancellable(token.as_ref(), inbound.next()).await?;
        let message = match next {
            Some(result) => result.map_err(DpError::Transport)?,
            None => break,
        };
        match message.payload {
            Some(QueryPayload::Frame(frame)) => {
                let timebase = timebase_from_wire(
                    frame
                        .timebase
                        .ok_or_else(|| DpError::consistency("query frame missing timebase"))?,
                )?;
                let row_count = timebase.count() as usize;
                let mut columns = Vec::with_capacity(frame.columns.len());
                for column in frame.columns {
                    let scalar_type = scalar_type_from_wire(dp_proto::ScalarType::try_from(
                        column.r#type,
                    )
                    .map_err(|_| DpError::consistency("unrecognized scalar type tag"))?)?;
                    counters
                        .processed_byte_count
                        .fetch_add(column.raw_values.len() as u64, Ordering::Relaxed);
                    columns.push(crate::frame::FrameColumn {
                        source_name: column.source_name,
                        values: decode_column(scalar_type, &column.raw_values, row_count)?,
                    });
                }
                correlator.ingest(timebase, columns)?;
                counters.frames_received.fetch_add(1, Ordering::Relaxed);
            }
            Some(QueryPayload::Error(error)) => {
                counters.errors_received.fetch_add(1, Ordering::Relaxed);
                return Err(DpError::Rejected {
                    code: error.reason_code,
                    message: error.message,
                });
            }
            None => {
                return Err(DpError::consistency("query response carried no payload"));
            }
        }
    }
    Ok(())
}

