//! `QueryFacade`: the end-user-facing entry point for the read path,
//! composing the decomposer (C7), recoverer (C8), correlator (C9), and
//! assembler (C10) into one `query` call that returns a [`ResultTable`].

use std::sync::Arc;

use crate::assembler::SamplingProcess;
use crate::config::QueryConfig;
use crate::decomposer::{DecompositionStrategy, decompose};
use crate::error::DpResult;
use crate::recoverer::QueryRecoverer;
use crate::request::Request;
use crate::stub_factory::StubFactory;
use crate::table::ResultTable;

/// Runs a [`Request`] end to end: decomposes it within `config`'s caps,
/// recovers every sub-request over `config.recovery_stream_count`
/// concurrent streams, and assembles the result into a [`ResultTable`].
pub struct QueryFacade {
    stub_factory: Arc<dyn StubFactory>,
    config: QueryConfig,
}

impl QueryFacade {
    pub fn new(stub_factory: Arc<dyn StubFactory>, config: QueryConfig) -> Self {
        Self { stub_factory, config }
    }

    #[tracing::instrument(skip(self, request, token))]
    pub async fn query(
        &self,
        request: Request,
        strategy: DecompositionStrategy,
        token: Option<crate::cancel::CancelToken>,
    ) -> DpResult<ResultTable> {
        let mut next_id = request.request_id;
        let sub_requests = decompose(&request, strategy, || {
            next_id += 1;
            next_id
        })?;

        self.query_many(sub_requests, token).await
    }

    /// Runs an already-decomposed set of sub-requests through recovery,
    /// correlation, and assembly, for callers that pre-decomposed a request
    /// themselves (e.g. across a boundary this facade doesn't see).
    #[tracing::instrument(skip(self, sub_requests, token))]
    pub async fn query_many(
        &self,
        sub_requests: Vec<Request>,
        token: Option<crate::cancel::CancelToken>,
    ) -> DpResult<ResultTable> {
        let stream_count = self.config.effective_stream_count(sub_requests.len());
        let recoverer = QueryRecoverer::new(self.stub_factory.clone(), stream_count);
        let correlator = recoverer.recover(sub_requests, token).await?;
        let blocks = correlator.into_sorted_blocks();
        let process = SamplingProcess::assemble(blocks)?;
        Ok(ResultTable::new(process))
    }
}
