//! `FrameProcessor` (C4): decomposes oversized frames into wire-sized pieces
//! and runs that decomposition across a worker pool.
//!
//! The splitting algorithm is pure and synchronous ([`decompose_frame`]); the
//! processor itself is a thin pump moving frames from an input
//! [`BoundedMessageBuffer`] to an output one, fanned out across a
//! `tokio::task::JoinSet` of workers the way the teacher framework's
//! pipeline stage runs its transform across a fixed worker pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::task::JoinSet;

use crate::buffer::BoundedMessageBuffer;
use crate::cancel::CancelToken;
use crate::error::{DpError, DpResult};
use crate::frame::Frame;

/// Splits `frame` into pieces each at or under `max_bytes`, preferring a
/// row-wise split and falling back to a column-wise split when a frame
/// cannot be subdivided further by rows (§4.2).
///
/// A single-row, single-column frame that still exceeds `max_bytes` is
/// returned as its own oversized leaf: the budget cannot be honored any
/// further without dropping data.
pub fn decompose_frame(frame: Frame, max_bytes: usize) -> Vec<Frame> {
    if frame.byte_size() <= max_bytes || max_bytes == 0 {
        return vec![frame];
    }

    if frame.row_count() > 1 {
        let midpoint = frame.row_count() / 2;
        if let Ok((left, right)) = frame.clone().split_rows(midpoint) {
            let mut pieces = decompose_frame(left, max_bytes);
            pieces.extend(decompose_frame(right, max_bytes));
            return pieces;
        }
    }

    if frame.columns.len() > 1 {
        let midpoint = frame.columns.len() / 2;
        let first_half: HashSet<&str> = frame.columns[..midpoint]
            .iter()
            .map(|c| c.source_name.as_str())
            .collect();
        let (left, right) = frame.clone().split_columns(&first_half);
        let mut pieces = decompose_frame(left, max_bytes);
        pieces.extend(decompose_frame(right, max_bytes));
        return pieces;
    }

    vec![frame]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ProcessorState {
    Inactive = 0,
    Active = 1,
    Draining = 2,
    Closed = 3,
}

/// Pumps frames from `input` through [`decompose_frame`] into `output`,
/// using `worker_count` concurrent tasks.
pub struct FrameProcessor {
    input: Arc<BoundedMessageBuffer<Frame>>,
    output: Arc<BoundedMessageBuffer<Frame>>,
    max_frame_bytes: usize,
    worker_count: usize,
    state: AtomicU8,
}

impl FrameProcessor {
    pub fn new(
        input: Arc<BoundedMessageBuffer<Frame>>,
        output: Arc<BoundedMessageBuffer<Frame>>,
        max_frame_bytes: usize,
        worker_count: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            input,
            output,
            max_frame_bytes,
            worker_count: worker_count.max(1),
            state: AtomicU8::new(ProcessorState::Inactive as u8),
        })
    }

    fn state(&self) -> ProcessorState {
        match self.state.load(Ordering::Acquire) {
            0 => ProcessorState::Inactive,
            1 => ProcessorState::Active,
            2 => ProcessorState::Draining,
            _ => ProcessorState::Closed,
        }
    }

    /// Activates input/output buffers and runs worker tasks until the input
    /// buffer closes, then drains the output buffer and closes it too.
    #[tracing::instrument(skip(self, token))]
    pub async fn run(self: Arc<Self>, token: Option<CancelToken>) -> DpResult<()> {
        if self.state() != ProcessorState::Inactive {
            return Err(DpError::state("Inactive", "already running"));
        }
        self.state.store(ProcessorState::Active as u8, Ordering::Release);
        self.output.activate().await?;

        let mut workers = JoinSet::new();
        for worker_id in 0..self.worker_count {
            let processor = self.clone();
            let worker_token = token.clone();
            workers.spawn(async move { processor.worker_loop(worker_id, worker_token).await });
        }

        let mut first_error = None;
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "frame processor worker exited with error");
                    first_error.get_or_insert(e);
                }
                Err(join_error) => {
                    tracing::warn!(%join_error, "frame processor worker panicked");
                }
            }
        }

        self.state.store(ProcessorState::Draining as u8, Ordering::Release);
        self.output.shutdown(token.as_ref()).await?;
        self.state.store(ProcessorState::Closed as u8, Ordering::Release);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn worker_loop(&self, worker_id: usize, token: Option<CancelToken>) -> DpResult<()> {
        loop {
            let frame = match self.input.take(token.as_ref()).await? {
                Some(frame) => frame,
                None => return Ok(()),
            };
            tracing::debug!(worker_id, frame = %frame.label, "decomposing frame");
            for piece in decompose_frame(frame, self.max_frame_bytes) {
                self.output.enqueue(piece, token.as_ref()).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameColumn;
    use crate::types::{Timebase, TypedColumn, UniformClock};
    use std::time::Duration;

    fn wide_frame(rows: u64, columns: usize) -> Frame {
        let timebase = Timebase::Uniform(UniformClock {
            start: std::time::UNIX_EPOCH,
            count: rows,
            period: Duration::from_millis(1),
        });
        let columns = (0..columns)
            .map(|i| FrameColumn {
                source_name: format!("sensor.{i}"),
                values: TypedColumn::Float64(vec![1.0; rows as usize]),
            })
            .collect();
        Frame::new("wide", std::time::UNIX_EPOCH, timebase, columns).unwrap()
    }

    #[test]
    fn small_frame_is_not_split() {
        let frame = wide_frame(10, 1);
        let pieces = decompose_frame(frame, 1024);
        assert_eq!(pieces.len(), 1);
    }

    #[test]
    fn oversized_frame_splits_under_budget() {
        let frame = wide_frame(1000, 4);
        let total_rows: usize = frame.row_count();
        let budget = frame.byte_size() / 5;
        let pieces = decompose_frame(frame, budget);
        assert!(pieces.len() > 1);
        let recovered_rows: usize = pieces
            .iter()
            .filter(|p| p.columns.iter().any(|c| c.source_name == "sensor.0"))
            .map(|p| p.row_count())
            .sum();
        assert_eq!(recovered_rows, total_rows);
        for piece in &pieces {
            assert!(piece.byte_size() <= budget || piece.row_count() == 1 && piece.columns.len() == 1);
        }
    }

    #[tokio::test]
    async fn processor_pumps_input_to_output() {
        let input = BoundedMessageBuffer::<Frame>::new(Some(8));
        let output = BoundedMessageBuffer::<Frame>::new(Some(32));
        input.activate().await.unwrap();

        input.enqueue(wide_frame(4, 1), None).await.unwrap();
        input.shutdown(None).await.unwrap();

        let processor = FrameProcessor::new(input, output.clone(), 1024 * 1024, 2);
        processor.run(None).await.unwrap();

        let mut received = Vec::new();
        while let Some(frame) = output.take(None).await.unwrap() {
            received.push(frame);
        }
        assert_eq!(received.len(), 1);
    }
}
