//! Request decomposition (C7): splits a [`Request`] into sub-requests that
//! each respect the configured source-count and duration caps (§4.6).

use std::time::Duration;

use crate::error::{DpError, DpResult};
use crate::request::{Request, TimeRange};

/// Which axis (or both) to decompose along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompositionStrategy {
    /// Split only by time range.
    Horizontal,
    /// Split only by source set.
    Vertical,
    /// Split by both, taking the Cartesian product of the two partitions.
    Grid,
}

fn horizontal_ranges(range: TimeRange, max_duration: Duration) -> Vec<TimeRange> {
    if max_duration.is_zero() || range.duration() <= max_duration {
        return vec![range];
    }
    let mut ranges = Vec::new();
    let mut cursor = range.begin;
    while cursor < range.end {
        let slice_end = std::cmp::min(cursor + max_duration, range.end);
        ranges.push(TimeRange {
            begin: cursor,
            end: slice_end,
        });
        cursor = slice_end;
    }
    ranges
}

fn vertical_partitions(sources: &[String], max_sources: usize) -> Vec<Vec<String>> {
    let mut sorted = sources.to_vec();
    sorted.sort();
    if max_sources == 0 || sorted.len() <= max_sources {
        return vec![sorted];
    }
    sorted
        .chunks(max_sources)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Decomposes `request` into sub-requests, each carrying a fresh,
/// caller-supplied id from `next_id`, none of which individually violate
/// `request.limits`.
pub fn decompose(
    request: &Request,
    strategy: DecompositionStrategy,
    mut next_id: impl FnMut() -> u64,
) -> DpResult<Vec<Request>> {
    if request.sources.is_empty() {
        return Err(DpError::consistency("cannot decompose a sourceless request"));
    }

    let ranges = match strategy {
        DecompositionStrategy::Vertical => vec![request.range],
        DecompositionStrategy::Horizontal | DecompositionStrategy::Grid => {
            horizontal_ranges(request.range, request.limits.max_duration_per_request)
        }
    };
    let source_groups = match strategy {
        DecompositionStrategy::Horizontal => vec![request.sources.clone()],
        DecompositionStrategy::Vertical | DecompositionStrategy::Grid => {
            vertical_partitions(&request.sources, request.limits.max_sources_per_request)
        }
    };

    let mut sub_requests = Vec::with_capacity(ranges.len() * source_groups.len());
    for range in &ranges {
        for sources in &source_groups {
            sub_requests.push(Request {
                request_id: next_id(),
                sources: sources.clone(),
                range: *range,
                limits: request.limits,
            });
        }
    }
    Ok(sub_requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{DecompositionLimits, RequestBuilder};

    fn sample_request(sources: usize, duration: Duration) -> Request {
        let mut builder = RequestBuilder::new(1).limits(DecompositionLimits {
            max_sources_per_request: 2,
            max_duration_per_request: Duration::from_secs(10),
        });
        for i in 0..sources {
            builder = builder.source(format!("sensor.{i}"));
        }
        builder
            .range(std::time::UNIX_EPOCH, std::time::UNIX_EPOCH + duration)
            .build()
            .unwrap()
    }

    #[test]
    fn horizontal_decomposition_covers_the_full_range_without_gaps() {
        let request = sample_request(1, Duration::from_secs(25));
        let mut id = 1u64;
        let parts = decompose(&request, DecompositionStrategy::Horizontal, || {
            id += 1;
            id
        })
        .unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].range.begin, request.range.begin);
        assert_eq!(parts.last().unwrap().range.end, request.range.end);
        for pair in parts.windows(2) {
            assert_eq!(pair[0].range.end, pair[1].range.begin);
        }
    }

    #[test]
    fn vertical_decomposition_partitions_every_source_exactly_once() {
        let request = sample_request(5, Duration::from_secs(5));
        let mut id = 1u64;
        let parts = decompose(&request, DecompositionStrategy::Vertical, || {
            id += 1;
            id
        })
        .unwrap();
        let total_sources: usize = parts.iter().map(|p| p.sources.len()).sum();
        assert_eq!(total_sources, 5);
        assert!(parts.iter().all(|p| p.sources.len() <= 2));
    }

    #[test]
    fn vertical_partitions_are_sorted_regardless_of_input_order() {
        let request = RequestBuilder::new(1)
            .limits(DecompositionLimits {
                max_sources_per_request: 2,
                max_duration_per_request: Duration::from_secs(10),
            })
            .source("sensor.3")
            .source("sensor.1")
            .source("sensor.0")
            .source("sensor.2")
            .range(std::time::UNIX_EPOCH, std::time::UNIX_EPOCH + Duration::from_secs(5))
            .build()
            .unwrap();
        let mut id = 1u64;
        let parts = decompose(&request, DecompositionStrategy::Vertical, || {
            id += 1;
            id
        })
        .unwrap();
        let flattened: Vec<&String> = parts.iter().flat_map(|p| p.sources.iter()).collect();
        assert_eq!(
            flattened,
            vec!["sensor.0", "sensor.1", "sensor.2", "sensor.3"]
        );
    }

    #[test]
    fn grid_decomposition_is_the_cartesian_product() {
        let request = sample_request(5, Duration::from_secs(25));
        let mut id = 1u64;
        let parts = decompose(&request, DecompositionStrategy::Grid, || {
            id += 1;
            id
        })
        .unwrap();
        assert_eq!(parts.len(), 3 * 3);
    }
}
