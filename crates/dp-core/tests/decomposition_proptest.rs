//! Property tests for the decomposition and correlation invariants from §8:
//! a decomposed request's sub-requests cover the original source/time
//! domain with neither gaps nor overlaps, and the correlator/assembler
//! pipeline never accepts an overlapping block sequence. Mirrors the
//! teacher's own use of `proptest` for its protocol invariants.

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use dp_core::assembler::SamplingProcess;
use dp_core::correlator::{CorrelatedBlock, Correlator};
use dp_core::decomposer::{DecompositionStrategy, decompose};
use dp_core::frame::FrameColumn;
use dp_core::request::{DecompositionLimits, RequestBuilder};
use dp_core::types::{Timebase, TypedColumn, UniformClock};
use proptest::prelude::*;

fn request_strategy() -> impl Strategy<Value = (usize, u64, u64, u64)> {
    (
        1usize..12,         // source count
        1u64..240,          // total duration in seconds
        1u64..40,           // max_sources_per_request
        1u64..60,           // max_duration_per_request in seconds
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Horizontal decomposition's sub-ranges tile the original range exactly:
    /// no gap, no overlap, first begin/last end unchanged.
    #[test]
    fn horizontal_decomposition_tiles_the_original_range(
        (sources, duration_secs, _max_sources, max_duration_secs) in request_strategy()
    ) {
        let mut builder = RequestBuilder::new(1).limits(DecompositionLimits {
            max_sources_per_request: 64,
            max_duration_per_request: Duration::from_secs(max_duration_secs),
        });
        for i in 0..sources {
            builder = builder.source(format!("sensor.{i}"));
        }
        let request = builder
            .range(
                std::time::UNIX_EPOCH,
                std::time::UNIX_EPOCH + Duration::from_secs(duration_secs),
            )
            .build()
            .unwrap();

        let mut next_id = 0u64;
        let parts = decompose(&request, DecompositionStrategy::Horizontal, || {
            next_id += 1;
            next_id
        })
        .unwrap();

        prop_assert_eq!(parts[0].range.begin, request.range.begin);
        prop_assert_eq!(parts.last().unwrap().range.end, request.range.end);
        for pair in parts.windows(2) {
            prop_assert_eq!(pair[0].range.end, pair[1].range.begin);
        }
        for part in &parts {
            prop_assert!(part.range.duration() <= Duration::from_secs(max_duration_secs));
        }
    }

    /// Vertical decomposition partitions the source set exactly once each,
    /// with no group exceeding the cap.
    #[test]
    fn vertical_decomposition_partitions_every_source_exactly_once(
        (sources, duration_secs, max_sources, _max_duration_secs) in request_strategy()
    ) {
        let mut builder = RequestBuilder::new(1).limits(DecompositionLimits {
            max_sources_per_request: max_sources as usize,
            max_duration_per_request: Duration::from_secs(3600),
        });
        let mut names = Vec::new();
        for i in 0..sources {
            let name = format!("sensor.{i}");
            builder = builder.source(name.clone());
            names.push(name);
        }
        let request = builder
            .range(
                std::time::UNIX_EPOCH,
                std::time::UNIX_EPOCH + Duration::from_secs(duration_secs),
            )
            .build()
            .unwrap();

        let mut next_id = 0u64;
        let parts = decompose(&request, DecompositionStrategy::Vertical, || {
            next_id += 1;
            next_id
        })
        .unwrap();

        let mut seen: HashSet<String> = HashSet::new();
        for part in &parts {
            prop_assert!(part.sources.len() as u64 <= max_sources.max(1));
            for source in &part.sources {
                prop_assert!(seen.insert(source.clone()), "source {source} appeared in more than one partition");
            }
        }
        prop_assert_eq!(seen, names.into_iter().collect());
    }

    /// A grid decomposition's sub-request count is exactly the Cartesian
    /// product of the horizontal and vertical partition counts.
    #[test]
    fn grid_decomposition_is_the_cartesian_product_of_the_two_axes(
        (sources, duration_secs, max_sources, max_duration_secs) in request_strategy()
    ) {
        let limits = DecompositionLimits {
            max_sources_per_request: max_sources as usize,
            max_duration_per_request: Duration::from_secs(max_duration_secs),
        };
        let mut builder = RequestBuilder::new(1).limits(limits);
        for i in 0..sources {
            builder = builder.source(format!("sensor.{i}"));
        }
        let request = builder
            .range(
                std::time::UNIX_EPOCH,
                std::time::UNIX_EPOCH + Duration::from_secs(duration_secs),
            )
            .build()
            .unwrap();

        let mut next_id = 0u64;
        let horizontal = decompose(&request, DecompositionStrategy::Horizontal, || {
            next_id += 1;
            next_id
        })
        .unwrap();
        let mut next_id = 0u64;
        let vertical = decompose(&request, DecompositionStrategy::Vertical, || {
            next_id += 1;
            next_id
        })
        .unwrap();
        let mut next_id = 0u64;
        let grid = decompose(&request, DecompositionStrategy::Grid, || {
            next_id += 1;
            next_id
        })
        .unwrap();

        prop_assert_eq!(grid.len(), horizontal.len() * vertical.len());
    }
}

fn block(start_secs: u64, count: u64, period_millis: u64, source: &str) -> CorrelatedBlock {
    CorrelatedBlock {
        timebase: Timebase::Uniform(UniformClock {
            start: SystemTime::UNIX_EPOCH + Duration::from_secs(start_secs),
            count,
            period: Duration::from_millis(period_millis.max(1)),
        }),
        columns: vec![FrameColumn {
            source_name: source.into(),
            values: TypedColumn::Int32((0..count as i32).collect()),
        }],
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Blocks correlated from arbitrary non-overlapping starts always
    /// assemble successfully and come back out in non-decreasing start
    /// order, with their row counts summed intact.
    #[test]
    fn non_overlapping_blocks_always_assemble_in_order(
        gaps in proptest::collection::vec(1u64..50, 1..8)
    ) {
        let correlator = Correlator::new();
        let mut cursor = 0u64;
        let mut expected_rows = 0usize;
        for (i, gap) in gaps.iter().enumerate() {
            let count = 5u64;
            correlator
                .ingest(
                    Timebase::Uniform(UniformClock {
                        start: SystemTime::UNIX_EPOCH + Duration::from_secs(cursor),
                        count,
                        period: Duration::from_millis(1),
                    }),
                    vec![FrameColumn {
                        source_name: format!("sensor.{i}"),
                        values: TypedColumn::Int32((0..count as i32).collect()),
                    }],
                )
                .unwrap();
            expected_rows += count as usize;
            // advance past this block's span plus the gap, guaranteeing no overlap
            cursor += 1 + gap;
        }

        let blocks = correlator.into_sorted_blocks();
        let process = SamplingProcess::assemble(blocks).unwrap();
        prop_assert_eq!(process.total_rows(), expected_rows);
        for pair in process.blocks().windows(2) {
            prop_assert!(pair[0].timebase.start() <= pair[1].timebase.start());
        }
    }

    /// Two blocks whose spans overlap are always rejected by the sampling
    /// process assembler, regardless of how far the overlap extends.
    #[test]
    fn overlapping_blocks_are_always_rejected(
        first_count in 3u64..30,
        into_span in 1u64..2000,
    ) {
        // `first`'s span runs from 0 to (first_count - 1) * 1000ms. Starting
        // `second` anywhere strictly before that end, but no earlier than
        // 1ms in, guarantees `second.start < first_end` without landing
        // exactly on `first.start` (which would otherwise also be a valid,
        // less interesting overlap).
        let first = block(0, first_count, 1000, "a");
        let first_end_millis = (first_count - 1) * 1000;
        let second_start_millis = into_span % first_end_millis.max(1);
        let second = CorrelatedBlock {
            timebase: Timebase::Uniform(UniformClock {
                start: SystemTime::UNIX_EPOCH + Duration::from_millis(second_start_millis),
                count: 2,
                period: Duration::from_millis(1000),
            }),
            columns: vec![FrameColumn {
                source_name: "b".into(),
                values: TypedColumn::Int32(vec![0, 1]),
            }],
        };
        let result = SamplingProcess::assemble(vec![first, second]);
        prop_assert!(result.is_err());
    }
}
