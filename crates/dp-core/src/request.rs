//! `Request` (C2): an immutable description of a query's time range and
//! source set, built once and then decomposed, never mutated in place.

use std::time::SystemTime;

use crate::error::{DpError, DpResult};

/// A half-open time range `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeRange {
    pub begin: SystemTime,
    pub end: SystemTime,
}

impl TimeRange {
    pub fn new(begin: SystemTime, end: SystemTime) -> DpResult<Self> {
        if begin >= end {
            return Err(DpError::consistency(
                "time range begin must precede end",
            ));
        }
        Ok(Self { begin, end })
    }

    pub fn duration(&self) -> std::time::Duration {
        self.end.duration_since(self.begin).unwrap_or_default()
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    /// Splits at an absolute instant, which must fall strictly inside the range.
    pub fn split_at(&self, at: SystemTime) -> DpResult<(TimeRange, TimeRange)> {
        if at <= self.begin || at >= self.end {
            return Err(DpError::consistency(
                "split point must fall strictly inside the time range",
            ));
        }
        Ok((
            TimeRange { begin: self.begin, end: at },
            TimeRange { begin: at, end: self.end },
        ))
    }
}

/// Caps that bound how far the decomposer (C7) may subdivide a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecompositionLimits {
    pub max_sources_per_request: usize,
    pub max_duration_per_request: std::time::Duration,
}

impl Default for DecompositionLimits {
    fn default() -> Self {
        Self {
            max_sources_per_request: 64,
            max_duration_per_request: std::time::Duration::from_secs(3600),
        }
    }
}

/// A single logical query request: a source set over a time range, plus the
/// caps under which it may be decomposed into sub-requests (§3, §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub request_id: u64,
    pub sources: Vec<String>,
    pub range: TimeRange,
    pub limits: DecompositionLimits,
}

/// Builds a [`Request`], validating the source set and range up front so
/// every `Request` in circulation is already well-formed.
pub struct RequestBuilder {
    request_id: u64,
    sources: Vec<String>,
    range: Option<TimeRange>,
    limits: DecompositionLimits,
}

impl RequestBuilder {
    pub fn new(request_id: u64) -> Self {
        Self {
            request_id,
            sources: Vec::new(),
            range: None,
            limits: DecompositionLimits::default(),
        }
    }

    pub fn source(mut self, name: impl Into<String>) -> Self {
        self.sources.push(name.into());
        self
    }

    pub fn sources(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.sources.extend(names);
        self
    }

    pub fn range(mut self, begin: SystemTime, end: SystemTime) -> Self {
        self.range = Some(TimeRange { begin, end });
        self
    }

    pub fn limits(mut self, limits: DecompositionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> DpResult<Request> {
        if self.sources.is_empty() {
            return Err(DpError::consistency("request must name at least one source"));
        }
        let mut seen = std::collections::HashSet::with_capacity(self.sources.len());
        for name in &self.sources {
            if !seen.insert(name.as_str()) {
                return Err(DpError::consistency(format!(
                    "duplicate source '{name}' in request"
                )));
            }
        }
        let range = self
            .range
            .ok_or_else(|| DpError::consistency("request requires a time range"))?;
        TimeRange::new(range.begin, range.end)?;
        Ok(Request {
            request_id: self.request_id,
            sources: self.sources,
            range,
            limits: self.limits,
        })
    }
}
