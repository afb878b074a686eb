//! `Frame` (C1): a single provider-supplied block of time-correlated data
//! destined for ingestion.

use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::error::{DpError, DpResult};
use crate::types::{Timebase, TypedColumn};

/// One named column within a [`Frame`], carrying its own type-tagged storage.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameColumn {
    pub source_name: String,
    pub values: TypedColumn,
}

/// A self-describing block of columnar data sharing a single timebase.
///
/// Construction enforces the structural invariants from §3: every column's
/// row count matches the timebase's row count, and source names are unique
/// within the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub label: String,
    pub frame_timestamp: SystemTime,
    pub attributes: BTreeMap<String, String>,
    pub timebase: Timebase,
    pub columns: Vec<FrameColumn>,
}

impl Frame {
    pub fn new(
        label: impl Into<String>,
        frame_timestamp: SystemTime,
        timebase: Timebase,
        columns: Vec<FrameColumn>,
    ) -> DpResult<Self> {
        let frame = Frame {
            label: label.into(),
            frame_timestamp,
            attributes: BTreeMap::new(),
            timebase,
            columns,
        };
        frame.validate()?;
        Ok(frame)
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    fn validate(&self) -> DpResult<()> {
        let expected_rows = self.timebase.count() as usize;
        let mut seen = std::collections::HashSet::with_capacity(self.columns.len());
        for column in &self.columns {
            if column.values.len() != expected_rows {
                return Err(DpError::consistency(format!(
                    "column '{}' has {} rows, timebase has {}",
                    column.source_name,
                    column.values.len(),
                    expected_rows
                )));
            }
            if !seen.insert(column.source_name.as_str()) {
                return Err(DpError::consistency(format!(
                    "duplicate source name '{}' within frame",
                    column.source_name
                )));
            }
        }
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.timebase.count() as usize
    }

    pub fn byte_size(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.values.estimated_byte_size())
            .sum()
    }

    /// Splits this frame row-wise at `at`, consuming it into two owned
    /// frames that each keep every column (§4.2 step 1, row-wise split).
    ///
    /// Non-destructive in the sense required by §10.5: `self` is consumed by
    /// value, nothing is mutated in place through a shared reference.
    pub fn split_rows(mut self, at: usize) -> DpResult<(Frame, Frame)> {
        let rows = self.row_count();
        if at == 0 || at >= rows {
            return Err(DpError::consistency(format!(
                "row split point {at} out of range for frame with {rows} rows"
            )));
        }
        let (left_timebase, right_timebase) = self.timebase.split_at_row(at);
        let mut left_columns = Vec::with_capacity(self.columns.len());
        let mut right_columns = Vec::with_capacity(self.columns.len());
        for mut column in self.columns.drain(..) {
            let tail = column.values.split_off_rows(at);
            left_columns.push(FrameColumn {
                source_name: column.source_name.clone(),
                values: column.values,
            });
            right_columns.push(FrameColumn {
                source_name: column.source_name,
                values: tail,
            });
        }
        let left = Frame {
            label: self.label.clone(),
            frame_timestamp: self.frame_timestamp,
            attributes: self.attributes.clone(),
            timebase: left_timebase,
            columns: left_columns,
        };
        let right = Frame {
            label: self.label,
            frame_timestamp: self.frame_timestamp,
            attributes: self.attributes,
            timebase: right_timebase,
            columns: right_columns,
        };
        Ok((left, right))
    }

    /// Splits this frame column-wise into two owned frames sharing the same
    /// timebase, by the given set of source names destined for the first
    /// half (§4.2 step 2, column-wise split).
    pub fn split_columns(mut self, first_half: &std::collections::HashSet<&str>) -> (Frame, Frame) {
        let mut left_columns = Vec::new();
        let mut right_columns = Vec::new();
        for column in self.columns.drain(..) {
            if first_half.contains(column.source_name.as_str()) {
                left_columns.push(column);
            } else {
                right_columns.push(column);
            }
        }
        let left = Frame {
            label: self.label.clone(),
            frame_timestamp: self.frame_timestamp,
            attributes: self.attributes.clone(),
            timebase: self.timebase.clone(),
            columns: left_columns,
        };
        let right = Frame {
            label: self.label,
            frame_timestamp: self.frame_timestamp,
            attributes: self.attributes,
            timebase: self.timebase.clone(),
            columns: right_columns,
        };
        (left, right)
    }
}
