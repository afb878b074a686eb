//! `ResultTable` (C11): a lazy, cached view over an assembled
//! [`SamplingProcess`], materializing one source's column across every
//! block only on first access (§4.7 final step, §4.8 laziness note).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::assembler::SamplingProcess;
use crate::error::{DpError, DpResult};
use crate::types::{ScalarValue, SupportedType};

/// A single source's values across the whole table, one entry per row,
/// `None` where that source had no column in a given block.
#[derive(Debug, Clone)]
pub struct MaterializedColumn {
    pub source_name: String,
    pub values: Vec<Option<ScalarValue>>,
}

/// Presents an assembled [`SamplingProcess`] as a row/column table keyed by
/// source name, materializing and caching each column the first time it is
/// requested rather than up front.
pub struct ResultTable {
    process: SamplingProcess,
    cache: Mutex<HashMap<String, Arc<MaterializedColumn>>>,
}

impl ResultTable {
    pub fn new(process: SamplingProcess) -> Self {
        Self {
            process,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn row_count(&self) -> usize {
        self.process.total_rows()
    }

    /// All source names present anywhere in the table, in first-seen order.
    pub fn source_names(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut names = Vec::new();
        for block in self.process.blocks() {
            for column in &block.columns {
                if seen.insert(column.source_name.clone()) {
                    names.push(column.source_name.clone());
                }
            }
        }
        names
    }

    /// Returns the materialized column for `source_name`, building and
    /// caching it on first access.
    pub fn column(&self, source_name: &str) -> DpResult<Arc<MaterializedColumn>> {
        if let Some(cached) = self.cache.lock().get(source_name) {
            return Ok(cached.clone());
        }

        let mut values = Vec::with_capacity(self.row_count());
        let mut found_anywhere = false;
        for block in self.process.blocks() {
            let row_count = block.timebase.count() as usize;
            match block
                .columns
                .iter()
                .find(|c| c.source_name == source_name)
            {
                Some(column) => {
                    found_anywhere = true;
                    for row in 0..row_count {
                        values.push(column.values.get(row));
                    }
                }
                None => values.extend(std::iter::repeat(None).take(row_count)),
            }
        }

        if !found_anywhere {
            return Err(DpError::consistency(format!(
                "source '{source_name}' not present in this table"
            )));
        }

        let materialized = Arc::new(MaterializedColumn {
            source_name: source_name.to_string(),
            values,
        });
        self.cache
            .lock()
            .insert(source_name.to_string(), materialized.clone());
        Ok(materialized)
    }

    /// Number of distinct sources present anywhere in the table.
    pub fn column_count(&self) -> usize {
        self.source_names().len()
    }

    /// Returns the column at `index` in `source_names()` order.
    pub fn get_column(&self, index: usize) -> DpResult<Arc<MaterializedColumn>> {
        let names = self.source_names();
        let name = names
            .get(index)
            .ok_or_else(|| DpError::consistency(format!("no column at index {index}")))?;
        self.column(name)
    }

    /// The scalar type `source_name` was declared with in whichever block
    /// carries it first.
    pub fn column_type(&self, source_name: &str) -> DpResult<SupportedType> {
        for block in self.process.blocks() {
            if let Some(column) = block.columns.iter().find(|c| c.source_name == source_name) {
                return Ok(column.values.scalar_type());
            }
        }
        Err(DpError::consistency(format!(
            "source '{source_name}' not present in this table"
        )))
    }

    /// Estimated in-memory byte size of `source_name`'s materialized column.
    pub fn column_size(&self, source_name: &str) -> DpResult<usize> {
        let mut total = 0;
        for block in self.process.blocks() {
            if let Some(column) = block.columns.iter().find(|c| c.source_name == source_name) {
                total += column.values.estimated_byte_size();
            }
        }
        if total == 0 && self.column(source_name).is_err() {
            return Err(DpError::consistency(format!(
                "source '{source_name}' not present in this table"
            )));
        }
        Ok(total)
    }

    /// One timestamp per row, in block order (§4.7, §4.8).
    pub fn get_timestamps(&self) -> Vec<SystemTime> {
        self.process
            .blocks()
            .iter()
            .flat_map(|block| block.timebase.timestamps())
            .collect()
    }

    /// The value at `(row, source_name)`, or `None` if that source had no
    /// value for that row's block.
    pub fn get_value(&self, row: usize, source_name: &str) -> DpResult<Option<ScalarValue>> {
        let column = self.column(source_name)?;
        column
            .values
            .get(row)
            .cloned()
            .ok_or_else(|| DpError::consistency(format!("row {row} is out of range")))
    }

    /// One `(source_name, value)` pair per column present anywhere in the
    /// table, for row `row`.
    pub fn get_row(&self, row: usize) -> DpResult<Vec<(String, Option<ScalarValue>)>> {
        if row >= self.row_count() {
            return Err(DpError::consistency(format!("row {row} is out of range")));
        }
        let mut values = Vec::with_capacity(self.column_count());
        for name in self.source_names() {
            let column = self.column(&name)?;
            values.push((name, column.values[row].clone()));
        }
        Ok(values)
    }

    /// Estimated total byte size of every column, materializing any that
    /// have not yet been accessed.
    pub fn allocation_size(&self) -> DpResult<usize> {
        let mut total = 0;
        for name in self.source_names() {
            total += self.column(&name)?.values.len() * std::mem::size_of::<Option<ScalarValue>>();
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::CorrelatedBlock;
    use crate::frame::FrameColumn;
    use crate::types::{Timebase, TypedColumn, UniformClock};
    use std::time::Duration;

    fn block(start_ms: u64, count: u64, source: &str) -> CorrelatedBlock {
        CorrelatedBlock {
            timebase: Timebase::Uniform(UniformClock {
                start: std::time::UNIX_EPOCH + Duration::from_millis(start_ms),
                count,
                period: Duration::from_millis(1),
            }),
            columns: vec![FrameColumn {
                source_name: source.into(),
                values: TypedColumn::Int32((0..count as i32).collect()),
            }],
        }
    }

    #[test]
    fn column_is_present_for_every_block_that_names_it() {
        let process =
            SamplingProcess::assemble(vec![block(0, 3, "a"), block(3, 3, "a")]).unwrap();
        let table = ResultTable::new(process);
        let column = table.column("a").unwrap();
        assert_eq!(column.values.len(), 6);
        assert!(column.values.iter().all(|v| v.is_some()));
    }

    #[test]
    fn column_has_gaps_where_a_block_lacks_the_source() {
        let process =
            SamplingProcess::assemble(vec![block(0, 3, "a"), block(3, 3, "b")]).unwrap();
        let table = ResultTable::new(process);
        let column = table.column("a").unwrap();
        assert!(column.values[0].is_some());
        assert!(column.values[3].is_none());
    }

    #[test]
    fn unknown_source_is_an_error() {
        let process = SamplingProcess::assemble(vec![block(0, 3, "a")]).unwrap();
        let table = ResultTable::new(process);
        assert!(table.column("nonexistent").is_err());
    }

    #[test]
    fn second_access_hits_the_cache() {
        let process = SamplingProcess::assemble(vec![block(0, 3, "a")]).unwrap();
        let table = ResultTable::new(process);
        let first = table.column("a").unwrap();
        let second = table.column("a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn column_count_and_type_and_size_reflect_the_sources_present() {
        let process =
            SamplingProcess::assemble(vec![block(0, 3, "a"), block(3, 3, "b")]).unwrap();
        let table = ResultTable::new(process);
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.column_type("a").unwrap(), SupportedType::Int32);
        assert!(table.column_size("a").unwrap() > 0);
        assert!(table.column_type("nonexistent").is_err());
    }

    #[test]
    fn get_column_indexes_in_source_name_order() {
        let process = SamplingProcess::assemble(vec![block(0, 3, "a")]).unwrap();
        let table = ResultTable::new(process);
        let by_index = table.get_column(0).unwrap();
        let by_name = table.column("a").unwrap();
        assert!(Arc::ptr_eq(&by_index, &by_name));
        assert!(table.get_column(1).is_err());
    }

    #[test]
    fn get_value_and_get_row_agree_with_the_per_column_view() {
        let process =
            SamplingProcess::assemble(vec![block(0, 3, "a"), block(3, 3, "b")]).unwrap();
        let table = ResultTable::new(process);
        assert_eq!(table.get_value(0, "a").unwrap(), Some(ScalarValue::Int32(0)));
        assert_eq!(table.get_value(3, "a").unwrap(), None);

        let row = table.get_row(0).unwrap();
        assert!(row.iter().any(|(name, value)| name == "a" && value.is_some()));
        assert!(row.iter().any(|(name, value)| name == "b" && value.is_none()));
        assert!(table.get_row(6).is_err());
    }

    #[test]
    fn get_timestamps_covers_every_row_in_block_order() {
        let process =
            SamplingProcess::assemble(vec![block(0, 3, "a"), block(3, 3, "a")]).unwrap();
        let table = ResultTable::new(process);
        let timestamps = table.get_timestamps();
        assert_eq!(timestamps.len(), 6);
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn allocation_size_is_positive_once_columns_are_materialized() {
        let process = SamplingProcess::assemble(vec![block(0, 3, "a")]).unwrap();
        let table = ResultTable::new(process);
        assert!(table.allocation_size().unwrap() > 0);
    }
}
