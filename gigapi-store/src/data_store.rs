use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch};
use arrow::datatypes::{Field, Schema};
use gigapi_types::{ColumnData, IngestError, Result};

use crate::column::Column;

/// A raw incoming batch: one equal-length `ColumnData` vector per column
/// name. Produced by the wire layer (NDJSON/line-protocol decoders); the
/// data store never sees wire formats.
pub type RawBatch = HashMap<String, ColumnData>;

/// A mapping from column name to [`Column`], plus the scalar row count.
/// Only the *unordered* variant is implemented — ordering is deferred to
/// merge time, where the external engine does the sort (see the merge
/// service). An older *ordered* variant existed upstream but its
/// in-process b-tree merge is legacy and is not reproduced here.
#[derive(Debug, Default)]
pub struct DataStore {
    columns: HashMap<String, Column>,
    size: i64,
}

fn batch_row_count(batch: &RawBatch) -> Result<usize> {
    let mut size: Option<usize> = None;
    for (name, data) in batch {
        match size {
            None => size = Some(data.len()),
            Some(expected) if expected != data.len() => {
                return Err(IngestError::InvalidData(format!(
                    "column `{name}` size mismatch: expected {expected} rows, got {} rows",
                    data.len()
                )));
            }
            _ => {}
        }
    }
    Ok(size.unwrap_or(0))
}

impl DataStore {
    pub fn new() -> DataStore {
        DataStore::default()
    }

    pub fn get_size(&self) -> i64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// `{column name: canonical type name}` for every column currently in
    /// the store.
    pub fn get_schema(&self) -> HashMap<String, String> {
        self.columns
            .iter()
            .map(|(name, col)| (name.clone(), col.element_type().canonical_name().to_string()))
            .collect()
    }

    /// Checks every batch column against the column already in the store
    /// under the same name, if any. A type mismatch here is a
    /// `SchemaConflict`, not an `InvalidData` — the batch is well-formed,
    /// it just disagrees with this partition's established schema (§7).
    fn validate_batch(&self, batch: &RawBatch) -> Result<()> {
        for (name, data) in batch {
            if let Some(existing) = self.columns.get(name) {
                let got = data.element_type();
                if got != existing.element_type() {
                    return Err(IngestError::SchemaConflict {
                        column: name.clone(),
                        expected: existing.element_type().canonical_name().to_string(),
                        got: got.canonical_name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Validates `batch`, then normalizes the schema: columns present in
    /// the batch but new to the store are back-filled with `size` nulls;
    /// columns already in the store but absent from the batch receive
    /// `batch_rows` nulls. Appends every row.
    pub fn append_batch(&mut self, batch: RawBatch) -> Result<()> {
        self.validate_batch(&batch)?;
        let batch_rows = batch_row_count(&batch)?;

        let mut names: std::collections::BTreeSet<String> = self.columns.keys().cloned().collect();
        names.extend(batch.keys().cloned());

        for name in names {
            match (self.columns.get_mut(&name), batch.get(&name)) {
                (Some(col), Some(data)) => col.append_store(data)?,
                (Some(col), None) => col.append_default_nulls(batch_rows),
                (None, Some(data)) => {
                    let mut col = Column::with_nulls(name.clone(), data.element_type(), self.size as usize)?;
                    col.append_store(data)?;
                    self.columns.insert(name, col);
                }
                (None, None) => unreachable!("name came from one of the two maps"),
            }
        }
        self.size += batch_rows as i64;
        Ok(())
    }

    /// The partitioning path: appends only the rows selected by `mask`
    /// (popcount(mask) rows) from `batch`, with the same schema-evolution
    /// rules as [`DataStore::append_batch`].
    pub fn append_by_mask(&mut self, batch: &RawBatch, mask: &[u8]) -> Result<()> {
        self.validate_batch(batch)?;
        let selected_rows = popcount(mask);

        let mut names: std::collections::BTreeSet<String> = self.columns.keys().cloned().collect();
        names.extend(batch.keys().cloned());

        for name in names {
            match (self.columns.get_mut(&name), batch.get(&name)) {
                (Some(col), Some(data)) => col.append_by_mask(data, mask)?,
                (Some(col), None) => col.append_default_nulls(selected_rows),
                (None, Some(data)) => {
                    let mut col = Column::with_nulls(name.clone(), data.element_type(), self.size as usize)?;
                    col.append_by_mask(data, mask)?;
                    self.columns.insert(name, col);
                }
                (None, None) => unreachable!("name came from one of the two maps"),
            }
        }
        self.size += selected_rows as i64;
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Writes every column in `schema` into a fresh Arrow `RecordBatch`,
    /// emitting absent columns as `N` nulls (`N` = current store size).
    pub fn store_to_arrow(&self, schema: &Schema) -> Result<RecordBatch> {
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            let array = match self.columns.get(field.name()) {
                Some(col) => col.to_arrow_array(None)?,
                None => Column::arrow_nulls(field.data_type(), self.size as usize),
            };
            arrays.push(array);
        }
        RecordBatch::try_new(Arc::new(schema.clone()), arrays)
            .map_err(|e| IngestError::InvalidData(format!("building record batch: {e}")))
    }

    /// An Arrow schema covering every column currently in the store, each
    /// field nullable, in a stable (sorted) field order.
    pub fn arrow_schema(&self) -> Schema {
        let mut names: Vec<&String> = self.columns.keys().collect();
        names.sort();
        let fields: Vec<Field> = names
            .into_iter()
            .map(|name| {
                let col = &self.columns[name];
                Field::new(name, col.element_type().arrow_data_type(), true)
            })
            .collect();
        Schema::new(fields)
    }

    /// min/max of `sort_key` over the whole store, used when building a
    /// flushed file's index entry.
    pub fn min_max_of(&self, sort_key: &str) -> Option<(gigapi_types::Scalar, gigapi_types::Scalar)> {
        self.columns.get(sort_key).and_then(|c| c.min_max())
    }
}

fn popcount(mask: &[u8]) -> usize {
    mask.iter().map(|b| b.count_ones() as usize).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(pairs: &[(&str, ColumnData)]) -> RawBatch {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn schema_evolution_backfills_new_column_with_store_size_nulls() {
        let mut ds = DataStore::new();
        ds.append_batch(batch(&[("a", ColumnData::Int64(vec![1, 2, 3]))])).unwrap();
        ds.append_batch(batch(&[
            ("a", ColumnData::Int64(vec![4])),
            ("b", ColumnData::String(vec!["x".into()])),
        ]))
        .unwrap();
        let b = ds.column("b").unwrap();
        assert_eq!(b.len(), 4);
        assert_eq!(b.validity(), &[false, false, false, true]);
    }

    #[test]
    fn schema_evolution_pads_missing_column_with_batch_size_nulls() {
        let mut ds = DataStore::new();
        ds.append_batch(batch(&[
            ("a", ColumnData::Int64(vec![1])),
            ("b", ColumnData::String(vec!["x".into()])),
        ]))
        .unwrap();
        ds.append_batch(batch(&[("a", ColumnData::Int64(vec![2, 3]))])).unwrap();
        let b = ds.column("b").unwrap();
        assert_eq!(b.len(), 3);
        assert_eq!(b.validity(), &[true, false, false]);
    }

    #[test]
    fn conflicting_type_is_rejected_before_any_mutation() {
        let mut ds = DataStore::new();
        ds.append_batch(batch(&[("a", ColumnData::Float64(vec![1.0]))])).unwrap();
        let err = ds
            .append_batch(batch(&[("a", ColumnData::Int64(vec![1]))]))
            .unwrap_err();
        assert!(matches!(err, IngestError::SchemaConflict { .. }));
        assert_eq!(ds.get_size(), 1);
    }

    #[test]
    fn mismatched_batch_column_lengths_rejected() {
        let mut ds = DataStore::new();
        let err = ds
            .append_batch(batch(&[
                ("a", ColumnData::Int64(vec![1, 2])),
                ("b", ColumnData::Int64(vec![1])),
            ]))
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidData(_)));
    }

    #[test]
    fn append_by_mask_covers_selected_rows_only() {
        let mut ds = DataStore::new();
        // 5 rows, select rows 0, 2, 3 (mask 0b00001101)
        ds.append_by_mask(
            &batch(&[("v", ColumnData::Int64(vec![10, 20, 30, 40, 50]))]),
            &[0b0000_1101],
        )
        .unwrap();
        assert_eq!(ds.get_size(), 3);
        assert_eq!(ds.column("v").unwrap().data(), &ColumnData::Int64(vec![10, 30, 40]));
    }
}
