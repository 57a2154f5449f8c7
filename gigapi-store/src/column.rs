use arrow::array::{make_builder, ArrayRef};
use arrow::datatypes::DataType as ArrowDataType;
use gigapi_types::{ColumnData, ElementType, IngestError, Result, Scalar};

/// A typed, nullable, append-only column: a [`ColumnData`] vector paired
/// with a parallel validity bitmap. Once created, `element_type` never
/// changes; appends only ever grow both vectors, never shrink them.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    element_type: ElementType,
    data: ColumnData,
    /// `true` at index `i` means "value present" at `i`.
    validity: Vec<bool>,
}

impl Column {
    /// An empty column with an optional capacity hint.
    pub fn new(name: impl Into<String>, element_type: ElementType, cap: usize) -> Result<Column> {
        Ok(Column {
            name: name.into(),
            element_type,
            data: ColumnData::make_store(element_type, 0, cap)?,
            validity: Vec::with_capacity(cap),
        })
    }

    /// A column backfilled with `n` nulls, used when a new column name
    /// appears mid-stream and the store must catch it up to `size`.
    pub fn with_nulls(name: impl Into<String>, element_type: ElementType, n: usize) -> Result<Column> {
        let mut c = Column::new(name, element_type, n)?;
        c.append_default_nulls(n);
        Ok(c)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.data.len(), self.validity.len());
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn validity(&self) -> &[bool] {
        &self.validity
    }

    fn check_type(&self, other: ElementType) -> Result<()> {
        if self.element_type != other {
            return Err(IngestError::SchemaConflict {
                column: self.name.clone(),
                expected: self.element_type.canonical_name().to_string(),
                got: other.canonical_name().to_string(),
            });
        }
        Ok(())
    }

    /// Appends `n` nulls (default values with validity false).
    pub fn append_default_nulls(&mut self, n: usize) {
        self.data.append_default(n);
        self.validity.extend(std::iter::repeat_n(false, n));
    }

    /// Appends an entire same-typed vector as valid entries.
    pub fn append_store(&mut self, src: &ColumnData) -> Result<()> {
        self.check_type(src.element_type())?;
        let added = src.len();
        self.data.append_store(src)?;
        self.validity.extend(std::iter::repeat_n(true, added));
        Ok(())
    }

    /// Appends from `src` only the rows selected by `mask` (the
    /// partitioning path). Selected rows are marked valid — batches are
    /// assumed fully populated before any column-evolution nulls are
    /// introduced.
    pub fn append_by_mask(&mut self, src: &ColumnData, mask: &[u8]) -> Result<()> {
        self.check_type(src.element_type())?;
        let before = self.data.len();
        self.data.append_by_mask(src, mask)?;
        let added = self.data.len() - before;
        self.validity.extend(std::iter::repeat_n(true, added));
        Ok(())
    }

    /// `(min, max)` over the valid entries, or `None` if the column is
    /// empty or entirely null.
    pub fn min_max(&self) -> Option<(Scalar, Scalar)> {
        self.data.min_max(&self.validity)
    }

    /// Emits this column into a fresh Arrow array, honoring `index` (a row
    /// reorder) and validity.
    pub fn to_arrow_array(&self, index: Option<&[u32]>) -> Result<ArrayRef> {
        let arrow_type = self.element_type.arrow_data_type();
        let len = index.map(|i| i.len()).unwrap_or_else(|| self.len());
        let mut builder = make_builder(&arrow_type, len);
        self.data.write_to_batch(builder.as_mut(), index, &self.validity)?;
        Ok(builder.finish())
    }

    /// Appends `n` nulls of whatever Arrow type is requested, used when a
    /// column is entirely absent from the store at flush time.
    pub fn arrow_nulls(arrow_type: &ArrowDataType, n: usize) -> ArrayRef {
        let mut builder = make_builder(arrow_type, n);
        for _ in 0..n {
            // every concrete builder arrow::array::make_builder returns implements append_null
            append_null_any(builder.as_mut());
        }
        builder.finish()
    }
}

fn append_null_any(builder: &mut dyn arrow::array::ArrayBuilder) {
    use arrow::array::{Float64Builder, Int64Builder, StringBuilder, UInt64Builder};
    if let Some(b) = builder.as_any_mut().downcast_mut::<Int64Builder>() {
        b.append_null();
    } else if let Some(b) = builder.as_any_mut().downcast_mut::<UInt64Builder>() {
        b.append_null();
    } else if let Some(b) = builder.as_any_mut().downcast_mut::<Float64Builder>() {
        b.append_null();
    } else if let Some(b) = builder.as_any_mut().downcast_mut::<StringBuilder>() {
        b.append_null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_nulls_has_matching_lengths_and_no_valid_entries() {
        let c = Column::with_nulls("a", ElementType::Int64, 5).unwrap();
        assert_eq!(c.len(), 5);
        assert!(c.validity().iter().all(|v| !v));
        assert!(c.min_max().is_none());
    }

    #[test]
    fn append_store_marks_everything_valid() {
        let mut c = Column::new("a", ElementType::Float64, 0).unwrap();
        c.append_store(&ColumnData::Float64(vec![1.0, 2.0])).unwrap();
        assert_eq!(c.len(), 2);
        assert!(c.validity().iter().all(|v| *v));
    }

    #[test]
    fn append_store_rejects_type_mismatch() {
        let mut c = Column::new("a", ElementType::Int64, 0).unwrap();
        let err = c.append_store(&ColumnData::String(vec!["x".into()])).unwrap_err();
        assert!(matches!(err, IngestError::SchemaConflict { .. }));
    }

    #[test]
    fn invariant_lengths_stay_equal_after_mixed_appends() {
        let mut c = Column::new("a", ElementType::Int64, 0).unwrap();
        c.append_default_nulls(3);
        c.append_store(&ColumnData::Int64(vec![1, 2])).unwrap();
        assert_eq!(c.len(), 5);
        assert_eq!(c.validity(), &[false, false, false, true, true]);
    }
}
