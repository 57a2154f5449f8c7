use arrow::array::{
    ArrayBuilder, Float64Builder, Int64Builder, StringBuilder, UInt64Builder,
};

use crate::element_type::ElementType;
use crate::error::{IngestError, Result};

/// A single scalar value from the closed element-type set, used for min/max
/// bookkeeping and for comparisons that need to carry the type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    String(String),
}

/// A homogeneous, densely-packed typed vector: the raw storage behind a
/// [`gigapi_store::Column`]. Validity (nullability) is tracked one layer up
/// by the column container, not here — `ColumnData` only knows how to hold,
/// append, compare, and serialize *values*.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float64(Vec<f64>),
    String(Vec<String>),
}

impl ColumnData {
    pub fn make_store(element_type: ElementType, size: usize, cap: usize) -> Result<ColumnData> {
        let cap = cap.max(size);
        Ok(match element_type {
            ElementType::Int64 => ColumnData::Int64(Vec::with_capacity(cap).tap_zero(size)),
            ElementType::UInt64 => ColumnData::UInt64(Vec::with_capacity(cap).tap_zero(size)),
            ElementType::Float64 => ColumnData::Float64(Vec::with_capacity(cap).tap_zero(size)),
            ElementType::String => {
                let mut v: Vec<String> = Vec::with_capacity(cap);
                v.resize(size, String::new());
                ColumnData::String(v)
            }
            ElementType::Unknown => {
                return Err(IngestError::InvalidData(
                    "cannot create a store of Unknown element type".into(),
                ));
            }
        })
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            ColumnData::Int64(_) => ElementType::Int64,
            ColumnData::UInt64(_) => ElementType::UInt64,
            ColumnData::Float64(_) => ElementType::Float64,
            ColumnData::String(_) => ElementType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int64(v) => v.len(),
            ColumnData::UInt64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Confirms a raw batch buffer has the expected element type.
    pub fn validate(&self, expected: ElementType) -> Result<()> {
        if self.element_type() != expected {
            return Err(IngestError::InvalidData(format!(
                "expected {}, got {}",
                expected.canonical_name(),
                self.element_type().canonical_name()
            )));
        }
        Ok(())
    }

    /// Appends `n` default (zero-valued) entries; the caller is responsible
    /// for marking the corresponding validity bits false.
    pub fn append_default(&mut self, n: usize) {
        match self {
            ColumnData::Int64(v) => v.resize(v.len() + n, 0),
            ColumnData::UInt64(v) => v.resize(v.len() + n, 0),
            ColumnData::Float64(v) => v.resize(v.len() + n, 0.0),
            ColumnData::String(v) => v.resize(v.len() + n, String::new()),
        }
    }

    pub fn append_one(&mut self, val: Scalar) -> Result<()> {
        match (self, val) {
            (ColumnData::Int64(v), Scalar::Int64(x)) => v.push(x),
            (ColumnData::UInt64(v), Scalar::UInt64(x)) => v.push(x),
            (ColumnData::Float64(v), Scalar::Float64(x)) => v.push(x),
            (ColumnData::String(v), Scalar::String(x)) => v.push(x),
            (dst, val) => {
                return Err(IngestError::InvalidData(format!(
                    "cannot append a {:?} value into a {} column",
                    val,
                    dst.element_type().canonical_name()
                )));
            }
        }
        Ok(())
    }

    /// Appends every element of `src` onto `self`. Both must share an
    /// element type.
    pub fn append_store(&mut self, src: &ColumnData) -> Result<()> {
        match (self, src) {
            (ColumnData::Int64(d), ColumnData::Int64(s)) => d.extend_from_slice(s),
            (ColumnData::UInt64(d), ColumnData::UInt64(s)) => d.extend_from_slice(s),
            (ColumnData::Float64(d), ColumnData::Float64(s)) => d.extend_from_slice(s),
            (ColumnData::String(d), ColumnData::String(s)) => d.extend_from_slice(s),
            (dst, src) => {
                return Err(IngestError::InvalidData(format!(
                    "cannot append a {} store onto a {} store",
                    src.element_type().canonical_name(),
                    dst.element_type().canonical_name()
                )));
            }
        }
        Ok(())
    }

    /// Appends from `src` only the positions where `mask` (a bitset of
    /// length `ceil(len(src)/8)`, bit `i` in byte `i/8`) has a `1`.
    /// Contiguous runs of set bits are copied in bulk rather than element
    /// by element.
    pub fn append_by_mask(&mut self, src: &ColumnData, mask: &[u8]) -> Result<()> {
        let src_len = src.len();
        if mask.len() != src_len.div_ceil(8) {
            return Err(IngestError::InvalidData(format!(
                "invalid mask length: expected {} bytes for {} rows, got {}",
                src_len.div_ceil(8),
                src_len,
                mask.len()
            )));
        }
        macro_rules! copy_runs {
            ($dst:expr, $src:expr) => {{
                let mut start = 0usize;
                let mut end = 0usize;
                for i in 0..mask.len() * 8 {
                    let bit_set = i < src_len && mask[i / 8] & (1 << (i % 8)) != 0;
                    if bit_set {
                        if start == end {
                            start = i;
                        }
                        end = i + 1;
                        continue;
                    }
                    if start != end {
                        $dst.extend_from_slice(&$src[start..end]);
                    }
                    start = i + 1;
                    end = i + 1;
                }
                if start != end {
                    $dst.extend_from_slice(&$src[start..end]);
                }
            }};
        }
        match (self, src) {
            (ColumnData::Int64(d), ColumnData::Int64(s)) => copy_runs!(d, s),
            (ColumnData::UInt64(d), ColumnData::UInt64(s)) => copy_runs!(d, s),
            (ColumnData::Float64(d), ColumnData::Float64(s)) => copy_runs!(d, s),
            (ColumnData::String(d), ColumnData::String(s)) => copy_runs!(d, s),
            (dst, src) => {
                return Err(IngestError::InvalidData(format!(
                    "cannot mask-append a {} store onto a {} store",
                    src.element_type().canonical_name(),
                    dst.element_type().canonical_name()
                )));
            }
        }
        Ok(())
    }

    /// Raw ordering between two indices, ignoring validity. Natural
    /// ordering for the element type (`PartialOrd` on the underlying type;
    /// `NaN` sorts as the Rust `f64` total order would, which is acceptable
    /// since sort keys in practice are timestamps).
    pub fn raw_less(&self, i: usize, j: usize) -> bool {
        match self {
            ColumnData::Int64(v) => v[i] < v[j],
            ColumnData::UInt64(v) => v[i] < v[j],
            ColumnData::Float64(v) => v[i] < v[j],
            ColumnData::String(v) => v[i] < v[j],
        }
    }

    pub fn get(&self, i: usize) -> Scalar {
        match self {
            ColumnData::Int64(v) => Scalar::Int64(v[i]),
            ColumnData::UInt64(v) => Scalar::UInt64(v[i]),
            ColumnData::Float64(v) => Scalar::Float64(v[i]),
            ColumnData::String(v) => Scalar::String(v[i].clone()),
        }
    }

    /// `(min, max)` over valid entries only, or `None` if there are none.
    pub fn min_max(&self, validity: &[bool]) -> Option<(Scalar, Scalar)> {
        let idxs: Vec<usize> = (0..self.len()).filter(|&i| validity[i]).collect();
        if idxs.is_empty() {
            return None;
        }
        let mut min_i = idxs[0];
        let mut max_i = idxs[0];
        for &i in &idxs[1..] {
            if self.raw_less(i, min_i) {
                min_i = i;
            }
            if self.raw_less(max_i, i) {
                max_i = i;
            }
        }
        Some((self.get(min_i), self.get(max_i)))
    }

    pub fn parse_str(element_type: ElementType, s: &str) -> Result<Scalar> {
        Ok(match element_type {
            ElementType::Int64 => Scalar::Int64(
                s.parse::<i64>()
                    .map_err(|e| IngestError::InvalidData(format!("parsing i64 `{s}`: {e}")))?,
            ),
            ElementType::UInt64 => Scalar::UInt64(
                s.parse::<u64>()
                    .map_err(|e| IngestError::InvalidData(format!("parsing u64 `{s}`: {e}")))?,
            ),
            ElementType::Float64 => Scalar::Float64(
                s.parse::<f64>()
                    .map_err(|e| IngestError::InvalidData(format!("parsing f64 `{s}`: {e}")))?,
            ),
            ElementType::String => Scalar::String(s.to_string()),
            ElementType::Unknown => {
                return Err(IngestError::InvalidData(
                    "cannot parse a value of Unknown element type".into(),
                ));
            }
        })
    }

    /// Pulls one value out of a `serde_json::Value` token (our stand-in for
    /// a streaming JSON decoder) and appends it.
    pub fn parse_json(&mut self, value: &serde_json::Value) -> Result<()> {
        let scalar = match (self.element_type(), value) {
            (ElementType::Int64, serde_json::Value::Number(n)) => Scalar::Int64(
                n.as_i64()
                    .ok_or_else(|| IngestError::InvalidData(format!("not an i64: {n}")))?,
            ),
            (ElementType::UInt64, serde_json::Value::Number(n)) => Scalar::UInt64(
                n.as_u64()
                    .ok_or_else(|| IngestError::InvalidData(format!("not a u64: {n}")))?,
            ),
            (ElementType::Float64, serde_json::Value::Number(n)) => Scalar::Float64(
                n.as_f64()
                    .ok_or_else(|| IngestError::InvalidData(format!("not an f64: {n}")))?,
            ),
            (ElementType::String, serde_json::Value::String(s)) => Scalar::String(s.clone()),
            (expected, other) => {
                return Err(IngestError::InvalidData(format!(
                    "expected a {} token, got {other}",
                    expected.canonical_name()
                )));
            }
        };
        self.append_one(scalar)
    }

    /// Emits the full vector (or, if `index` is given, the values in that
    /// order) into an Arrow builder, inserting nulls where `validity` is
    /// false. `index` is used by the merge/sort path to reorder rows
    /// without materializing a second copy of the column.
    pub fn write_to_batch(
        &self,
        builder: &mut dyn ArrayBuilder,
        index: Option<&[u32]>,
        validity: &[bool],
    ) -> Result<()> {
        macro_rules! emit {
            ($data:expr, $builder_ty:ty) => {{
                let b = builder.as_any_mut().downcast_mut::<$builder_ty>().ok_or_else(|| {
                    IngestError::InvalidData("arrow builder type mismatch".into())
                })?;
                match index {
                    Some(idx) => {
                        for &i in idx {
                            let i = i as usize;
                            if validity[i] {
                                b.append_value($data[i].clone());
                            } else {
                                b.append_null();
                            }
                        }
                    }
                    None => {
                        for (i, v) in $data.iter().enumerate() {
                            if validity[i] {
                                b.append_value(v.clone());
                            } else {
                                b.append_null();
                            }
                        }
                    }
                }
            }};
        }
        match self {
            ColumnData::Int64(v) => emit!(v, Int64Builder),
            ColumnData::UInt64(v) => emit!(v, UInt64Builder),
            ColumnData::Float64(v) => emit!(v, Float64Builder),
            ColumnData::String(v) => emit!(v, StringBuilder),
        }
        Ok(())
    }
}

trait TapZero<T> {
    fn tap_zero(self, size: usize) -> Vec<T>;
}

impl<T: Default + Clone> TapZero<T> for Vec<T> {
    fn tap_zero(mut self, size: usize) -> Vec<T> {
        self.resize(size, T::default());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_by_mask_copies_only_set_bits() {
        let src = ColumnData::Int64(vec![10, 20, 30, 40, 50]);
        // bits: 1,0,1,1,0 -> byte 0b01101 = 0x0D
        let mask = [0b0000_1101u8];
        let mut dst = ColumnData::Int64(vec![]);
        dst.append_by_mask(&src, &mask).unwrap();
        assert_eq!(dst, ColumnData::Int64(vec![10, 30, 40]));
    }

    #[test]
    fn append_by_mask_rejects_wrong_length() {
        let src = ColumnData::Int64(vec![1, 2, 3]);
        let mut dst = ColumnData::Int64(vec![]);
        assert!(dst.append_by_mask(&src, &[]).is_err());
    }

    #[test]
    fn min_max_ignores_invalid_entries() {
        let data = ColumnData::Float64(vec![5.0, -1.0, 9.0, 100.0]);
        let validity = vec![true, true, true, false];
        let (min, max) = data.min_max(&validity).unwrap();
        assert_eq!(min, Scalar::Float64(-1.0));
        assert_eq!(max, Scalar::Float64(9.0));
    }

    #[test]
    fn min_max_empty_when_all_invalid() {
        let data = ColumnData::Int64(vec![1, 2, 3]);
        assert!(data.min_max(&[false, false, false]).is_none());
    }

    #[test]
    fn append_store_rejects_mismatched_types() {
        let mut dst = ColumnData::Int64(vec![1]);
        let src = ColumnData::String(vec!["x".into()]);
        assert!(dst.append_store(&src).is_err());
    }

    #[test]
    fn parse_str_round_trips_each_type() {
        assert_eq!(
            ColumnData::parse_str(ElementType::Int64, "42").unwrap(),
            Scalar::Int64(42)
        );
        assert_eq!(
            ColumnData::parse_str(ElementType::Float64, "3.5").unwrap(),
            Scalar::Float64(3.5)
        );
        assert_eq!(
            ColumnData::parse_str(ElementType::String, "hi").unwrap(),
            Scalar::String("hi".into())
        );
        assert!(ColumnData::parse_str(ElementType::Int64, "not-a-number").is_err());
    }
}
