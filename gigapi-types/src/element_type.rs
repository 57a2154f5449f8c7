use std::collections::HashMap;
use std::sync::OnceLock;

use arrow::datatypes::DataType as ArrowDataType;

/// The closed set of column element types. `Unknown` is a sentinel used only
/// to fail loudly when a caller hands us data we can't classify; it never
/// appears as the declared type of a live column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Int64,
    UInt64,
    Float64,
    String,
    Unknown,
}

impl ElementType {
    /// The canonical type name as it appears in a JSON index entry or schema map.
    pub fn canonical_name(self) -> &'static str {
        match self {
            ElementType::Int64 => "INT8",
            ElementType::UInt64 => "UBIGINT",
            ElementType::Float64 => "FLOAT8",
            ElementType::String => "VARCHAR",
            ElementType::Unknown => "UNKNOWN",
        }
    }

    pub fn arrow_data_type(self) -> ArrowDataType {
        match self {
            ElementType::Int64 => ArrowDataType::Int64,
            ElementType::UInt64 => ArrowDataType::UInt64,
            ElementType::Float64 => ArrowDataType::Float64,
            ElementType::String => ArrowDataType::Utf8,
            ElementType::Unknown => ArrowDataType::Null,
        }
    }

    /// Resolve a type name or alias (case-sensitive, matching the source
    /// catalog) to its canonical element type. Unrecognized names resolve to
    /// `Unknown` rather than erroring, so the caller can surface a uniform
    /// `InvalidData` with the offending string attached.
    pub fn from_name(name: &str) -> ElementType {
        *alias_table().get(name).unwrap_or(&ElementType::Unknown)
    }
}

fn alias_table() -> &'static HashMap<&'static str, ElementType> {
    static TABLE: OnceLock<HashMap<&'static str, ElementType>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            ("Int64", ElementType::Int64),
            ("BIGINT", ElementType::Int64),
            ("INT8", ElementType::Int64),
            ("LONG", ElementType::Int64),
            ("UInt64", ElementType::UInt64),
            ("UBIGINT", ElementType::UInt64),
            ("Float64", ElementType::Float64),
            ("DOUBLE", ElementType::Float64),
            ("FLOAT8", ElementType::Float64),
            ("String", ElementType::String),
            ("STRING", ElementType::String),
            ("VARCHAR", ElementType::String),
            ("CHAR", ElementType::String),
            ("BPCHAR", ElementType::String),
            ("TEXT", ElementType::String),
            ("UNKNOWN", ElementType::Unknown),
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical_type() {
        assert_eq!(ElementType::from_name("BIGINT"), ElementType::Int64);
        assert_eq!(ElementType::from_name("LONG"), ElementType::Int64);
        assert_eq!(ElementType::from_name("DOUBLE"), ElementType::Float64);
        assert_eq!(ElementType::from_name("TEXT"), ElementType::String);
        assert_eq!(ElementType::from_name("UBIGINT"), ElementType::UInt64);
    }

    #[test]
    fn unrecognized_name_is_unknown() {
        assert_eq!(ElementType::from_name("BOOLEAN"), ElementType::Unknown);
    }

    #[test]
    fn canonical_name_round_trips_through_from_name() {
        for t in [
            ElementType::Int64,
            ElementType::UInt64,
            ElementType::Float64,
            ElementType::String,
        ] {
            assert_eq!(ElementType::from_name(t.canonical_name()), t);
        }
    }
}
