use std::collections::HashMap;

use gigapi_store::RawBatch;
use gigapi_types::{ColumnData, ElementType, IngestError, Result};

/// Decodes one JSON object per line into a column-major [`RawBatch`].
/// Grounded on `original_source/merge/parsers/ndjson_insert_parser.go`'s
/// line-by-line scan, simplified per Design Notes §9 (§9's tagged-variant
/// rewrite means the parser produces `ColumnData` directly instead of the
/// Go source's `map[string]any` + runtime type reflection).
///
/// The element type of each column is inferred from the first line's
/// values (numbers without a fractional/exponent part are `Int64`, other
/// numbers are `Float64`, JSON strings are `String`); every subsequent line
/// must carry exactly the same set of keys — a batch is schema-homogeneous
/// by construction, matching the data store's "every column's length
/// equals the batch size" invariant (§4.3) without needing per-row nulls at
/// this layer.
pub fn parse_ndjson(body: &[u8]) -> Result<RawBatch> {
    let text = std::str::from_utf8(body)
        .map_err(|e| IngestError::InvalidData(format!("NDJSON body is not valid UTF-8: {e}")))?;

    let mut columns: RawBatch = HashMap::new();
    let mut expected_keys: Option<Vec<String>> = None;
    let mut line_no = 0usize;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_no += 1;

        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| IngestError::InvalidData(format!("line {line_no}: invalid JSON: {e}")))?;
        let serde_json::Value::Object(obj) = value else {
            return Err(IngestError::InvalidData(format!(
                "line {line_no}: expected a JSON object"
            )));
        };

        match &expected_keys {
            None => {
                let mut keys: Vec<String> = obj.keys().cloned().collect();
                keys.sort();
                for key in &keys {
                    let element_type = infer_type(&obj[key])?;
                    columns.insert(key.clone(), ColumnData::make_store(element_type, 0, 0)?);
                }
                expected_keys = Some(keys);
            }
            Some(keys) => {
                let mut actual: Vec<String> = obj.keys().cloned().collect();
                actual.sort();
                if &actual != keys {
                    return Err(IngestError::InvalidData(format!(
                        "line {line_no}: column set changed mid-batch (NDJSON batches must be schema-homogeneous)"
                    )));
                }
            }
        }

        for (key, column) in columns.iter_mut() {
            let value = obj
                .get(key)
                .expect("key presence was checked against expected_keys above");
            column
                .parse_json(value)
                .map_err(|e| IngestError::InvalidData(format!("line {line_no}, column `{key}`: {e}")))?;
        }
    }

    Ok(columns)
}

fn infer_type(value: &serde_json::Value) -> Result<ElementType> {
    match value {
        serde_json::Value::String(_) => Ok(ElementType::String),
        serde_json::Value::Number(n) if n.is_i64() => Ok(ElementType::Int64),
        serde_json::Value::Number(_) => Ok(ElementType::Float64),
        other => Err(IngestError::InvalidData(format!(
            "unsupported NDJSON value `{other}`: only strings and numbers are supported"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_homogeneous_batch() {
        let body = b"{\"value\":1.0,\"host\":\"a\"}\n{\"value\":2.0,\"host\":\"b\"}\n";
        let batch = parse_ndjson(body).unwrap();
        assert_eq!(batch["value"], ColumnData::Float64(vec![1.0, 2.0]));
        assert_eq!(batch["host"], ColumnData::String(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn infers_int64_for_integral_literals() {
        let body = b"{\"n\":1}\n{\"n\":2}\n";
        let batch = parse_ndjson(body).unwrap();
        assert_eq!(batch["n"], ColumnData::Int64(vec![1, 2]));
    }

    #[test]
    fn rejects_changing_schema_mid_batch() {
        let body = b"{\"a\":1}\n{\"a\":1,\"b\":2}\n";
        assert!(parse_ndjson(body).is_err());
    }

    #[test]
    fn blank_lines_are_skipped() {
        let body = b"{\"a\":1}\n\n{\"a\":2}\n";
        let batch = parse_ndjson(body).unwrap();
        assert_eq!(batch["a"], ColumnData::Int64(vec![1, 2]));
    }
}
