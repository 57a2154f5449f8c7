use std::collections::HashMap;

use gigapi_store::RawBatch;
use gigapi_types::{ColumnData, ElementType, IngestError, Result, Scalar};

/// One measurement's worth of rows decoded from an InfluxDB line-protocol
/// payload, grouped so every row shares the same tag/field names and
/// types (see [`parse_line_protocol`]).
#[derive(Debug)]
pub struct LineBatch {
    pub measurement: String,
    pub batch: RawBatch,
}

#[derive(Debug, Clone)]
enum FieldValue {
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    String(String),
    Bool(bool),
}

impl FieldValue {
    /// The closed element-type set has no `Bool`; booleans are stored as
    /// `Int64` 0/1, matching the common convention of integer-coded flags
    /// (the source's `BOOLEAN` alias is dead per `gigapi-types`' alias
    /// table — see DESIGN.md).
    fn element_type(&self) -> ElementType {
        match self {
            FieldValue::Int64(_) | FieldValue::Bool(_) => ElementType::Int64,
            FieldValue::UInt64(_) => ElementType::UInt64,
            FieldValue::Float64(_) => ElementType::Float64,
            FieldValue::String(_) => ElementType::String,
        }
    }

    fn into_scalar(self) -> Scalar {
        match self {
            FieldValue::Int64(v) => Scalar::Int64(v),
            FieldValue::UInt64(v) => Scalar::UInt64(v),
            FieldValue::Float64(v) => Scalar::Float64(v),
            FieldValue::String(v) => Scalar::String(v),
            FieldValue::Bool(v) => Scalar::Int64(i64::from(v)),
        }
    }
}

struct ParsedPoint {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp_ns: i64,
}

/// Decodes an InfluxDB line-protocol payload (one point per line) into a
/// `LineBatch` per distinct `(measurement, column schema)` pair, so every
/// resulting `RawBatch` is internally homogeneous before it ever reaches
/// the data store. Grounded on
/// `original_source/merge/parsers/lineproto_parser.go`: that source groups
/// points by measurement and a hash of the tag/field name+type set
/// (`getSchemaId`), flushing a new group whenever either changes; this
/// keeps the same grouping *intent* without depending on a particular hash
/// function, since nothing downstream inspects the hash itself.
pub fn parse_line_protocol(body: &[u8]) -> Result<Vec<LineBatch>> {
    let text = std::str::from_utf8(body)
        .map_err(|e| IngestError::InvalidData(format!("line protocol body is not valid UTF-8: {e}")))?;

    let mut groups: Vec<((String, Vec<(String, ElementType)>), Vec<ParsedPoint>)> = Vec::new();

    for (line_no, raw_line) in text.lines().enumerate() {
        let raw_line = raw_line.trim();
        if raw_line.is_empty() || raw_line.starts_with('#') {
            continue;
        }
        let point = parse_line(raw_line)
            .map_err(|e| IngestError::InvalidData(format!("line {}: {e}", line_no + 1)))?;

        let mut schema: Vec<(String, ElementType)> = point
            .tags
            .iter()
            .map(|(k, _)| (k.clone(), ElementType::String))
            .chain(point.fields.iter().map(|(k, v)| (k.clone(), v.element_type())))
            .collect();
        schema.sort();
        let key = (point.measurement.clone(), schema);

        let mut appended = false;
        for (existing_key, points) in groups.iter_mut() {
            if *existing_key == key {
                points.push(point);
                appended = true;
                break;
            }
        }
        if !appended {
            groups.push((key, vec![point]));
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for ((measurement, schema), points) in groups {
        let mut batch: RawBatch = HashMap::new();
        for (name, element_type) in &schema {
            batch.insert(name.clone(), ColumnData::make_store(*element_type, 0, points.len())?);
        }
        let mut time = ColumnData::make_store(ElementType::Int64, 0, points.len())?;

        for point in points {
            for (name, value) in point.tags {
                batch
                    .get_mut(&name)
                    .expect("tag name present in schema by construction")
                    .append_one(Scalar::String(value))?;
            }
            for (name, value) in point.fields {
                batch
                    .get_mut(&name)
                    .expect("field name present in schema by construction")
                    .append_one(value.into_scalar())?;
            }
            time.append_one(Scalar::Int64(point.timestamp_ns))?;
        }
        batch.insert("time".to_string(), time);
        out.push(LineBatch { measurement, batch });
    }
    Ok(out)
}

fn parse_line(line: &str) -> Result<ParsedPoint> {
    let (measurement_and_tags, rest) = split_once_unescaped(line, ' ')
        .ok_or_else(|| IngestError::InvalidData(format!("missing fields section in `{line}`")))?;
    let (fields_part, timestamp_part) = match split_once_unescaped(rest, ' ') {
        Some((f, t)) => (f, Some(t.trim())),
        None => (rest, None),
    };

    let mut tokens = split_unescaped(measurement_and_tags, ',');
    if tokens.is_empty() {
        return Err(IngestError::InvalidData(format!("missing measurement in `{line}`")));
    }
    let measurement = unescape(&tokens.remove(0));
    if measurement.is_empty() {
        return Err(IngestError::InvalidData(format!("empty measurement in `{line}`")));
    }

    let mut tags = Vec::with_capacity(tokens.len());
    for token in &tokens {
        let (k, v) = split_once_unescaped(token, '=')
            .ok_or_else(|| IngestError::InvalidData(format!("malformed tag `{token}`")))?;
        tags.push((unescape(k), unescape(v)));
    }
    tags.sort();

    let mut fields = Vec::new();
    for token in split_unescaped(fields_part, ',') {
        let (k, v) = split_once_unescaped(&token, '=')
            .ok_or_else(|| IngestError::InvalidData(format!("malformed field `{token}`")))?;
        fields.push((unescape(k), parse_field_value(v)?));
    }
    if fields.is_empty() {
        return Err(IngestError::InvalidData(format!("no fields in `{line}`")));
    }
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let timestamp_ns = match timestamp_part {
        Some(t) if !t.is_empty() => t
            .parse::<i64>()
            .map_err(|e| IngestError::InvalidData(format!("invalid timestamp `{t}`: {e}")))?,
        _ => now_ns(),
    };

    Ok(ParsedPoint {
        measurement,
        tags,
        fields,
        timestamp_ns,
    })
}

fn parse_field_value(raw: &str) -> Result<FieldValue> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Ok(FieldValue::String(unescape(&raw[1..raw.len() - 1])));
    }
    if let Some(stripped) = raw.strip_suffix('i') {
        return stripped
            .parse::<i64>()
            .map(FieldValue::Int64)
            .map_err(|e| IngestError::InvalidData(format!("invalid integer field `{raw}`: {e}")));
    }
    if let Some(stripped) = raw.strip_suffix('u') {
        return stripped
            .parse::<u64>()
            .map(FieldValue::UInt64)
            .map_err(|e| IngestError::InvalidData(format!("invalid unsigned field `{raw}`: {e}")));
    }
    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Bool(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Bool(false)),
        _ => {}
    }
    raw.parse::<f64>()
        .map(FieldValue::Float64)
        .map_err(|e| IngestError::InvalidData(format!("invalid field value `{raw}`: {e}")))
}

/// Splits on `sep`, skipping separators inside a quoted `"..."` run or
/// escaped with a backslash.
fn split_unescaped(s: &str, sep: char) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                current.push('\\');
                current.push(next);
                continue;
            }
        }
        if c == '"' {
            in_quotes = !in_quotes;
            current.push(c);
            continue;
        }
        if c == sep && !in_quotes {
            tokens.push(std::mem::take(&mut current));
            continue;
        }
        current.push(c);
    }
    tokens.push(current);
    tokens
}

fn split_once_unescaped(s: &str, sep: char) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            chars.next();
            continue;
        }
        if c == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if c == sep && !in_quotes {
            return Some((&s[..i], &s[i + c.len_utf8()..]));
        }
    }
    None
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_point_with_explicit_timestamp() {
        let body = b"cpu,host=a value=1.5 1700000000000000000";
        let groups = parse_line_protocol(body).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].measurement, "cpu");
        assert_eq!(groups[0].batch["host"], ColumnData::String(vec!["a".to_string()]));
        assert_eq!(groups[0].batch["value"], ColumnData::Float64(vec![1.5]));
        assert_eq!(groups[0].batch["time"], ColumnData::Int64(vec![1_700_000_000_000_000_000]));
    }

    #[test]
    fn integer_and_string_field_suffixes() {
        let body = b"events count=3i,name=\"launch\" 1700000000000000000";
        let groups = parse_line_protocol(body).unwrap();
        assert_eq!(groups[0].batch["count"], ColumnData::Int64(vec![3]));
        assert_eq!(groups[0].batch["name"], ColumnData::String(vec!["launch".to_string()]));
    }

    #[test]
    fn boolean_field_becomes_int64_zero_or_one() {
        let body = b"switch,id=1 on=true 1700000000000000000\nswitch,id=1 on=false 1700000000000000001";
        let groups = parse_line_protocol(body).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].batch["on"], ColumnData::Int64(vec![1, 0]));
    }

    #[test]
    fn differing_schemas_split_into_separate_groups() {
        let body = b"cpu value=1.0 1700000000000000000\ncpu value=1.0,extra=2.0 1700000000000000001";
        let groups = parse_line_protocol(body).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn missing_timestamp_defaults_to_now() {
        let body = b"cpu value=1.0";
        let groups = parse_line_protocol(body).unwrap();
        assert!(groups[0].batch["time"].len() == 1);
    }

    #[test]
    fn rejects_line_with_no_fields() {
        let body = b"cpu,host=a 1700000000000000000";
        assert!(parse_line_protocol(body).is_err());
    }
}
