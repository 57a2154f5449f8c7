use std::collections::HashMap;

use chrono::{DateTime, Utc};
use gigapi_store::RawBatch;
use gigapi_types::{ColumnData, IngestError, Result};

use crate::table_descriptor::PartitionDesc;

/// Default `PartitionBy` for the implicit "simple" table: `date=YYYY-MM-DD`
/// (UTC) and `hour=HH` (UTC), derived from the `__timestamp` column. Walks
/// the timestamp column once, grouping rows by `ts / 86_400_000_000_000`
/// (day-id) and hour-of-day.
pub fn partition_by_date_hour(batch: &RawBatch) -> Result<Vec<PartitionDesc>> {
    let ts = match batch.get("__timestamp") {
        Some(ColumnData::Int64(values)) => values,
        Some(_) => {
            return Err(IngestError::InvalidData(
                "__timestamp column must be INT8 (nanoseconds)".to_string(),
            ))
        }
        None => {
            return Err(IngestError::InvalidData(
                "PartitionBy requires a __timestamp column".to_string(),
            ))
        }
    };

    let mut groups: HashMap<(String, String), Vec<usize>> = HashMap::new();
    for (row, &ns) in ts.iter().enumerate() {
        let (date, hour) = date_hour_utc(ns)?;
        groups.entry((date, hour)).or_default().push(row);
    }

    let mask_len = ts.len().div_ceil(8);
    let mut descs: Vec<PartitionDesc> = groups
        .into_iter()
        .map(|((date, hour), rows)| {
            let mut index_map = vec![0u8; mask_len];
            for row in rows {
                index_map[row / 8] |= 1 << (row % 8);
            }
            PartitionDesc {
                values: vec![("date".to_string(), date), ("hour".to_string(), hour)],
                index_map,
            }
        })
        .collect();
    descs.sort_by(|a, b| a.values.cmp(&b.values));
    Ok(descs)
}

fn date_hour_utc(timestamp_ns: i64) -> Result<(String, String)> {
    let dt: DateTime<Utc> = DateTime::from_timestamp(
        timestamp_ns.div_euclid(1_000_000_000),
        (timestamp_ns.rem_euclid(1_000_000_000)) as u32,
    )
    .ok_or_else(|| IngestError::InvalidData(format!("timestamp {timestamp_ns} out of range")))?;
    Ok((dt.format("%Y-%m-%d").to_string(), dt.format("%H").to_string()))
}

/// Partition identity hash: `xxh64` over the concatenated `"key=value"`
/// tuples, substituting for the source's CityHash-64 (see DESIGN.md).
pub fn partition_hash(values: &[(String, String)]) -> u64 {
    let mut buf = String::new();
    for (key, value) in values {
        buf.push_str(key);
        buf.push('=');
        buf.push_str(value);
        buf.push(';');
    }
    xxhash_rust::xxh64::xxh64(buf.as_bytes(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_rows_by_utc_date_and_hour() {
        let mut batch = RawBatch::new();
        // 2024-01-01T00:00:00Z and 2024-01-01T01:00:00Z, one row each.
        batch.insert(
            "__timestamp".to_string(),
            ColumnData::Int64(vec![1_704_067_200_000_000_000, 1_704_070_800_000_000_000]),
        );
        let descs = partition_by_date_hour(&batch).unwrap();
        assert_eq!(descs.len(), 2);
        let total_rows: u32 = descs.iter().map(|d| d.index_map.iter().map(|b| b.count_ones()).sum::<u32>()).sum();
        assert_eq!(total_rows, 2);
    }

    #[test]
    fn partition_hash_is_order_sensitive_and_deterministic() {
        let a = vec![("date".to_string(), "2024-01-01".to_string()), ("hour".to_string(), "00".to_string())];
        let b = a.clone();
        assert_eq!(partition_hash(&a), partition_hash(&b));
    }
}
