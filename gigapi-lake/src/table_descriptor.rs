/// Which `TableService` shape a table uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub enum Engine {
    /// One implicit partition at the table root.
    Merge,
    /// A `partition_hash → Partition` map, keyed by `PartitionBy`.
    HiveMerge,
}

/// Produced by `PartitionBy` for one batch: the partition's `(key, value)`
/// tuple plus a bitmask selecting the batch rows that belong to it. The
/// union of all `IndexMap`s over a batch covers every row exactly once.
#[derive(Debug, Clone)]
pub struct PartitionDesc {
    pub values: Vec<(String, String)>,
    pub index_map: Vec<u8>,
}

/// Immutable per-table configuration. Derives `Deserialize` so a
/// `/gigapi/create` YAML body can be parsed straight into it, the way
/// `telemetry-ingestion-srv` deserializes `StreamInfo` directly off the wire.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TableDescriptor {
    pub db: String,
    pub name: String,
    /// `<root>/<db>/<name>`.
    pub root: String,
    pub engine: Engine,
    /// First element is the sort key used at merge time.
    #[serde(default = "default_order_by")]
    pub order_by: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_timestamp: bool,
}

fn default_order_by() -> Vec<String> {
    vec!["__timestamp".to_string()]
}

fn default_true() -> bool {
    true
}

impl TableDescriptor {
    pub fn simple(db: impl Into<String>, name: impl Into<String>, root_prefix: &str) -> TableDescriptor {
        let db = db.into();
        let name = name.into();
        let root = format!("{}/{}/{}", root_prefix.trim_end_matches('/'), db, name);
        TableDescriptor {
            db,
            name,
            root,
            engine: Engine::HiveMerge,
            order_by: vec!["__timestamp".to_string()],
            auto_timestamp: true,
        }
    }

    pub fn validate_name(name: &str) -> gigapi_types::Result<()> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(gigapi_types::IngestError::Fatal(format!(
                "table name `{name}` must match ^[A-Za-z0-9_]+$"
            )))
        }
    }

    pub fn sort_key(&self) -> &str {
        self.order_by.first().map(String::as_str).unwrap_or("__timestamp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_accepts_alphanumeric_and_underscore() {
        assert!(TableDescriptor::validate_name("events_v2").is_ok());
    }

    #[test]
    fn validate_name_rejects_empty_and_punctuation() {
        assert!(TableDescriptor::validate_name("").is_err());
        assert!(TableDescriptor::validate_name("events-v2").is_err());
        assert!(TableDescriptor::validate_name("events.v2").is_err());
    }

    #[test]
    fn simple_descriptor_defaults_to_hive_merge_with_auto_timestamp() {
        let d = TableDescriptor::simple("mydb", "events", "/data");
        assert_eq!(d.engine, Engine::HiveMerge);
        assert!(d.auto_timestamp);
        assert_eq!(d.sort_key(), "__timestamp");
        assert_eq!(d.root, "/data/mydb/events");
    }
}
