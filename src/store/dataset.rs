//! Dataset shapes and the canonical decode boundary.
//!
//! Every dataset decodes from raw JSON through exactly one lenient path:
//! records that fail to decode are counted and dropped, never a crash and
//! never a scattered per-call-site concern.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Outcome of leniently decoding a dataset: the usable data plus how many
/// records had to be dropped.
#[derive(Debug)]
pub struct Decoded<D> {
    pub data: D,
    pub skipped: usize,
}

/// A logical dataset the [`crate::store::FileStore`] can persist.
pub trait Dataset: Default + Serialize + Send + Sync + Sized {
    /// Dataset name, used in file names, log fields, and mirror keys.
    const NAME: &'static str;

    /// Decode from raw JSON, dropping records that fail to decode.
    fn decode(value: serde_json::Value) -> Decoded<Self>;

    /// Verify every record carries its mandatory identity fields.
    fn validate(&self) -> Result<(), StoreError>;

    /// Number of records held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A record stored under an owner id.
pub trait Record: Serialize + DeserializeOwned {
    fn id(&self) -> &str;
    fn owner(&self) -> &str;
}

/// Owner id → record id → record. The on-disk shape of both the reminder
/// and the task datasets.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct OwnerMap<T>(BTreeMap<String, BTreeMap<String, T>>);

impl<T> Default for OwnerMap<T> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<T: Record> OwnerMap<T> {
    /// Look up one record.
    pub fn get(&self, owner_id: &str, id: &str) -> Option<&T> {
        self.0.get(owner_id)?.get(id)
    }

    /// Look up one record mutably.
    pub fn get_mut(&mut self, owner_id: &str, id: &str) -> Option<&mut T> {
        self.0.get_mut(owner_id)?.get_mut(id)
    }

    /// Insert a record under its own owner and id.
    pub fn insert(&mut self, record: T) {
        self.0
            .entry(record.owner().to_string())
            .or_default()
            .insert(record.id().to_string(), record);
    }

    /// Remove one record, dropping the owner entry when it empties.
    pub fn remove(&mut self, owner_id: &str, id: &str) -> Option<T> {
        let records = self.0.get_mut(owner_id)?;
        let removed = records.remove(id);
        if records.is_empty() {
            self.0.remove(owner_id);
        }
        removed
    }

    /// Remove all of an owner's records, returning how many were removed.
    pub fn remove_owner(&mut self, owner_id: &str) -> usize {
        self.0.remove(owner_id).map(|r| r.len()).unwrap_or(0)
    }

    /// Number of records held by one owner.
    pub fn count(&self, owner_id: &str) -> usize {
        self.0.get(owner_id).map(|r| r.len()).unwrap_or(0)
    }

    /// Whether an owner has any records.
    pub fn has_owner(&self, owner_id: &str) -> bool {
        self.0.contains_key(owner_id)
    }

    /// Iterate one owner's records.
    pub fn owner(&self, owner_id: &str) -> impl Iterator<Item = &T> {
        self.0.get(owner_id).into_iter().flat_map(|r| r.values())
    }

    /// Iterate all `(owner_id, records)` groups.
    pub fn iter_owners(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, T>)> {
        self.0.iter()
    }

    /// Total record count across all owners.
    pub fn total(&self) -> usize {
        self.0.values().map(|r| r.len()).sum()
    }
}

/// Lenient decode shared by every `OwnerMap` dataset.
pub fn decode_owner_map<T: Record>(value: serde_json::Value) -> Decoded<OwnerMap<T>> {
    let mut map = OwnerMap::default();
    let mut skipped = 0usize;

    let serde_json::Value::Object(owners) = value else {
        tracing::warn!("Dataset root is not an object, treating as empty");
        return Decoded { data: map, skipped };
    };

    for (owner_id, records) in owners {
        let serde_json::Value::Object(records) = records else {
            tracing::warn!(owner = %owner_id, "Owner entry is not an object, dropping");
            skipped += 1;
            continue;
        };
        for (id, raw) in records {
            match serde_json::from_value::<T>(raw) {
                Ok(record) => map.insert(record),
                Err(e) => {
                    tracing::warn!(owner = %owner_id, id = %id, "Dropping undecodable record: {}", e);
                    skipped += 1;
                }
            }
        }
    }

    Decoded { data: map, skipped }
}

/// Identity-field validation shared by every `OwnerMap` dataset.
pub fn validate_owner_map<T: Record>(map: &OwnerMap<T>) -> Result<(), StoreError> {
    for (owner_id, records) in map.iter_owners() {
        for (key, record) in records {
            if record.id().trim().is_empty() || record.owner().trim().is_empty() {
                return Err(StoreError::InvalidRecord {
                    id: key.clone(),
                    reason: "empty id or owner".to_string(),
                });
            }
            if record.id() != key || record.owner() != owner_id {
                return Err(StoreError::InvalidRecord {
                    id: key.clone(),
                    reason: "record identity does not match its map key".to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Item {
        id: String,
        owner_id: String,
        payload: u32,
    }

    impl Record for Item {
        fn id(&self) -> &str {
            &self.id
        }
        fn owner(&self) -> &str {
            &self.owner_id
        }
    }

    fn item(owner: &str, id: &str) -> Item {
        Item {
            id: id.to_string(),
            owner_id: owner.to_string(),
            payload: 7,
        }
    }

    #[test]
    fn insert_get_remove() {
        let mut map = OwnerMap::default();
        map.insert(item("u1", "a"));
        map.insert(item("u1", "b"));
        map.insert(item("u2", "c"));

        assert_eq!(map.count("u1"), 2);
        assert_eq!(map.total(), 3);
        assert!(map.get("u1", "a").is_some());
        assert!(map.get("u2", "a").is_none());

        assert!(map.remove("u1", "a").is_some());
        assert_eq!(map.count("u1"), 1);
    }

    #[test]
    fn remove_last_record_drops_owner_entry() {
        let mut map = OwnerMap::default();
        map.insert(item("u1", "a"));
        map.remove("u1", "a");
        assert!(!map.has_owner("u1"));
    }

    #[test]
    fn remove_owner_returns_count() {
        let mut map = OwnerMap::default();
        map.insert(item("u1", "a"));
        map.insert(item("u1", "b"));
        assert_eq!(map.remove_owner("u1"), 2);
        assert_eq!(map.remove_owner("u1"), 0);
    }

    #[test]
    fn decode_drops_bad_records_keeps_good() {
        let value = serde_json::json!({
            "u1": {
                "a": {"id": "a", "owner_id": "u1", "payload": 1},
                "bad": {"id": "bad"},
            },
            "u2": "not an object",
        });
        let decoded = decode_owner_map::<Item>(value);
        assert_eq!(decoded.data.total(), 1);
        assert_eq!(decoded.skipped, 2);
    }

    #[test]
    fn decode_non_object_root_is_empty() {
        let decoded = decode_owner_map::<Item>(serde_json::json!([1, 2, 3]));
        assert_eq!(decoded.data.total(), 0);
    }

    #[test]
    fn validate_rejects_mismatched_key() {
        let mut map: OwnerMap<Item> = OwnerMap::default();
        map.insert(item("u1", "a"));
        assert!(validate_owner_map(&map).is_ok());

        // Force a mismatch through the raw map.
        let mut bad = OwnerMap::default();
        bad.insert(Item {
            id: String::new(),
            owner_id: "u1".to_string(),
            payload: 0,
        });
        assert!(validate_owner_map(&bad).is_err());
    }

    #[test]
    fn serialize_shape_is_owner_then_id() {
        let mut map = OwnerMap::default();
        map.insert(item("u1", "a"));
        let value = serde_json::to_value(&map).unwrap();
        assert!(value.get("u1").and_then(|o| o.get("a")).is_some());
    }
}
