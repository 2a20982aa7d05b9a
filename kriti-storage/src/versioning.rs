//! Multi-version entities with a latest pointer
//!
//! Each edit of an entity is stored as its own version record,
//! `PK=PREFIX#id, SK=VERSION#vN#timestamp`, and one pointer item,
//! `SK=VERSION#LATEST`, names the newest version. Two write protocols are
//! supported:
//!
//! - [`VersioningMode::DenormalizedPointer`]: the pointer carries the full
//!   newest snapshot, so a read is one item. Two writes per create or
//!   update. Older version records keep `isLatest = true` forever; only the
//!   pointer (or an explicit version read) is authoritative.
//! - [`VersioningMode::DemoteOnWrite`]: the pointer carries only
//!   `{version, timestamp}` and reads fetch the record it names. An update
//!   writes three items: the new record, the pointer, and the previous
//!   record demoted to `isLatest = false`.
//!
//! Every create or update is one transaction, so the pointer never names a
//! version that was not written.
//!
//! Secondary-index attributes are written to the authoritative latest item
//! only (the pointer, or the current record when demoting), so index
//! listings return one item per entity.
//!
//! # Concurrent updates
//!
//! With [`WriteGuard::Unconditional`] an update reads the current version
//! and writes the next one with no compare-and-swap. Two concurrent
//! updates can both produce `v(N+1)`; the last pointer write wins and the
//! other editor's change is lost from the latest view. This matches the
//! long-standing behavior of the platform. [`WriteGuard::Conditional`]
//! makes the pointer write conditional on the version that was read and
//! reports a [`VersionError::Conflict`] instead.

use kriti_core::item::{
    ATTR_EDITED_BY, ATTR_ENTITY_TYPE, ATTR_ID, ATTR_IS_LATEST, ATTR_PK, ATTR_SK, ATTR_TIMESTAMP,
    ATTR_VERSION, ATTR_VIEW_COUNT,
};
use kriti_core::keys::{
    format_key, format_version_key, parse_version_number, version_label, version_sort_prefix,
    LATEST_SORT_KEY, VERSION_PREFIX,
};
use kriti_core::{
    format_timestamp, new_entity_id, Clock, EntityPrefix, Item, ItemKey, KritiError, KritiResult,
    SecondaryIndex, StorageError, SystemClock, VersionError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::access::TableClient;
use crate::query::QueryBuilder;
use crate::store::{Condition, TableStore, TransactWriteOp};

/// Attributes the engine owns; caller input never overrides them.
const RESERVED_ATTRIBUTES: [&str; 9] = [
    ATTR_PK,
    ATTR_SK,
    ATTR_ID,
    ATTR_VERSION,
    ATTR_TIMESTAMP,
    ATTR_EDITED_BY,
    ATTR_IS_LATEST,
    ATTR_VIEW_COUNT,
    ATTR_ENTITY_TYPE,
];

/// Write protocol for the latest pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VersioningMode {
    /// Pointer embeds the full snapshot; 2 writes per update
    #[default]
    DenormalizedPointer,
    /// Pointer references the record; previous record demoted; 3 writes
    DemoteOnWrite,
}

/// Whether updates compare-and-swap the pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteGuard {
    #[default]
    Unconditional,
    /// Fail with a conflict if the pointer moved since it was read
    Conditional,
}

/// One entry of an entity's edit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub id: String,
    pub version: String,
    pub timestamp: String,
    /// Last editor of that version
    pub editor_id: Option<String>,
}

/// Versioned entity store for one entity prefix.
pub struct VersioningEngine<S: ?Sized> {
    client: TableClient<S>,
    prefix: EntityPrefix,
    mode: VersioningMode,
    guard: WriteGuard,
    clock: Arc<dyn Clock>,
}

impl<S: TableStore + ?Sized> VersioningEngine<S> {
    pub fn new(client: TableClient<S>, prefix: EntityPrefix) -> Self {
        Self {
            client,
            prefix,
            mode: VersioningMode::default(),
            guard: WriteGuard::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_mode(mut self, mode: VersioningMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_write_guard(mut self, guard: WriteGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn prefix(&self) -> EntityPrefix {
        self.prefix
    }

    pub fn mode(&self) -> VersioningMode {
        self.mode
    }

    fn partition(&self, id: &str) -> String {
        format_key(self.prefix, id)
    }

    // ------------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------------

    /// Create an entity with a fresh id. Returns the `v1` snapshot.
    pub async fn create(&self, data: Item, editor_id: &str) -> KritiResult<Item> {
        let id = new_entity_id().to_string();
        self.create_with_id(&id, data, editor_id).await
    }

    /// Create an entity under a caller-chosen id. Fails if the entity
    /// already exists.
    pub async fn create_with_id(&self, id: &str, data: Item, editor_id: &str) -> KritiResult<Item> {
        let timestamp = format_timestamp(self.clock.now());
        let version = version_label(1);

        let mut snapshot = strip_reserved(data);
        snapshot.insert(ATTR_ID.to_string(), Value::String(id.to_string()));
        snapshot.insert(
            ATTR_ENTITY_TYPE.to_string(),
            Value::String(self.prefix.as_str().to_string()),
        );
        snapshot.insert(ATTR_VERSION.to_string(), Value::String(version.clone()));
        snapshot.insert(ATTR_TIMESTAMP.to_string(), Value::String(timestamp.clone()));
        snapshot.insert(
            ATTR_EDITED_BY.to_string(),
            Value::Array(vec![Value::String(editor_id.to_string())]),
        );
        snapshot.insert(ATTR_VIEW_COUNT.to_string(), Value::from(0));
        snapshot.insert(ATTR_IS_LATEST.to_string(), Value::Bool(true));

        let pk = self.partition(id);
        let record_sk = format_version_key(&version, Some(&timestamp));
        let ops = match self.mode {
            VersioningMode::DenormalizedPointer => vec![
                TransactWriteOp::put(with_keys(&without_index_attributes(&snapshot), &pk, &record_sk)),
                TransactWriteOp::put_if(
                    with_keys(&snapshot, &pk, LATEST_SORT_KEY),
                    Condition::item_not_exists(),
                ),
            ],
            VersioningMode::DemoteOnWrite => vec![
                TransactWriteOp::put(with_keys(&snapshot, &pk, &record_sk)),
                TransactWriteOp::put_if(
                    self.reference_pointer(id, &version, &timestamp),
                    Condition::item_not_exists(),
                ),
            ],
        };

        self.client.transact_write(ops).await?;
        tracing::info!(
            entity = %self.prefix,
            id = %id,
            version = %version,
            editor = %editor_id,
            "Versioned entity created"
        );
        Ok(snapshot)
    }

    // ------------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------------

    /// Write the next version: `changes` merged over the current snapshot,
    /// `editor_id` added to `editedBy` once. Returns the new snapshot.
    pub async fn update(&self, id: &str, changes: Item, editor_id: &str) -> KritiResult<Item> {
        let current = self.current_record(id).await?.ok_or_else(|| {
            KritiError::from(VersionError::EntityNotFound {
                prefix: self.prefix,
                id: id.to_string(),
            })
        })?;

        let current_version = current
            .get(ATTR_VERSION)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let number = parse_version_number(&current_version).ok_or_else(|| {
            KritiError::from(VersionError::InvalidVersion {
                value: current_version.clone(),
            })
        })?;
        let version = version_label(number + 1);
        let timestamp = format_timestamp(self.clock.now());

        let mut snapshot = current.clone();
        snapshot.remove(ATTR_PK);
        snapshot.remove(ATTR_SK);
        for (name, value) in strip_reserved(changes) {
            snapshot.insert(name, value);
        }
        snapshot.insert(ATTR_VERSION.to_string(), Value::String(version.clone()));
        snapshot.insert(ATTR_TIMESTAMP.to_string(), Value::String(timestamp.clone()));
        snapshot.insert(ATTR_IS_LATEST.to_string(), Value::Bool(true));
        snapshot.insert(
            ATTR_EDITED_BY.to_string(),
            Value::Array(merge_editors(current.get(ATTR_EDITED_BY), editor_id)),
        );

        let pk = self.partition(id);
        let record_sk = format_version_key(&version, Some(&timestamp));
        let pointer_condition = match self.guard {
            WriteGuard::Unconditional => None,
            WriteGuard::Conditional => Some(Condition::AttributeEquals(
                ATTR_VERSION.to_string(),
                Value::String(current_version.clone()),
            )),
        };

        let ops = match self.mode {
            VersioningMode::DenormalizedPointer => vec![
                TransactWriteOp::put(with_keys(&without_index_attributes(&snapshot), &pk, &record_sk)),
                TransactWriteOp::Put {
                    item: with_keys(&snapshot, &pk, LATEST_SORT_KEY),
                    condition: pointer_condition,
                },
            ],
            VersioningMode::DemoteOnWrite => {
                let mut demoted = without_index_attributes(&current);
                demoted.insert(ATTR_IS_LATEST.to_string(), Value::Bool(false));
                vec![
                    TransactWriteOp::put(with_keys(&snapshot, &pk, &record_sk)),
                    TransactWriteOp::Put {
                        item: self.reference_pointer(id, &version, &timestamp),
                        condition: pointer_condition,
                    },
                    TransactWriteOp::put(demoted),
                ]
            }
        };

        match self.client.transact_write(ops).await {
            Ok(()) => {}
            Err(KritiError::Storage(StorageError::ConditionFailed { .. }))
                if self.guard == WriteGuard::Conditional =>
            {
                let actual = self
                    .read_pointer(id)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|p| p.get(ATTR_VERSION).and_then(Value::as_str).map(str::to_string));
                tracing::warn!(
                    entity = %self.prefix,
                    id = %id,
                    expected = %current_version,
                    actual = ?actual,
                    "Version conflict"
                );
                return Err(VersionError::Conflict {
                    id: id.to_string(),
                    expected: current_version,
                    actual,
                }
                .into());
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            entity = %self.prefix,
            id = %id,
            version = %version,
            editor = %editor_id,
            "Versioned entity updated"
        );
        Ok(snapshot)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Latest snapshot, or one specific version when `version` is given.
    /// Storage keys and index attributes are not part of the snapshot.
    pub async fn get_by_id(&self, id: &str, version: Option<&str>) -> KritiResult<Option<Item>> {
        let record = match version {
            None => self.current_record(id).await?,
            Some(label) => self.version_record(id, label).await?,
        };
        Ok(record.map(|r| entity_view(&r)))
    }

    /// Every version of an entity, oldest first.
    pub async fn version_history(&self, id: &str) -> KritiResult<Vec<VersionSummary>> {
        let records = QueryBuilder::new()
            .with_partition_key(ATTR_PK, self.partition(id))
            .with_sort_key_begins_with(ATTR_SK, VERSION_PREFIX)
            .with_projection([ATTR_ID, ATTR_VERSION, ATTR_TIMESTAMP, ATTR_EDITED_BY])
            .execute_all(&**self.client.store())
            .await?;

        let mut history: Vec<(u64, VersionSummary)> = records
            .iter()
            .filter_map(|record| {
                let version = record.get(ATTR_VERSION)?.as_str()?.to_string();
                let number = parse_version_number(&version)?;
                let summary = VersionSummary {
                    id: record
                        .get(ATTR_ID)
                        .and_then(Value::as_str)
                        .unwrap_or(id)
                        .to_string(),
                    timestamp: record
                        .get(ATTR_TIMESTAMP)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    editor_id: record
                        .get(ATTR_EDITED_BY)
                        .and_then(Value::as_array)
                        .and_then(|editors| editors.last())
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    version,
                };
                Some((number, summary))
            })
            .collect();
        // Sort keys order v10 before v2.
        history.sort_by_key(|(number, _)| *number);
        Ok(history.into_iter().map(|(_, s)| s).collect())
    }

    /// Remove every item of the entity. Returns how many were deleted.
    pub async fn delete(&self, id: &str) -> KritiResult<usize> {
        let pk = self.partition(id);
        let keys: Vec<ItemKey> = QueryBuilder::new()
            .with_partition_key(ATTR_PK, pk.clone())
            .with_projection([ATTR_PK, ATTR_SK])
            .execute_all(&**self.client.store())
            .await
            .map_err(|e| KritiError::delete(pk.clone(), e))?
            .iter()
            .filter_map(ItemKey::from_item)
            .collect();

        let count = keys.len();
        if count > 0 {
            self.client.delete_many(keys).await?;
        }
        tracing::info!(entity = %self.prefix, id = %id, items = count, "Versioned entity deleted");
        Ok(count)
    }

    async fn read_pointer(&self, id: &str) -> KritiResult<Option<Item>> {
        self.client
            .get_item(&ItemKey::new(self.partition(id), LATEST_SORT_KEY))
            .await
    }

    /// The stored item holding the newest snapshot.
    async fn current_record(&self, id: &str) -> KritiResult<Option<Item>> {
        let Some(pointer) = self.read_pointer(id).await? else {
            return Ok(None);
        };
        match self.mode {
            VersioningMode::DenormalizedPointer => Ok(Some(pointer)),
            VersioningMode::DemoteOnWrite => {
                let version = pointer.get(ATTR_VERSION).and_then(Value::as_str);
                let timestamp = pointer.get(ATTR_TIMESTAMP).and_then(Value::as_str);
                let (Some(version), Some(timestamp)) = (version, timestamp) else {
                    return Err(KritiError::query(
                        "get_by_id",
                        format!("latest pointer of {} is missing version or timestamp", id),
                    ));
                };
                let key = ItemKey::new(self.partition(id), format_version_key(version, Some(timestamp)));
                match self.client.get_item(&key).await? {
                    Some(record) => Ok(Some(record)),
                    None => Err(KritiError::query(
                        "get_by_id",
                        format!("latest pointer names missing record {}", key),
                    )),
                }
            }
        }
    }

    async fn version_record(&self, id: &str, label: &str) -> KritiResult<Option<Item>> {
        if parse_version_number(label).is_none() {
            return Err(VersionError::InvalidVersion {
                value: label.to_string(),
            }
            .into());
        }
        let out = QueryBuilder::new()
            .with_partition_key(ATTR_PK, self.partition(id))
            .with_sort_key_begins_with(ATTR_SK, version_sort_prefix(label))
            .execute(&**self.client.store())
            .await?;
        Ok(out.items.into_iter().next())
    }

    fn reference_pointer(&self, id: &str, version: &str, timestamp: &str) -> Item {
        let mut pointer = Item::new();
        pointer.insert(ATTR_PK.to_string(), Value::String(self.partition(id)));
        pointer.insert(ATTR_SK.to_string(), Value::String(LATEST_SORT_KEY.to_string()));
        pointer.insert(ATTR_ID.to_string(), Value::String(id.to_string()));
        pointer.insert(ATTR_VERSION.to_string(), Value::String(version.to_string()));
        pointer.insert(ATTR_TIMESTAMP.to_string(), Value::String(timestamp.to_string()));
        pointer
    }
}

fn strip_reserved(mut data: Item) -> Item {
    for name in RESERVED_ATTRIBUTES {
        data.remove(name);
    }
    data
}

fn without_index_attributes(item: &Item) -> Item {
    item.iter()
        .filter(|(name, _)| !SecondaryIndex::is_index_attribute(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn with_keys(snapshot: &Item, pk: &str, sk: &str) -> Item {
    let mut item = snapshot.clone();
    item.insert(ATTR_PK.to_string(), Value::String(pk.to_string()));
    item.insert(ATTR_SK.to_string(), Value::String(sk.to_string()));
    item
}

/// Snapshot as returned to callers.
fn entity_view(record: &Item) -> Item {
    let mut view = without_index_attributes(record);
    view.remove(ATTR_PK);
    view.remove(ATTR_SK);
    view
}

fn merge_editors(existing: Option<&Value>, editor_id: &str) -> Vec<Value> {
    let mut editors: Vec<Value> = existing
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let present = editors.iter().any(|e| e.as_str() == Some(editor_id));
    if !present {
        editors.push(Value::String(editor_id.to_string()));
    }
    editors
}

// =============================================================================
// TESTS
// =============================================================================
