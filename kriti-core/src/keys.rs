//! Single-table key schema.
//!
//! Every record lives in one physical table. Logical entity kinds are told
//! apart by the prefix of their partition key: `ARTIST#<id>`,
//! `RAGA#<id>`, and so on. Secondary indexes reuse the same
//! `PREFIX#value` shape for their own partition and sort keys.
//!
//! # Separator
//!
//! The `#` separator is NOT escaped. A raw value containing `#` produces a
//! key that parses back differently (`extract_id_from_key` splits on the
//! first separator only). Domain layers must sanitize such values before
//! they reach this module; changing that here would alter the stored key
//! shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::item::{Item, ATTR_PK, ATTR_SK};

/// Separator between key segments.
pub const KEY_SEPARATOR: char = '#';

/// Default sort key for an entity's primary metadata record.
pub const METADATA_SORT_KEY: &str = "#METADATA";

/// Sort key of the latest-version pointer of a versioned entity.
pub const LATEST_SORT_KEY: &str = "VERSION#LATEST";

/// Leading segment of every version sort key.
pub const VERSION_SEGMENT: &str = "VERSION";

/// Prefix shared by all numbered version records (`VERSION#v1#...`).
pub const VERSION_PREFIX: &str = "VERSION#v";

/// Character appended to an inclusive upper bound so every key starting
/// with the bound sorts at or below it.
pub const HIGH_SENTINEL: char = '\u{ffff}';

// ============================================================================
// ENTITY PREFIX
// ============================================================================

/// Partition namespace for a logical entity kind.
///
/// Prefixes are never reused for unrelated kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityPrefix {
    Artist,
    Composition,
    Raga,
    Tala,
    User,
    Event,
    Venue,
    Recording,
    Playlist,
    Comment,
}

impl EntityPrefix {
    /// All known prefixes.
    pub const ALL: [EntityPrefix; 10] = [
        EntityPrefix::Artist,
        EntityPrefix::Composition,
        EntityPrefix::Raga,
        EntityPrefix::Tala,
        EntityPrefix::User,
        EntityPrefix::Event,
        EntityPrefix::Venue,
        EntityPrefix::Recording,
        EntityPrefix::Playlist,
        EntityPrefix::Comment,
    ];

    /// The tag written into keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityPrefix::Artist => "ARTIST",
            EntityPrefix::Composition => "COMPOSITION",
            EntityPrefix::Raga => "RAGA",
            EntityPrefix::Tala => "TALA",
            EntityPrefix::User => "USER",
            EntityPrefix::Event => "EVENT",
            EntityPrefix::Venue => "VENUE",
            EntityPrefix::Recording => "RECORDING",
            EntityPrefix::Playlist => "PLAYLIST",
            EntityPrefix::Comment => "COMMENT",
        }
    }

    /// Partition key for an entity of this kind.
    pub fn key(&self, id: &str) -> String {
        format_key(*self, id)
    }
}

impl fmt::Display for EntityPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        EntityPrefix::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| format!("Invalid EntityPrefix: {}", s))
    }
}

// ============================================================================
// KEY FORMATTING
// ============================================================================

/// `PREFIX#id`
pub fn format_key(prefix: EntityPrefix, id: &str) -> String {
    format!("{}{}{}", prefix.as_str(), KEY_SEPARATOR, id)
}

/// `PREFIX#value` for secondary-index keys; the prefix is any tag
/// (`TRADITION`, `STATUS`, `DATE`, an entity prefix, ...).
pub fn format_index_key(prefix: impl fmt::Display, value: impl fmt::Display) -> String {
    format!("{}{}{}", prefix, KEY_SEPARATOR, value)
}

/// `VERSION#<version>` or `VERSION#<version>#<timestamp>`.
pub fn format_version_key(version: &str, timestamp: Option<&str>) -> String {
    match timestamp {
        Some(ts) => format!("{VERSION_SEGMENT}{KEY_SEPARATOR}{version}{KEY_SEPARATOR}{ts}"),
        None => format!("{VERSION_SEGMENT}{KEY_SEPARATOR}{version}"),
    }
}

/// Everything after the first separator, or `None` when there is none.
pub fn extract_id_from_key(key: &str) -> Option<&str> {
    key.split_once(KEY_SEPARATOR).map(|(_, rest)| rest)
}

/// Leading segment of a key (`ARTIST` for `ARTIST#a1`).
pub fn extract_prefix_from_key(key: &str) -> &str {
    key.split_once(KEY_SEPARATOR)
        .map(|(prefix, _)| prefix)
        .unwrap_or(key)
}

/// Joins parts into one id segment (`a#b#c`).
pub fn composite_id<S: AsRef<str>>(parts: &[S]) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(KEY_SEPARATOR);
        }
        out.push_str(part.as_ref());
    }
    out
}

/// Inverse of [`composite_id`].
pub fn split_composite_id(id: &str) -> Vec<&str> {
    id.split(KEY_SEPARATOR).collect()
}

// ============================================================================
// VERSION LABELS
// ============================================================================

/// `v<n>`
pub fn version_label(number: u64) -> String {
    format!("v{}", number)
}

/// Numeric suffix of a `v<n>` label.
pub fn parse_version_number(label: &str) -> Option<u64> {
    label.strip_prefix('v')?.parse().ok()
}

/// Sort-key prefix selecting exactly one version's records.
///
/// The trailing separator keeps `v1` from matching `v10`.
pub fn version_sort_prefix(version: &str) -> String {
    format!("{VERSION_SEGMENT}{KEY_SEPARATOR}{version}{KEY_SEPARATOR}")
}

// ============================================================================
// ITEM KEY
// ============================================================================

/// Primary key of one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub pk: String,
    pub sk: String,
}

impl ItemKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    /// Key of an entity record under its partition.
    pub fn entity(prefix: EntityPrefix, id: &str, sk: impl Into<String>) -> Self {
        Self::new(format_key(prefix, id), sk)
    }

    /// The key as a `{PK, SK}` attribute map.
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(ATTR_PK.to_string(), Value::String(self.pk.clone()));
        item.insert(ATTR_SK.to_string(), Value::String(self.sk.clone()));
        item
    }

    /// Reads `PK`/`SK` from a record. Non-string keys are rejected.
    pub fn from_item(item: &Item) -> Option<Self> {
        let pk = item.get(ATTR_PK)?.as_str()?;
        let sk = item.get(ATTR_SK)?.as_str()?;
        Some(Self::new(pk, sk))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

// ============================================================================
// SECONDARY INDEXES
// ============================================================================

/// Secondary indexes of the single table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecondaryIndex {
    Gsi1,
    Gsi2,
    Gsi3,
    Gsi4,
    Gsi5,
    Gsi6,
    Lsi1,
}

impl SecondaryIndex {
    pub const ALL: [SecondaryIndex; 7] = [
        SecondaryIndex::Gsi1,
        SecondaryIndex::Gsi2,
        SecondaryIndex::Gsi3,
        SecondaryIndex::Gsi4,
        SecondaryIndex::Gsi5,
        SecondaryIndex::Gsi6,
        SecondaryIndex::Lsi1,
    ];

    /// Index name as registered with the store.
    pub fn name(&self) -> &'static str {
        match self {
            SecondaryIndex::Gsi1 => "GSI1",
            SecondaryIndex::Gsi2 => "GSI2",
            SecondaryIndex::Gsi3 => "GSI3",
            SecondaryIndex::Gsi4 => "GSI4",
            SecondaryIndex::Gsi5 => "GSI5",
            SecondaryIndex::Gsi6 => "GSI6",
            SecondaryIndex::Lsi1 => "LSI1",
        }
    }

    /// Partition key attribute. Local indexes share the table's `PK`.
    pub fn partition_key(&self) -> &'static str {
        match self {
            SecondaryIndex::Gsi1 => "GSI1PK",
            SecondaryIndex::Gsi2 => "GSI2PK",
            SecondaryIndex::Gsi3 => "GSI3PK",
            SecondaryIndex::Gsi4 => "GSI4PK",
            SecondaryIndex::Gsi5 => "GSI5PK",
            SecondaryIndex::Gsi6 => "GSI6PK",
            SecondaryIndex::Lsi1 => ATTR_PK,
        }
    }

    /// Sort key attribute.
    pub fn sort_key(&self) -> &'static str {
        match self {
            SecondaryIndex::Gsi1 => "GSI1SK",
            SecondaryIndex::Gsi2 => "GSI2SK",
            SecondaryIndex::Gsi3 => "GSI3SK",
            SecondaryIndex::Gsi4 => "GSI4SK",
            SecondaryIndex::Gsi5 => "GSI5SK",
            SecondaryIndex::Gsi6 => "GSI6SK",
            SecondaryIndex::Lsi1 => "LSI1SK",
        }
    }

    /// Look up an index by its registered name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        SecondaryIndex::ALL
            .into_iter()
            .find(|idx| idx.name().eq_ignore_ascii_case(name))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, SecondaryIndex::Lsi1)
    }

    /// Whether an attribute name is owned by some secondary index.
    pub fn is_index_attribute(name: &str) -> bool {
        SecondaryIndex::ALL
            .iter()
            .any(|idx| (!idx.is_local() && idx.partition_key() == name) || idx.sort_key() == name)
    }
}

impl fmt::Display for SecondaryIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_key() {
        assert_eq!(format_key(EntityPrefix::Artist, "a1"), "ARTIST#a1");
        assert_eq!(EntityPrefix::Raga.key("kalyani"), "RAGA#kalyani");
    }

    #[test]
    fn test_format_index_key() {
        assert_eq!(format_index_key("TRADITION", "carnatic"), "TRADITION#carnatic");
        assert_eq!(format_index_key(EntityPrefix::Tala, 8), "TALA#8");
    }

    #[test]
    fn test_format_version_key() {
        assert_eq!(format_version_key("v1", None), "VERSION#v1");
        assert_eq!(
            format_version_key("v3", Some("2024-01-01T00:00:00.000Z")),
            "VERSION#v3#2024-01-01T00:00:00.000Z"
        );
        assert!(format_version_key("v3", Some("t")).starts_with(VERSION_PREFIX));
    }

    #[test]
    fn test_extract_id_splits_on_first_separator_only() {
        assert_eq!(extract_id_from_key("ARTIST#a1"), Some("a1"));
        assert_eq!(extract_id_from_key("ARTIST#a#b"), Some("a#b"));
        assert_eq!(extract_id_from_key("ARTIST#"), Some(""));
        assert_eq!(extract_id_from_key("no-separator"), None);
        assert_eq!(extract_prefix_from_key("ARTIST#a1"), "ARTIST");
    }

    #[test]
    fn test_composite_id() {
        let id = composite_id(&["kalyani", "adi", "2024"]);
        assert_eq!(id, "kalyani#adi#2024");
        assert_eq!(split_composite_id(&id), vec!["kalyani", "adi", "2024"]);
    }

    #[test]
    fn test_version_labels() {
        assert_eq!(version_label(7), "v7");
        assert_eq!(parse_version_number("v12"), Some(12));
        assert_eq!(parse_version_number("12"), None);
        assert_eq!(parse_version_number("vx"), None);
        assert_eq!(version_sort_prefix("v1"), "VERSION#v1#");
        assert!(!"VERSION#v10#t".starts_with(&version_sort_prefix("v1")));
    }

    #[test]
    fn test_entity_prefix_parse() {
        assert_eq!("artist".parse::<EntityPrefix>(), Ok(EntityPrefix::Artist));
        assert_eq!("RAGA".parse::<EntityPrefix>(), Ok(EntityPrefix::Raga));
        assert!("instrument".parse::<EntityPrefix>().is_err());
        for prefix in EntityPrefix::ALL {
            assert_eq!(prefix.to_string().parse::<EntityPrefix>(), Ok(prefix));
        }
    }

    #[test]
    fn test_item_key_roundtrip() {
        let key = ItemKey::entity(EntityPrefix::Tala, "adi", METADATA_SORT_KEY);
        let item = key.to_item();
        assert_eq!(item.len(), 2);
        assert_eq!(ItemKey::from_item(&item), Some(key));
    }

    #[test]
    fn test_secondary_index_attributes() {
        assert_eq!(SecondaryIndex::Gsi3.partition_key(), "GSI3PK");
        assert_eq!(SecondaryIndex::Lsi1.partition_key(), "PK");
        assert_eq!(SecondaryIndex::Lsi1.sort_key(), "LSI1SK");
        assert!(SecondaryIndex::is_index_attribute("GSI6SK"));
        assert!(SecondaryIndex::is_index_attribute("LSI1SK"));
        assert!(!SecondaryIndex::is_index_attribute("PK"));
        assert!(!SecondaryIndex::is_index_attribute("name"));
        assert_eq!(SecondaryIndex::from_name("gsi2"), Some(SecondaryIndex::Gsi2));
        assert_eq!(SecondaryIndex::from_name("GSI7"), None);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
