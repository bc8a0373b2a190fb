//! The identity record entity.
//!
//! An [`IdentityRecord`] is the canonical representation of one
//! deduplicated participant: every alias it is known by, its membership
//! intervals, and its message/action histories, all keyed by timestamp.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique, immutable identifier for an identity record.
///
/// Ids are plain integers assigned monotonically by the registry and
/// keyed as their decimal string in the underlying stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Wraps a raw id value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Lifecycle of a record: `new` → `joined` ⇄ `parted`.
///
/// Joined and parted are re-enterable; a record may part, rejoin, and
/// part again. Parting a record still in `new` is tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Created but no lifecycle event posted yet.
    New,
    /// Currently present.
    Joined,
    /// Departed.
    Parted,
}

/// The canonical entity representing one deduplicated participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Unique id, immutable once assigned.
    pub id: RecordId,

    /// Every alias this record is known by, canonical first. Never empty
    /// after creation.
    pub aliases: Vec<String>,

    /// Timestamps at which this identity joined, in posting order.
    #[serde(default)]
    pub join_times: Vec<DateTime<Utc>>,

    /// Timestamps at which this identity parted, in posting order.
    #[serde(default)]
    pub part_times: Vec<DateTime<Utc>>,

    /// Message text by timestamp; a colliding timestamp overwrites.
    #[serde(default)]
    pub messages: BTreeMap<DateTime<Utc>, String>,

    /// Action text by timestamp; same collision policy as messages.
    #[serde(default)]
    pub actions: BTreeMap<DateTime<Utc>, String>,

    /// Current lifecycle state.
    pub state: Lifecycle,
}

impl IdentityRecord {
    /// Creates a record known by a single canonical alias, in the `new`
    /// state with empty histories.
    #[must_use]
    pub fn new(id: RecordId, alias: impl Into<String>) -> Self {
        Self {
            id,
            aliases: vec![alias.into()],
            join_times: Vec::new(),
            part_times: Vec::new(),
            messages: BTreeMap::new(),
            actions: BTreeMap::new(),
            state: Lifecycle::New,
        }
    }

    /// The alias this record is primarily known by (first in the list).
    #[must_use]
    pub fn canonical_alias(&self) -> &str {
        self.aliases.first().map_or("", String::as_str)
    }

    /// Returns true if `alias` is already on this record.
    #[must_use]
    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a == alias)
    }

    /// Adds an alternate alias, ignoring duplicates.
    pub fn add_alias(&mut self, alias: impl Into<String>) {
        let alias = alias.into();
        if !self.has_alias(&alias) {
            self.aliases.push(alias);
        }
    }

    /// Records a join at `time` and transitions to `joined`.
    ///
    /// The exact same instant is never recorded twice.
    pub fn join(&mut self, time: DateTime<Utc>) {
        if !self.join_times.contains(&time) {
            self.join_times.push(time);
        }
        self.state = Lifecycle::Joined;
    }

    /// Records a part at `time` and transitions to `parted`.
    ///
    /// Parting a record that never joined is tolerated; the join history
    /// simply stays empty.
    pub fn part(&mut self, time: DateTime<Utc>) {
        if !self.part_times.contains(&time) {
            self.part_times.push(time);
        }
        self.state = Lifecycle::Parted;
    }

    /// Records message text at `time`, overwriting any earlier entry at
    /// the same instant.
    pub fn message(&mut self, time: DateTime<Utc>, text: impl Into<String>) {
        self.messages.insert(time, text.into());
    }

    /// Records action text at `time`, overwriting any earlier entry at
    /// the same instant.
    pub fn action(&mut self, time: DateTime<Utc>, text: impl Into<String>) {
        self.actions.insert(time, text.into());
    }
}

impl fmt::Display for IdentityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: AKA {:?}", self.canonical_alias(), self.aliases)?;
        writeln!(f, "\tjoins {}", self.join_times.len())?;
        writeln!(f, "\tparts {}", self.part_times.len())?;
        writeln!(f, "\tsaid  {}", self.messages.len())?;
        write!(f, "\tacts  {}", self.actions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_new_record() {
        let record = IdentityRecord::new(RecordId::new(1), "alice");
        assert_eq!(record.state, Lifecycle::New);
        assert_eq!(record.canonical_alias(), "alice");
        assert_eq!(record.aliases, vec!["alice"]);
        assert!(record.join_times.is_empty());
    }

    #[test]
    fn test_join_then_part_then_rejoin() {
        let mut record = IdentityRecord::new(RecordId::new(1), "alice");
        record.join(ts(10));
        assert_eq!(record.state, Lifecycle::Joined);
        record.part(ts(20));
        assert_eq!(record.state, Lifecycle::Parted);
        record.join(ts(30));
        assert_eq!(record.state, Lifecycle::Joined);
        assert_eq!(record.join_times, vec![ts(10), ts(30)]);
        assert_eq!(record.part_times, vec![ts(20)]);
    }

    #[test]
    fn test_duplicate_instant_recorded_once() {
        let mut record = IdentityRecord::new(RecordId::new(1), "alice");
        record.join(ts(10));
        record.join(ts(10));
        assert_eq!(record.join_times.len(), 1);
    }

    #[test]
    fn test_part_before_join_is_tolerated() {
        let mut record = IdentityRecord::new(RecordId::new(1), "drive-by");
        record.part(ts(5));
        assert_eq!(record.state, Lifecycle::Parted);
        assert!(record.join_times.is_empty());
        assert_eq!(record.part_times, vec![ts(5)]);
    }

    #[test]
    fn test_message_collision_overwrites() {
        let mut record = IdentityRecord::new(RecordId::new(1), "alice");
        record.message(ts(10), "first");
        record.message(ts(10), "second");
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.messages[&ts(10)], "second");
    }

    #[test]
    fn test_add_alias_dedup() {
        let mut record = IdentityRecord::new(RecordId::new(1), "alice");
        record.add_alias("al");
        record.add_alias("al");
        assert_eq!(record.aliases, vec!["alice", "al"]);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut record = IdentityRecord::new(RecordId::new(7), "alice");
        record.join(ts(10));
        record.message(ts(15), "hello");

        let json = serde_json::to_string(&record).unwrap();
        let back: IdentityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
