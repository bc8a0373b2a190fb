//! The identity registry.
//!
//! An [`IdentityRegistry`] composes two record stores — canonical
//! [`IdentityRecord`]s in the framed binary format and hand-editable
//! [`IdentityMetadata`] in TOML — plus an in-memory alias index derived
//! from both at open time. The three structures are mutually synchronized
//! with no transaction between them, so every public operation performs
//! the full invariant-preserving update sequence and the raw maps are
//! never exposed. Drift left by a crash between the two flushes in
//! [`close`](IdentityRegistry::close) is repaired by the reconciliation
//! pass at the next open.
//!
//! All mutation goes through `&mut self`, which is the single-writer
//! boundary: `next_id`, `bind`, and `merge` are read-modify-write
//! sequences with no internal synchronization.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::merge;
use crate::metadata::IdentityMetadata;
use crate::record::{IdentityRecord, RecordId};
use crate::store::{Format, OpenMode, RecordStore, StoreOptions};

/// Open-time configuration for an [`IdentityRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Backing file for the records store (binary output).
    pub records_path: PathBuf,
    /// Backing file for the metadata store (TOML output).
    pub metadata_path: PathBuf,
    /// First id to assign when neither store holds a numeric id yet.
    pub id_seed: u64,
}

impl RegistryOptions {
    /// Options for the given pair of backing files, with ids seeded at 1.
    pub fn new(records_path: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            records_path: records_path.into(),
            metadata_path: metadata_path.into(),
            id_seed: 1,
        }
    }

    /// Overrides the id seed used when no ids exist yet.
    #[must_use]
    pub fn id_seed(mut self, seed: u64) -> Self {
        self.id_seed = seed;
        self
    }
}

/// Maps ids and aliases to deduplicated identity records.
#[derive(Debug)]
pub struct IdentityRegistry {
    records: RecordStore<IdentityRecord>,
    metadata: RecordStore<IdentityMetadata>,
    aliases: HashMap<String, RecordId>,
    next_id: u64,
}

impl IdentityRegistry {
    /// Opens both underlying stores and reconciles them.
    ///
    /// Reconciliation restores the cross-index invariants: every alias of
    /// every record is indexed; metadata display names and chat handles
    /// are indexed; a metadata entry with no corresponding record gets a
    /// minimal record synthesized from its first chat handle; chat
    /// handles missing from a record are appended to it. The id counter
    /// is seeded one past the highest numeric id seen in either store.
    ///
    /// # Errors
    /// Any store open failure aborts the whole session; there is no
    /// partial registry.
    pub fn open(options: RegistryOptions) -> Result<Self> {
        let records = RecordStore::open(
            &options.records_path,
            StoreOptions {
                mode: OpenMode::CreateIfAbsent,
                format: Format::Binary,
                permissions: None,
            },
        )?;
        let metadata = RecordStore::open(
            &options.metadata_path,
            StoreOptions {
                mode: OpenMode::CreateIfAbsent,
                format: Format::Toml,
                permissions: None,
            },
        )?;

        let mut registry = Self {
            records,
            metadata,
            aliases: HashMap::new(),
            next_id: options.id_seed,
        };
        registry.reconcile(options.id_seed)?;
        info!(
            records = registry.records.len(),
            aliases = registry.aliases.len(),
            next_id = registry.next_id,
            "opened identity registry"
        );
        Ok(registry)
    }

    fn reconcile(&mut self, id_seed: u64) -> Result<()> {
        for (_, record) in self.records.iter() {
            for alias in &record.aliases {
                self.aliases.insert(alias.clone(), record.id);
            }
        }

        let mut synthesized: Vec<(String, IdentityRecord)> = Vec::new();
        let mut appended: Vec<(String, Vec<String>)> = Vec::new();

        for (key, meta) in self.metadata.iter() {
            let Ok(raw) = key.parse::<u64>() else {
                warn!(key, "metadata entry has a non-numeric id, skipping");
                continue;
            };
            let id = RecordId::new(raw);

            if !meta.display_name.is_empty() {
                self.aliases.insert(meta.display_name.clone(), id);
            }
            for handle in &meta.chat {
                self.aliases.insert(handle.clone(), id);
            }

            match self.records.get(key) {
                Some(record) => {
                    let extra: Vec<String> = meta
                        .chat
                        .iter()
                        .filter(|handle| !record.has_alias(handle))
                        .cloned()
                        .collect();
                    if !extra.is_empty() {
                        appended.push((key.to_owned(), extra));
                    }
                }
                None => {
                    let first = meta.chat.first().cloned().or_else(|| {
                        (!meta.display_name.is_empty()).then(|| meta.display_name.clone())
                    });
                    let Some(first) = first else {
                        warn!(key, "metadata entry has no handles, cannot synthesize a record");
                        continue;
                    };
                    let mut record = IdentityRecord::new(id, first);
                    for handle in &meta.chat {
                        record.add_alias(handle.clone());
                    }
                    synthesized.push((key.to_owned(), record));
                }
            }
        }

        for (key, extra) in appended {
            if let Some(record) = self.records.get_mut(&key)? {
                for alias in extra {
                    record.add_alias(alias);
                }
            }
        }
        for (key, record) in synthesized {
            debug!(key = %key, "synthesized record from metadata");
            self.records.insert(key, record)?;
        }

        let max_id = self
            .records
            .keys()
            .chain(self.metadata.keys())
            .filter_map(|key| key.parse::<u64>().ok())
            .max();
        self.next_id = max_id.map_or(id_seed, |max| max + 1);
        Ok(())
    }

    /// Returns the next unassigned id and advances the counter.
    pub fn next_id(&mut self) -> RecordId {
        let id = self.next_id;
        self.next_id += 1;
        RecordId::new(id)
    }

    /// Resolves `key` — an id in decimal form, or any known alias — to
    /// its record.
    ///
    /// # Errors
    /// [`Error::NotFound`] if the key is neither.
    pub fn lookup(&self, key: &str) -> Result<&IdentityRecord> {
        if let Some(record) = self.records.get(key) {
            return Ok(record);
        }
        if let Some(id) = self.aliases.get(key) {
            if let Some(record) = self.records.get(&id.to_string()) {
                return Ok(record);
            }
        }
        Err(Error::not_found(key))
    }

    /// Mutable variant of [`lookup`](Self::lookup); this is how log
    /// parsers post join/part/message/action events onto a record.
    ///
    /// # Errors
    /// [`Error::NotFound`] if the key does not resolve.
    pub fn lookup_mut(&mut self, key: &str) -> Result<&mut IdentityRecord> {
        let (store_key, _) = self.resolve_key(key)?;
        self.records
            .get_mut(&store_key)?
            .ok_or_else(|| Error::not_found(key))
    }

    /// Binds `alias` to `record`.
    ///
    /// If the record's id is already known, the alias is indexed at it
    /// and appended to the record's alias list; otherwise the record is
    /// inserted as a new entry first. Rebinding an alias that already
    /// points elsewhere silently steals it (last writer wins).
    ///
    /// # Errors
    /// Propagates store failures; never fails on an unknown id.
    pub fn bind(&mut self, alias: impl Into<String>, record: IdentityRecord) -> Result<RecordId> {
        let alias = alias.into();
        let id = record.id;
        let key = id.to_string();

        if self.records.contains_key(&key) {
            if let Some(existing) = self.records.get_mut(&key)? {
                existing.add_alias(alias.clone());
            }
        } else {
            let mut record = record;
            record.add_alias(alias.clone());
            for known in &record.aliases {
                self.aliases.insert(known.clone(), id);
            }
            self.records.insert(key, record)?;
            // An externally assigned id must not collide with ours later.
            self.next_id = self.next_id.max(id.as_u64() + 1);
        }

        self.aliases.insert(alias, id);
        Ok(id)
    }

    /// Assigns the next id to a fresh record known by `alias`, joined at
    /// `seen_at`, and binds it.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn create(&mut self, alias: impl Into<String>, seen_at: DateTime<Utc>) -> Result<RecordId> {
        let alias = alias.into();
        let id = self.next_id();
        let mut record = IdentityRecord::new(id, alias.clone());
        record.join(seen_at);
        self.bind(alias, record)
    }

    /// The parser-facing entry point: resolves `alias`, creating a fresh
    /// record joined at `seen_at` when the alias is unknown.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn resolve_or_create(
        &mut self,
        alias: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<&mut IdentityRecord> {
        if !self.contains(alias) {
            self.create(alias.to_owned(), seen_at)?;
        }
        self.lookup_mut(alias)
    }

    /// Returns true if `key` is a known id or alias.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key) || self.aliases.contains_key(key)
    }

    /// Folds `secondary_key`'s entire history into `primary_key`'s record
    /// and discards the secondary, returning the surviving id.
    ///
    /// All four synchronized structures are reconciled: metadata fields
    /// (lists unioned, display name by the longest-wins policy), record
    /// histories (aliases unioned, intervals re-sorted, colliding
    /// message/action timestamps taken from the secondary), the alias
    /// index, and finally the secondary's entries in both stores. A
    /// secondary that never had a metadata entry is tolerated. The change
    /// is in-memory only until the next [`close`](Self::close) or sync.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if either key does not resolve — including a
    ///   secondary that was already merged away
    /// - [`Error::SelfMerge`] if both keys name the same record
    pub fn merge(&mut self, primary_key: &str, secondary_key: &str) -> Result<RecordId> {
        let (primary_store_key, primary_id) = self.resolve_key(primary_key)?;
        let (secondary_store_key, secondary_id) = self.resolve_key(secondary_key)?;
        if primary_id == secondary_id {
            return Err(Error::SelfMerge { id: primary_id });
        }

        let Some(secondary) = self.records.remove(&secondary_store_key)? else {
            return Err(Error::not_found(secondary_key));
        };

        // A freshly created secondary may never have been given metadata;
        // that absence is tolerated silently.
        if let Some(secondary_meta) = self.metadata.remove(&secondary_store_key)? {
            if !self.metadata.contains_key(&primary_store_key) {
                self.metadata
                    .insert(primary_store_key.clone(), IdentityMetadata::default())?;
            }
            if let Some(primary_meta) = self.metadata.get_mut(&primary_store_key)? {
                merge::merge_metadata(primary_meta, &secondary_meta);
            }
        }

        let merged_aliases = match self.records.get_mut(&primary_store_key)? {
            Some(primary) => {
                merge::merge_records(primary, &secondary);
                primary.aliases.clone()
            }
            None => return Err(Error::not_found(primary_key)),
        };

        for alias in merged_aliases {
            self.aliases.insert(alias, primary_id);
        }
        let mut handles: Vec<String> = Vec::new();
        if let Some(meta) = self.metadata.get(&primary_store_key) {
            if !meta.display_name.is_empty() {
                handles.push(meta.display_name.clone());
            }
            handles.extend(meta.chat.iter().cloned());
        }
        for handle in handles {
            self.aliases.insert(handle, primary_id);
        }
        // Nothing may keep resolving to the discarded id.
        self.aliases.retain(|_, id| *id != secondary_id);

        info!(primary = %primary_id, secondary = %secondary_id, "merged identity records");
        Ok(primary_id)
    }

    /// Metadata for `id`, if any has been recorded or loaded.
    #[must_use]
    pub fn metadata(&self, id: RecordId) -> Option<&IdentityMetadata> {
        self.metadata.get(&id.to_string())
    }

    /// Replaces the metadata for `id`, indexing its display name and chat
    /// handles and appending the handles to the record's alias list.
    ///
    /// # Errors
    /// [`Error::NotFound`] if `id` has no record.
    pub fn set_metadata(&mut self, id: RecordId, meta: IdentityMetadata) -> Result<()> {
        let key = id.to_string();
        if !self.records.contains_key(&key) {
            return Err(Error::not_found(key));
        }
        if !meta.display_name.is_empty() {
            self.aliases.insert(meta.display_name.clone(), id);
        }
        for handle in &meta.chat {
            self.aliases.insert(handle.clone(), id);
        }
        if let Some(record) = self.records.get_mut(&key)? {
            for handle in &meta.chat {
                record.add_alias(handle.clone());
            }
        }
        self.metadata.insert(key, meta)?;
        Ok(())
    }

    /// A human-presentable name for `id`: the metadata display name when
    /// one is set, otherwise the record's canonical alias.
    #[must_use]
    pub fn display_name_for(&self, id: RecordId) -> Option<&str> {
        let key = id.to_string();
        if let Some(meta) = self.metadata.get(&key) {
            if !meta.display_name.is_empty() {
                return Some(&meta.display_name);
            }
        }
        self.records.get(&key).map(IdentityRecord::canonical_alias)
    }

    /// Forward-only iterator over every tracked id.
    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.records.iter().map(|(_, record)| record.id)
    }

    /// Iterator over every tracked record; statistics consumers read the
    /// registry through this after all events are posted.
    pub fn records(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.records.iter().map(|(_, record)| record)
    }

    /// Number of unique identities tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no identities are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Flushes both stores: first every record is guaranteed a metadata
    /// entry (synthesizing empty-field ones as needed), then metadata,
    /// then records are written out.
    ///
    /// The two flushes are independent; a crash between them leaves the
    /// files inconsistent, which the next open repairs.
    ///
    /// # Errors
    /// Propagates the first store failure; a failed close may be retried.
    pub fn close(&mut self) -> Result<()> {
        let missing: Vec<(String, IdentityMetadata)> = self
            .records
            .iter()
            .filter(|(key, _)| !self.metadata.contains_key(key))
            .map(|(key, record)| (key.to_owned(), IdentityMetadata::from_record(record)))
            .collect();
        for (key, meta) in missing {
            self.metadata.insert(key, meta)?;
        }
        self.metadata.sync(None)?;
        self.records.sync(None)?;
        Ok(())
    }

    fn resolve_key(&self, key: &str) -> Result<(String, RecordId)> {
        if let Some(record) = self.records.get(key) {
            return Ok((key.to_owned(), record.id));
        }
        if let Some(id) = self.aliases.get(key) {
            let store_key = id.to_string();
            if self.records.contains_key(&store_key) {
                return Ok((store_key, *id));
            }
        }
        Err(Error::not_found(key))
    }
}
