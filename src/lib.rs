//! # aliasdb - deduplicated identities over a deferred-write record store
//!
//! aliasdb keeps a whole dataset resident in memory for the lifetime of a
//! session and commits it to disk atomically on an explicit flush. On top
//! of that container sits an identity registry that deduplicates entities
//! known by multiple aliases — the same person appearing under several
//! handles across sources — and merges their histories without losing
//! data.
//!
//! ## Core Concepts
//!
//! - **RecordStore**: a key/value mapping loaded whole at open time with
//!   auto-detected encoding, written back whole via a temp-file-then-
//!   atomic-rename commit
//! - **IdentityRecord**: one deduplicated participant — aliases,
//!   membership intervals, message/action histories
//! - **IdentityRegistry**: two stores plus an alias index, reconciled at
//!   open so every alias resolves to exactly one record
//! - **Merge**: folds one identity's entire history into another and
//!   discards the redundant id
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aliasdb::{IdentityRegistry, RegistryOptions};
//! use chrono::Utc;
//!
//! let mut registry = IdentityRegistry::open(RegistryOptions::new(
//!     "contact_stats.db",
//!     "usernames.toml",
//! ))?;
//!
//! // A log parser resolves an alias (creating the identity if unseen)
//! // and posts events onto the returned record.
//! let record = registry.resolve_or_create("alice", Utc::now())?;
//! record.message(Utc::now(), "hello");
//!
//! // An operator later determines "al" and "alice" are the same person.
//! registry.merge("alice", "al")?;
//!
//! registry.close()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod merge;
pub mod metadata;
pub mod record;
pub mod registry;
pub mod store;

// Re-export primary types at crate root for convenience
pub use error::{Error, Result, StoreError};
pub use merge::longer_text_wins;
pub use metadata::IdentityMetadata;
pub use record::{IdentityRecord, Lifecycle, RecordId};
pub use registry::{IdentityRegistry, RegistryOptions};
pub use store::{Format, OpenMode, RecordStore, StoreOptions};
