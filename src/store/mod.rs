//! Local record repository for synced contacts.
//!
//! The sync engine replaces the whole record set in one pass: it calls
//! [`ContactStore::clear_all`], inserts every accepted record, then calls
//! [`ContactStore::commit`]. Readers go through [`ContactStore::sorted_view`].
//! A failed call abandons the pending generation, so readers keep seeing the
//! last committed one.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::contacts::types::ContactRecord;
use crate::error::StoreError;

/// Storage backend for contact records.
pub trait ContactStore: Send {
  /// Remove every record. Starts the replacement transaction.
  fn clear_all(&mut self) -> Result<(), StoreError>;

  /// Add one record to the pending generation.
  fn insert(&mut self, record: &ContactRecord) -> Result<(), StoreError>;

  /// Make the cleared and inserted state durable.
  fn commit(&mut self) -> Result<(), StoreError>;

  /// All records ordered by last name, then first name (case-sensitive).
  fn sorted_view(&self) -> Result<Vec<ContactRecord>, StoreError>;
}
