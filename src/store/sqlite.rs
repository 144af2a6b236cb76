//! SQLite-backed contact store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, warn};

use super::ContactStore;
use crate::contacts::types::ContactRecord;
use crate::error::StoreError;

/// Schema for contact tables.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_key TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    title TEXT,
    gender TEXT,
    phone TEXT,
    cell TEXT,
    email TEXT,
    thumbnail_url TEXT
);

CREATE INDEX IF NOT EXISTS idx_contacts_name ON contacts(last_name, first_name);

-- Single row describing the last committed sync
CREATE TABLE IF NOT EXISTS sync_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    synced_at TEXT NOT NULL,
    record_count INTEGER NOT NULL
);
"#;

pub struct SqliteStore {
  conn: Connection,
}

impl SqliteStore {
  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let store = Self {
      conn: Connection::open(path)?,
    };
    store.run_migrations()?;

    Ok(store)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let store = Self {
      conn: Connection::open_in_memory()?,
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn run_migrations(&self) -> Result<(), StoreError> {
    self.conn.execute_batch(SCHEMA)?;
    Ok(())
  }

  /// When the last replacement was committed, if ever.
  pub fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
    let synced_at: Option<String> = self
      .conn
      .query_row("SELECT synced_at FROM sync_state WHERE id = 1", [], |row| {
        row.get(0)
      })
      .optional()?;

    Ok(synced_at.and_then(|s| {
      DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
    }))
  }

  fn count(&self) -> Result<i64, StoreError> {
    Ok(
      self
        .conn
        .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?,
    )
  }

  fn insert_row(&self, record: &ContactRecord) -> Result<(), StoreError> {
    self.conn.execute(
      "INSERT INTO contacts (record_key, first_name, last_name, title, gender, phone, cell, email, thumbnail_url)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        record.key,
        record.first_name,
        record.last_name,
        record.title,
        record.gender,
        record.phone,
        record.cell,
        record.email,
        record.thumbnail_url,
      ],
    )?;
    Ok(())
  }

  fn commit_generation(&self) -> Result<i64, StoreError> {
    let count = self.count()?;
    self.conn.execute(
      "INSERT OR REPLACE INTO sync_state (id, synced_at, record_count) VALUES (1, ?, ?)",
      params![Utc::now().to_rfc3339(), count],
    )?;

    if !self.conn.is_autocommit() {
      self.conn.execute_batch("COMMIT")?;
    }
    Ok(count)
  }

  /// Drop the pending generation when `result` failed, so readers go back to
  /// the last committed one.
  fn rollback_on_error<V>(&self, result: Result<V, StoreError>) -> Result<V, StoreError> {
    if result.is_err() && !self.conn.is_autocommit() {
      match self.conn.execute_batch("ROLLBACK") {
        Ok(()) => debug!("Rolled back pending contact generation"),
        Err(e) => warn!(error = %e, "Failed to roll back contact store"),
      }
    }
    result
  }
}

impl ContactStore for SqliteStore {
  fn clear_all(&mut self) -> Result<(), StoreError> {
    if self.conn.is_autocommit() {
      self.conn.execute_batch("BEGIN IMMEDIATE")?;
    }
    let removed = self.conn.execute("DELETE FROM contacts", []);
    let removed = self.rollback_on_error(removed.map_err(StoreError::from))?;
    debug!(removed, "Cleared contact store");
    Ok(())
  }

  fn insert(&mut self, record: &ContactRecord) -> Result<(), StoreError> {
    let inserted = self.insert_row(record);
    self.rollback_on_error(inserted)
  }

  fn commit(&mut self) -> Result<(), StoreError> {
    let committed = self.commit_generation();
    let count = self.rollback_on_error(committed)?;
    debug!(count, "Committed contact store");
    Ok(())
  }

  fn sorted_view(&self) -> Result<Vec<ContactRecord>, StoreError> {
    let mut stmt = self.conn.prepare(
      "SELECT record_key, first_name, last_name, title, gender, phone, cell, email, thumbnail_url
       FROM contacts
       ORDER BY last_name, first_name, id",
    )?;

    let records = stmt
      .query_map([], record_from_row)?
      .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
  }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ContactRecord> {
  Ok(ContactRecord {
    key: row.get(0)?,
    first_name: row.get(1)?,
    last_name: row.get(2)?,
    title: row.get(3)?,
    gender: row.get(4)?,
    phone: row.get(5)?,
    cell: row.get(6)?,
    email: row.get(7)?,
    thumbnail_url: row.get(8)?,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(first: &str, last: &str) -> ContactRecord {
    ContactRecord {
      key: format!("{}-{}", first, last),
      first_name: first.to_string(),
      last_name: last.to_string(),
      ..Default::default()
    }
  }

  fn replace(store: &mut SqliteStore, records: &[ContactRecord]) {
    store.clear_all().unwrap();
    for r in records {
      store.insert(r).unwrap();
    }
    store.commit().unwrap();
  }

  #[test]
  fn test_sorted_by_last_then_first() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    replace(
      &mut store,
      &[
        record("Zed", "Lee"),
        record("Ann", "Young"),
        record("Bob", "Lee"),
        record("Cat", "Adams"),
      ],
    );

    let names: Vec<String> = store
      .sorted_view()
      .unwrap()
      .iter()
      .map(|r| r.display_name())
      .collect();
    assert_eq!(names, vec!["Cat Adams", "Bob Lee", "Zed Lee", "Ann Young"]);
  }

  #[test]
  fn test_sort_is_case_sensitive_and_stable() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let mut first = record("Ann", "Lee");
    first.email = Some("first@x.com".to_string());
    let mut second = record("Ann", "Lee");
    second.email = Some("second@x.com".to_string());
    replace(&mut store, &[record("Ann", "de Vries"), first, second]);

    let view = store.sorted_view().unwrap();
    // Upper-case sorts before lower-case in binary collation
    assert_eq!(view[0].email.as_deref(), Some("first@x.com"));
    assert_eq!(view[1].email.as_deref(), Some("second@x.com"));
    assert_eq!(view[2].last_name, "de Vries");
  }

  #[test]
  fn test_replace_drops_previous_generation() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    replace(&mut store, &[record("Ann", "Lee"), record("Bob", "Ray")]);
    replace(&mut store, &[record("Cat", "Sun")]);

    let view = store.sorted_view().unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].display_name(), "Cat Sun");
  }

  #[test]
  fn test_optional_fields_round_trip_through_rows() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let mut r = record("Ann", "Lee");
    r.title = Some("Ms".to_string());
    r.thumbnail_url = Some("https://x.test/a/b/c.jpg".to_string());
    replace(&mut store, &[r.clone()]);

    assert_eq!(store.sorted_view().unwrap(), vec![r]);
  }

  #[test]
  fn test_last_synced_at_set_on_commit() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    assert!(store.last_synced_at().unwrap().is_none());

    let before = Utc::now() - chrono::Duration::seconds(1);
    replace(&mut store, &[record("Ann", "Lee")]);
    let synced_at = store.last_synced_at().unwrap().unwrap();
    assert!(synced_at >= before);
  }

  #[test]
  fn test_failed_insert_restores_previous_generation() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    replace(&mut store, &[record("Ann", "Lee")]);
    let synced_at = store.last_synced_at().unwrap();

    store.clear_all().unwrap();
    store.insert(&record("Bob", "Ray")).unwrap();
    store.conn.execute_batch("DROP TABLE contacts").unwrap();
    assert!(store.insert(&record("Cat", "Sun")).is_err());

    assert!(store.conn.is_autocommit());
    let names: Vec<String> = store
      .sorted_view()
      .unwrap()
      .iter()
      .map(|r| r.display_name())
      .collect();
    assert_eq!(names, vec!["Ann Lee"]);
    assert_eq!(store.last_synced_at().unwrap(), synced_at);
  }

  #[test]
  fn test_next_replacement_after_failure_succeeds() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    replace(&mut store, &[record("Ann", "Lee")]);

    store.clear_all().unwrap();
    store.conn.execute_batch("DROP TABLE contacts").unwrap();
    assert!(store.insert(&record("Bob", "Ray")).is_err());

    replace(&mut store, &[record("Cat", "Sun")]);
    assert_eq!(store.sorted_view().unwrap()[0].display_name(), "Cat Sun");
  }

  #[test]
  fn test_open_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("contacts.db");
    let mut store = SqliteStore::open(&path).unwrap();
    replace(&mut store, &[record("Ann", "Lee")]);
    drop(store);

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(reopened.sorted_view().unwrap().len(), 1);
  }
}
