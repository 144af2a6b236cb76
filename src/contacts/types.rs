use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Unvalidated user object as delivered by the remote service.
pub type RawUser = Map<String, Value>;

/// Validated contact, ready to be stored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactRecord {
  /// Stable identifier used when reporting per-record events
  pub key: String,
  pub first_name: String,
  pub last_name: String,
  pub title: Option<String>,
  pub gender: Option<String>,
  pub phone: Option<String>,
  pub cell: Option<String>,
  pub email: Option<String>,
  pub thumbnail_url: Option<String>,
}

impl ContactRecord {
  /// "First Last", skipping whichever part is empty.
  pub fn display_name(&self) -> String {
    join_non_empty(&[&self.first_name, &self.last_name])
  }

  /// Name with the honorific in front, as shown on the detail screen.
  pub fn formal_name(&self) -> String {
    let title = self.title.as_deref().unwrap_or("");
    join_non_empty(&[title, &self.first_name, &self.last_name])
  }

  /// Secondary line of a list row.
  pub fn detail_line(&self) -> String {
    format!(
      "cell: {}\temail: {}",
      self.cell.as_deref().unwrap_or(""),
      self.email.as_deref().unwrap_or("")
    )
  }
}

fn join_non_empty(parts: &[&str]) -> String {
  parts
    .iter()
    .filter(|p| !p.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join(" ")
}

/// Derive a record key from content when the service did not send an id.
pub fn content_key(
  first_name: &str,
  last_name: &str,
  email: Option<&str>,
  thumbnail_url: Option<&str>,
) -> String {
  let mut hasher = Sha256::new();
  for part in [
    first_name,
    last_name,
    email.unwrap_or(""),
    thumbnail_url.unwrap_or(""),
  ] {
    hasher.update(part.as_bytes());
    hasher.update([0u8]);
  }
  hex::encode(hasher.finalize())
}
