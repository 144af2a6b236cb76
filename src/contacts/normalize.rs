//! Mapping of raw remote users onto validated contact records.

use serde_json::Value;

use super::types::{content_key, ContactRecord, RawUser};

/// Upper-case the first character of every space-delimited word.
///
/// The rest of each word is left untouched, and runs of spaces are preserved.
pub fn title_case(s: &str) -> String {
  s.split(' ')
    .map(|word| {
      let mut chars = word.chars();
      match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
      }
    })
    .collect::<Vec<String>>()
    .join(" ")
}

/// Build a record from one raw user, or `None` when it has no usable name.
pub fn normalize(raw: &RawUser) -> Option<ContactRecord> {
  let name = raw.get("name").and_then(Value::as_object);
  let name_field = |key: &str| {
    name
      .and_then(|n| n.get(key))
      .and_then(Value::as_str)
      .map(title_case)
  };

  let first_name = name_field("first").unwrap_or_default();
  let last_name = name_field("last").unwrap_or_default();
  if first_name.is_empty() && last_name.is_empty() {
    return None;
  }

  let email = string_field(raw, "email");
  let thumbnail_url = raw
    .get("picture")
    .and_then(|p| p.get("thumbnail"))
    .and_then(Value::as_str)
    .map(String::from);

  let key = raw
    .get("login")
    .and_then(|l| l.get("uuid"))
    .and_then(Value::as_str)
    .filter(|uuid| !uuid.is_empty())
    .map(String::from)
    .unwrap_or_else(|| {
      content_key(
        &first_name,
        &last_name,
        email.as_deref(),
        thumbnail_url.as_deref(),
      )
    });

  Some(ContactRecord {
    key,
    title: name_field("title"),
    gender: string_field(raw, "gender").map(|g| title_case(&g)),
    phone: string_field(raw, "phone"),
    cell: string_field(raw, "cell"),
    email,
    thumbnail_url,
    first_name,
    last_name,
  })
}

fn string_field(raw: &RawUser, key: &str) -> Option<String> {
  raw.get(key).and_then(Value::as_str).map(String::from)
}
