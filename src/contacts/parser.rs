//! Envelope validation for the random-user response body.
//!
//! Expected shape is `{"results": [ <user>, ... ]}`. Older responses wrap each
//! user as `{"user": {...}, "seed": "..."}`; both shapes may be mixed per element.

use serde_json::Value;

use super::types::RawUser;
use crate::error::SyncError;

/// One element of the `results` array.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadEntry {
  /// User fields at the top level of the element
  Flat(RawUser),
  /// User fields under `user`, siblings such as `seed` dropped
  Nested(RawUser),
}

impl PayloadEntry {
  /// Classify an array element by the presence of a `user` key.
  pub fn from_value(value: Value) -> Result<Self, SyncError> {
    let Value::Object(mut map) = value else {
      return Err(SyncError::MalformedPayload(
        "array member is not a dictionary".to_string(),
      ));
    };

    match map.remove("user") {
      Some(Value::Object(user)) => Ok(Self::Nested(user)),
      Some(_) => Err(SyncError::MalformedPayload(
        "user member is not a dictionary".to_string(),
      )),
      None => Ok(Self::Flat(map)),
    }
  }

  pub fn into_user(self) -> RawUser {
    match self {
      Self::Flat(user) | Self::Nested(user) => user,
    }
  }
}

/// Unwrap the response body into raw users, preserving order.
pub fn parse(body: &[u8]) -> Result<Vec<RawUser>, SyncError> {
  if body.is_empty() {
    return Err(SyncError::MalformedPayload(
      "empty response body".to_string(),
    ));
  }

  let root: Value =
    serde_json::from_slice(body).map_err(|e| SyncError::MalformedPayload(e.to_string()))?;

  let Value::Object(mut root) = root else {
    return Err(SyncError::MalformedPayload(
      "top level is not a dictionary".to_string(),
    ));
  };

  let results = match root.remove("results") {
    Some(Value::Array(items)) => items,
    Some(_) => {
      return Err(SyncError::UnexpectedEnvelope(
        "no array for results key".to_string(),
      ))
    }
    None => {
      return Err(SyncError::UnexpectedEnvelope(
        "missing results key".to_string(),
      ))
    }
  };

  results
    .into_iter()
    .map(|item| PayloadEntry::from_value(item).map(PayloadEntry::into_user))
    .collect()
}
