//! Cache key construction.
//!
//! Every key has the form `<namespace>:<userId>:<resourceKind>:<resourceId>`.
//! Components are form-urlencoded before joining, so the separator can never
//! appear inside one and distinct inputs never produce the same key. All
//! callers go through here; nothing else should format cache keys.

use std::fmt;
use url::form_urlencoded;

pub const SEPARATOR: char = ':';

/// The kind of record a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
  Session,
  ContributionRequest,
}

impl ResourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Session => "session",
      Self::ContributionRequest => "contribution-request",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "session" => Some(Self::Session),
      "contribution-request" => Some(Self::ContributionRequest),
      _ => None,
    }
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
  #[error("{0} must not be empty")]
  EmptyComponent(&'static str),
  #[error("malformed cache key: {0}")]
  Malformed(String),
}

/// A key split back into its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
  pub namespace: String,
  pub user_id: String,
  pub kind: ResourceKind,
  pub resource_id: String,
}

/// Build the cache key for one resource.
pub fn build_key(
  namespace: &str,
  user_id: &str,
  kind: ResourceKind,
  resource_id: &str,
) -> Result<String, KeyError> {
  Ok(format!(
    "{}{}{}",
    prefix(namespace, user_id, kind)?,
    SEPARATOR,
    encode(resource_id, "resource id")?
  ))
}

/// Prefix shared by every key of `kind` owned by `user_id`, without the
/// trailing separator.
pub fn prefix(namespace: &str, user_id: &str, kind: ResourceKind) -> Result<String, KeyError> {
  Ok(format!(
    "{}{sep}{}{sep}{}",
    encode(namespace, "namespace")?,
    encode(user_id, "user id")?,
    kind.as_str(),
    sep = SEPARATOR
  ))
}

/// Prefix shared by every key in `namespace`, including the trailing
/// separator.
pub fn namespace_prefix(namespace: &str) -> Result<String, KeyError> {
  Ok(format!("{}{}", encode(namespace, "namespace")?, SEPARATOR))
}

/// Split a key produced by [`build_key`].
pub fn parse_key(key: &str) -> Result<KeyParts, KeyError> {
  let parts: Vec<&str> = key.split(SEPARATOR).collect();
  let [namespace, user_id, kind, resource_id] = parts.as_slice() else {
    return Err(KeyError::Malformed(key.to_string()));
  };

  let kind = ResourceKind::parse(kind).ok_or_else(|| KeyError::Malformed(key.to_string()))?;

  Ok(KeyParts {
    namespace: decode(namespace),
    user_id: decode(user_id),
    kind,
    resource_id: decode(resource_id),
  })
}

fn encode(component: &str, name: &'static str) -> Result<String, KeyError> {
  if component.is_empty() {
    return Err(KeyError::EmptyComponent(name));
  }
  Ok(form_urlencoded::byte_serialize(component.as_bytes()).collect())
}

/// Encoded components contain no `&` or `=`, so they parse as a single
/// bare name.
fn decode(component: &str) -> String {
  form_urlencoded::parse(component.as_bytes())
    .next()
    .map(|(name, _)| name.into_owned())
    .unwrap_or_default()
}
