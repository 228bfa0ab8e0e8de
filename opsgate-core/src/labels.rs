//! Exact-match label selection.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An exact-match-all label selector: every key/value pair must match.
///
/// This is the selection model list screens use; set-based expressions are
/// out of scope for the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selector(BTreeMap<String, String>);

impl Selector {
    /// Selector from an existing map of required pairs.
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    /// Selector from UI-entered key/value rows.
    ///
    /// Keys and values are trimmed; a duplicate key after trimming is a
    /// validation error rather than silent last-write-wins.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            let key = k.as_ref().trim().to_string();
            let value = v.as_ref().trim().to_string();
            if key.is_empty() {
                return Err(Error::Validation("label key must not be empty".into()));
            }
            if map.insert(key.clone(), value).is_some() {
                return Err(Error::Validation(format!("duplicate label key {key:?}")));
            }
        }
        Ok(Self(map))
    }

    /// Parse the `key=value,key2=value2` wire form.
    pub fn parse(selector: &str) -> Result<Self> {
        let mut map = BTreeMap::new();
        for part in selector.split(',').filter(|p| !p.trim().is_empty()) {
            let (k, v) = part
                .split_once('=')
                .ok_or_else(|| Error::Validation(format!("invalid selector segment {part:?}")))?;
            let key = k.trim().to_string();
            if key.is_empty() {
                return Err(Error::Validation(format!("invalid selector segment {part:?}")));
            }
            if map.insert(key.clone(), v.trim().to_string()).is_some() {
                return Err(Error::Validation(format!("duplicate label key {key:?}")));
            }
        }
        Ok(Self(map))
    }

    /// True when the selector matches everything.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the given labels satisfy every required pair.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
    }

    /// The wire form sent to the cluster as a `labelSelector`.
    pub fn to_selector_string(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Borrow the underlying required pairs.
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_selector_string())
    }
}
