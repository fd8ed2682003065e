//! Deploy metadata tags.
//!
//! Backends record the deployed version and the last-change time as
//! resource tags keyed by module name. Compute nodes and addresses carry
//! unprefixed tags of the same shape.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag value layout for timestamps.
pub const TAG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const DEPLOY_VERSION: &str = "Deploy Version";
pub const LAST_CHANGE: &str = "Last Change DateTime";
pub const MODULE: &str = "Module";
pub const NAME: &str = "Name";

/// A key/value resource tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Tag key holding a module's deployed version on a backend resource.
pub fn version_key(module: &str) -> String {
    format!("{module}:{DEPLOY_VERSION}")
}

/// Tag key holding a module's last-change time on a backend resource.
pub fn last_change_key(module: &str) -> String {
    format!("{module}:{LAST_CHANGE}")
}

pub fn format_time(at: DateTime<Utc>) -> String {
    at.format(TAG_TIME_FORMAT).to_string()
}

/// Parse a tag timestamp. Unparseable values are treated as absent.
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), TAG_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Value of the first tag with `key`.
pub fn find<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.key == key)
        .map(|t| t.value.as_str())
        .filter(|v| !v.is_empty())
}

/// Keys to drop and tags to write when refreshing deploy metadata.
///
/// The last-change time is always rewritten; the version only when given.
pub fn metadata_update(
    module: &str,
    version: Option<&str>,
    now: DateTime<Utc>,
) -> (Vec<String>, Vec<Tag>) {
    let mut remove = vec![last_change_key(module)];
    let mut add = vec![Tag::new(last_change_key(module), format_time(now))];

    if let Some(version) = version {
        remove.push(version_key(module));
        add.push(Tag::new(version_key(module), version));
    }

    (remove, add)
}
