//! Autoscale cooldown markers.
//!
//! One file per action class holds the unix time of the last successful
//! action. Reads and writes are not atomic across processes; the
//! autoscaler is expected to run from one scheduled invocation at a time.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::StateResult;

/// Throttled autoscale action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    /// Vertical scale-up.
    ScaleUp,
    /// Any size reduction: scale-down or scale-in.
    ScaleSmall,
}

impl ActionClass {
    fn marker_name(self) -> &'static str {
        match self {
            ActionClass::ScaleUp => "scale-up",
            ActionClass::ScaleSmall => "scale-small",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CooldownStore {
    dir: PathBuf,
    module: String,
}

impl CooldownStore {
    pub fn new(dir: impl Into<PathBuf>, module: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            module: module.into(),
        }
    }

    pub fn marker_path(&self, class: ActionClass) -> PathBuf {
        self.dir
            .join(format!("fleetops-{}-{}.flag", self.module, class.marker_name()))
    }

    /// Time of the last recorded action. A missing or unreadable marker
    /// means the action never ran.
    pub fn last(&self, class: ActionClass) -> StateResult<Option<DateTime<Utc>>> {
        let path = self.marker_path(class);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_marker(&path, &content))
    }

    pub fn record(&self, class: ActionClass, at: DateTime<Utc>) -> StateResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.marker_path(class);
        fs::write(&path, at.timestamp().to_string())?;
        debug!(path = %path.display(), at = %at, "cooldown marker written");
        Ok(())
    }

    /// Whether strictly more than `window` has passed since the last action.
    pub fn elapsed(
        &self,
        class: ActionClass,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StateResult<bool> {
        let Some(last) = self.last(class)? else {
            return Ok(true);
        };
        let since = (now - last).num_seconds();
        Ok(since > window.as_secs() as i64)
    }
}

fn parse_marker(path: &Path, content: &str) -> Option<DateTime<Utc>> {
    let parsed = content
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    if parsed.is_none() {
        warn!(path = %path.display(), "ignoring malformed cooldown marker");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn missing_marker_has_elapsed() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::new(dir.path(), "api");
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(store.last(ActionClass::ScaleUp).unwrap(), None);
        assert!(store.elapsed(ActionClass::ScaleUp, Duration::from_secs(300), now).unwrap());
    }

    #[test]
    fn window_is_strict() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::new(dir.path(), "api");
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        store.record(ActionClass::ScaleUp, at).unwrap();

        let window = Duration::from_secs(300);
        let exactly = at + chrono::Duration::seconds(300);
        let after = at + chrono::Duration::seconds(301);
        assert!(!store.elapsed(ActionClass::ScaleUp, window, exactly).unwrap());
        assert!(store.elapsed(ActionClass::ScaleUp, window, after).unwrap());
    }

    #[test]
    fn classes_use_separate_markers() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::new(dir.path(), "api");
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        store.record(ActionClass::ScaleSmall, at).unwrap();

        assert_eq!(store.last(ActionClass::ScaleUp).unwrap(), None);
        assert_eq!(store.last(ActionClass::ScaleSmall).unwrap(), Some(at));
        assert!(store
            .marker_path(ActionClass::ScaleSmall)
            .ends_with("fleetops-api-scale-small.flag"));
    }

    #[test]
    fn malformed_marker_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::new(dir.path(), "api");
        fs::write(store.marker_path(ActionClass::ScaleUp), "garbage").unwrap();
        assert_eq!(store.last(ActionClass::ScaleUp).unwrap(), None);
    }
}
