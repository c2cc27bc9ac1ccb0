//! Shared utility functions.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::task::spawn_blocking;
use uuid::Uuid;

use crate::{Error, Result};

/// Run synchronous file-backed work off the async executor.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Build `<PREFIX>-<yyyymmdd>T<hhmmssmmm>-<6 hex>`.
///
/// The timestamp leads so ids sort by creation time; the random suffix
/// keeps ids unique when two are minted in the same millisecond or the
/// clock steps backwards.
pub fn timestamped_id(prefix: &str, now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, now.format("%Y%m%dT%H%M%S%3f"), &random[..6])
}

pub fn is_timestamped_id(prefix: &str, candidate: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Z]+)-\d{8}T\d{9}-[0-9a-f]{6}$").expect("id pattern is valid")
    });
    pattern
        .captures(candidate)
        .and_then(|caps| caps.get(1))
        .is_some_and(|p| p.as_str() == prefix)
}
