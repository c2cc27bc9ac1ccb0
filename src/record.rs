//! Plain-text record files: TOML front matter over a Markdown body.
//!
//! Every durable record (tasks, decisions, knowledge documents) uses the
//! same layout so auditors can read and diff them directly:
//!
//! ```text
//! +++
//! id = "TASK-..."
//! status = "in_progress"
//! +++
//!
//! # Title
//!
//! ## Section
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;
use uuid::Uuid;

const DELIMITER: &str = "+++";
const CONTINUATION: &str = "  ";

/// Split a record into its front matter and body.
///
/// Returns `None` when the text does not open with a `+++` block.
pub fn split_front_matter(text: &str) -> Option<(String, String)> {
    let text = text.replace("\r\n", "\n");
    let rest = text.strip_prefix(DELIMITER)?.strip_prefix('\n')?;

    let mut meta = String::new();
    let mut lines = rest.split_inclusive('\n');
    for line in lines.by_ref() {
        if line.trim_end() == DELIMITER {
            let body: String = lines.collect();
            return Some((meta, body));
        }
        meta.push_str(line);
    }
    None
}

pub fn join_front_matter(meta: &str, body: &str) -> String {
    let mut out = String::with_capacity(meta.len() + body.len() + 16);
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(meta);
    if !meta.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(DELIMITER);
    out.push_str("\n\n");
    out.push_str(body);
    out
}

/// Write `contents` to `path` via a synced temp file and a rename, so
/// readers only ever observe a complete record.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.sync_all()?;
    drop(tmp);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}

/// Render multi-line text as a list-item payload: the first line as is,
/// later lines indented so they stay attached to the item.
pub fn fold(text: &str) -> String {
    let mut lines = text.split('\n');
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines {
        out.push('\n');
        out.push_str(CONTINUATION);
        out.push_str(line);
    }
    out
}

/// Collect `- ` list items from a section, re-joining folded lines.
pub fn list_items(section: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for line in section.lines() {
        if let Some(item) = line.strip_prefix("- ") {
            items.push(item.to_string());
        } else if let Some(more) = line.strip_prefix(CONTINUATION) {
            if let Some(last) = items.last_mut() {
                last.push('\n');
                last.push_str(more);
            }
        }
    }
    items
}

/// Split a Markdown body into `## heading` sections.
///
/// Only headings named in `known` start a section, so free text that
/// happens to contain `## ` stays inside its section. Section content is
/// returned without surrounding blank lines.
pub fn sections<'a>(body: &str, known: &[&'a str]) -> Vec<(&'a str, String)> {
    let mut out: Vec<(&'a str, Vec<&str>)> = Vec::new();
    for line in body.lines() {
        let heading = line
            .strip_prefix("## ")
            .and_then(|h| known.iter().find(|k| **k == h.trim()).copied());
        match heading {
            Some(name) => out.push((name, Vec::new())),
            None => {
                if let Some((_, lines)) = out.last_mut() {
                    lines.push(line);
                }
            }
        }
    }
    out.into_iter()
        .map(|(name, lines)| (name, lines.join("\n").trim_matches('\n').to_string()))
        .collect()
}

/// Prefix a backslash to every line of `text` that would otherwise read
/// as one of the `known` headings, so free text stays in its section.
pub fn escape_headings(text: &str, known: &[&str]) -> String {
    text.split('\n')
        .map(|line| {
            if reads_as_heading(line, known) {
                format!("\\{}", line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Inverse of [`escape_headings`].
pub fn unescape_headings(text: &str, known: &[&str]) -> String {
    text.split('\n')
        .map(|line| match line.strip_prefix('\\') {
            Some(rest) if reads_as_heading(line, known) => rest,
            _ => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A known heading behind any number of backslashes.
fn reads_as_heading(line: &str, known: &[&str]) -> bool {
    line.trim_start_matches('\\')
        .strip_prefix("## ")
        .is_some_and(|h| known.contains(&h.trim()))
}

/// Content of the named section, or an empty string.
pub fn section(body: &str, known: &[&str], name: &str) -> String {
    sections(body, known)
        .into_iter()
        .find(|(n, _)| *n == name)
        .map(|(_, content)| content)
        .unwrap_or_default()
}

/// Exclusive advisory lock on a lock file, released when dropped.
///
/// Serializes writers of one record across threads and processes.
pub struct RecordLock {
    file: File,
}

impl RecordLock {
    pub fn acquire(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
