//! Durable per-player records.
//!
//! Each steam ID gets one `<steamID>.dat` file of `key=value` lines. Writes
//! go to a `.tmp` sibling first and are renamed over the target, so a reader
//! never sees a half-written record.
//!
//! Values are escaped (`\\`, `\n`, `\r`) so a field can never spill into
//! the next line.

use crate::error::ServerError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Fields persisted after every object snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerRecord {
    pub player_name: String,
    pub last_ip: String,
    pub last_pos: Option<String>,
    pub last_rot: Option<String>,
    pub objects: Option<String>,
    pub updated: String,
}

impl PlayerRecord {
    fn render(&self) -> String {
        let mut out = String::new();
        let fields = [
            ("playerName", Some(&self.player_name)),
            ("lastIp", Some(&self.last_ip)),
            ("lastPos", self.last_pos.as_ref()),
            ("lastRot", self.last_rot.as_ref()),
            ("objects", self.objects.as_ref()),
            ("updated", Some(&self.updated)),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                out.push_str(key);
                out.push('=');
                escape_into(&mut out, value);
                out.push('\n');
            }
        }
        out
    }
}

fn escape_into(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
}

fn unescape(value: &str) -> String {
    if !value.contains('\\') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct PlayerDataStore {
    root: PathBuf,
}

impl PlayerDataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, steam_id: &str) -> PathBuf {
        self.root.join(format!("{}.dat", file_stem(steam_id)))
    }

    /// Write a record, replacing any previous one atomically.
    pub async fn write(&self, steam_id: &str, record: &PlayerRecord) -> Result<(), ServerError> {
        fs::create_dir_all(&self.root).await?;
        let target = self.path_for(steam_id);
        let tmp = self.root.join(format!("{}.tmp", file_stem(steam_id)));

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(record.render().as_bytes()).await?;
        file.flush().await?;
        drop(file);

        fs::rename(&tmp, &target).await?;
        Ok(())
    }

    /// Read a record as raw `key -> value` pairs. `None` if no record exists.
    pub async fn read(&self, steam_id: &str) -> Result<Option<HashMap<String, String>>, ServerError> {
        let contents = match fs::read_to_string(self.path_for(steam_id)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(
            contents
                .lines()
                .filter_map(|line| line.split_once('='))
                .map(|(k, v)| (k.to_string(), unescape(v)))
                .collect(),
        ))
    }
}

/// Steam IDs come straight off the wire; keep them inside the data root.
fn file_stem(steam_id: &str) -> String {
    steam_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
