//! Append-only chat log
//!
//! One line per relayed event: `<RFC 3339 local timestamp> <text>`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::info;

use crate::error::Result;

pub struct ChatLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ChatLog {
    /// Open for appending, creating the file and its directory if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a line to the log only
    pub fn record(&self, text: &str) -> Result<()> {
        let line = format!("{} {}\n", Local::now().to_rfc3339(), text);
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Write a line to the log and show it on the operator console
    pub fn announce(&self, text: &str) -> Result<()> {
        info!("{}", text);
        self.record(text)
    }
}
