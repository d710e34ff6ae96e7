//! Append-only journal of every record published on the bus.
//!
//! One JSON object per line, `{timestamp, id, name, data}`, written to
//! `<dir>/<session>_<host>.log`.

use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use seisflow_core::MessageId;
use seisflow_core::sync::lock;
use seisflow_events::{Envelope, MessageBus, Record, SubscriptionHandle, topics};

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub id: MessageId,
    pub name: String,
    pub data: serde_json::Value,
}

impl JournalEntry {
    pub fn from_record(record: &dyn Record) -> Result<Self, seisflow_events::CodecError> {
        let header = record.header();
        Ok(Self {
            timestamp: header.timestamp,
            id: header.id,
            name: record.type_name().to_string(),
            data: record.to_json()?,
        })
    }
}

/// Subscriber writing every record to the session's journal file.
///
/// Dropping the journal unsubscribes it.
#[derive(Debug)]
pub struct MessageJournal {
    path: PathBuf,
    _subscription: SubscriptionHandle,
}

impl MessageJournal {
    /// Open (or append to) the session file under `dir` and start journaling.
    pub fn open(dir: &Path, session: &str, bus: &MessageBus) -> Result<Self, JournalError> {
        fs::create_dir_all(dir).map_err(|source| JournalError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(format!("{session}_{}.log", host_name()));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| JournalError::Io {
                path: path.clone(),
                source,
            })?;
        let writer: Arc<Mutex<LineWriter<File>>> = Arc::new(Mutex::new(LineWriter::new(file)));

        let subscription = bus.subscribe_scoped(topics::BASE, move |envelope: &Envelope<dyn Record>| {
            let entry = JournalEntry::from_record(envelope.payload())?;
            let mut writer = lock(&writer);
            serde_json::to_writer(&mut *writer, &entry)?;
            writer.write_all(b"\n")?;
            Ok(())
        });

        info!(path = %path.display(), "message journal opened");
        Ok(Self {
            path,
            _subscription: subscription,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every entry of a journal file.
    pub fn read_entries(path: &Path) -> Result<Vec<JournalEntry>, JournalError> {
        let content = fs::read_to_string(path).map_err(|source| JournalError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping malformed journal line");
                    None
                }
            })
            .collect())
    }
}

/// Session identifier: process start time, sortable.
pub fn new_session() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3f").to_string()
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
