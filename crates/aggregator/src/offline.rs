use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::Track;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};

use crate::error::OfflineError;

const OFFLINE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("offline_tracks");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfflineState {
    Pending,
    Complete,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfflineEntry {
    pub track: Track,
    pub state: OfflineState,
    pub local_path: Option<String>,
    pub updated_at: u64,
}

/// Tracks downloaded for playback without their provider.
#[derive(Clone)]
pub struct OfflineOverlay {
    db: Arc<Database>,
}

impl OfflineOverlay {
    pub fn open(path: &Path) -> Result<Self, OfflineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        let overlay = Self { db: Arc::new(db) };
        overlay.init_tables()?;
        Ok(overlay)
    }

    fn init_tables(&self) -> Result<(), OfflineError> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(OFFLINE_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn mark_pending(&self, track: Track) -> Result<(), OfflineError> {
        let entry = OfflineEntry {
            track,
            state: OfflineState::Pending,
            local_path: None,
            updated_at: now_millis(),
        };
        self.put(&entry)
    }

    /// Returns false when the track was never marked pending.
    pub fn mark_complete(
        &self,
        provider_id: &str,
        track_id: &str,
        local_path: &str,
    ) -> Result<bool, OfflineError> {
        let mut entry = match self.get(provider_id, track_id)? {
            Some(entry) => entry,
            None => return Ok(false),
        };
        entry.state = OfflineState::Complete;
        entry.local_path = Some(local_path.to_string());
        entry.updated_at = now_millis();
        self.put(&entry)?;
        Ok(true)
    }

    pub fn remove(&self, provider_id: &str, track_id: &str) -> Result<bool, OfflineError> {
        let key = entry_key(provider_id, track_id);
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(OFFLINE_TABLE)?;
            let removed = table.remove(key.as_str())?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn get(
        &self,
        provider_id: &str,
        track_id: &str,
    ) -> Result<Option<OfflineEntry>, OfflineError> {
        let key = entry_key(provider_id, track_id);
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(OFFLINE_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry = match table.get(key.as_str())? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(entry)
    }

    pub fn is_complete(&self, provider_id: &str, track_id: &str) -> Result<bool, OfflineError> {
        Ok(self
            .get(provider_id, track_id)?
            .map(|entry| entry.state == OfflineState::Complete)
            .unwrap_or(false))
    }

    pub fn entries(&self) -> Result<Vec<OfflineEntry>, OfflineError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(OFFLINE_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            items.push(decode_value(entry.1.value())?);
        }
        Ok(items)
    }

    pub fn completed_tracks(&self) -> Result<Vec<Track>, OfflineError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| entry.state == OfflineState::Complete)
            .map(|entry| entry.track)
            .collect())
    }

    fn put(&self, entry: &OfflineEntry) -> Result<(), OfflineError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(OFFLINE_TABLE)?;
            let bytes = encode_value(entry)?;
            let provider_id = entry
                .track
                .provider
                .as_ref()
                .map(|provider| provider.id.as_str())
                .unwrap_or_default();
            let key = entry_key(provider_id, &entry.track.id);
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// Track ids are relative-path hashes, so two providers can share one.
fn entry_key(provider_id: &str, track_id: &str) -> String {
    format!("{}\x1f{}", provider_id, track_id)
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, OfflineError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, OfflineError> {
    Ok(bincode::deserialize(bytes)?)
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}
