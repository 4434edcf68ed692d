//! File-backed protection store
//!
//! Layout under the data directory:
//! - `positions.json`: every position, rewritten whole through a temp file
//!   and rename so a crash never leaves a torn file
//! - `audit.jsonl`: one `AuditEvent` per line, append only
//! - `samples.jsonl`: one `{token_mint, sample}` per line, append only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::{PositionKey, ProtectedPosition, VelocitySample};
use crate::ports::store::{AuditEvent, ProtectionStore, StoreError};

const POSITIONS_FILE: &str = "positions.json";
const AUDIT_FILE: &str = "audit.jsonl";
const SAMPLES_FILE: &str = "samples.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct SampleRecord {
    token_mint: String,
    sample: VelocitySample,
}

pub struct JsonFileStore {
    dir: PathBuf,
    positions: Mutex<BTreeMap<PositionKey, ProtectedPosition>>,
    /// Serializes appends so lines never interleave
    append_lock: Mutex<()>,
}

fn io_err(context: &str, path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{} {}: {}", context, path.display(), e))
}

impl JsonFileStore {
    /// Open (or create) the store in `dir` and load existing positions
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err("create", &dir, e))?;

        let path = dir.join(POSITIONS_FILE);
        let positions = match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => {
                let list: Vec<ProtectedPosition> =
                    serde_json::from_str(&content).map_err(|e| StoreError::Serialization(e.to_string()))?;
                list.into_iter().map(|p| (p.key(), p)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(io_err("read", &path, e)),
        };

        tracing::info!("📂 Store opened at {} ({} positions)", dir.display(), positions.len());
        Ok(Self {
            dir,
            positions: Mutex::new(positions),
            append_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_positions(&self, positions: &BTreeMap<PositionKey, ProtectedPosition>) -> Result<(), StoreError> {
        let list: Vec<&ProtectedPosition> = positions.values().collect();
        let content = serde_json::to_string_pretty(&list).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let path = self.dir.join(POSITIONS_FILE);
        let tmp = self.dir.join(format!("{}.tmp", POSITIONS_FILE));
        fs::write(&tmp, content).await.map_err(|e| io_err("write", &tmp, e))?;
        fs::rename(&tmp, &path).await.map_err(|e| io_err("rename", &path, e))?;
        Ok(())
    }

    async fn append_line<T: Serialize>(&self, file: &str, record: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        line.push('\n');

        let path = self.dir.join(file);
        let _guard = self.append_lock.lock().await;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_err("open", &path, e))?;
        f.write_all(line.as_bytes()).await.map_err(|e| io_err("append", &path, e))?;
        f.flush().await.map_err(|e| io_err("flush", &path, e))?;
        Ok(())
    }

    /// Every known position, active or not
    pub async fn all_positions(&self) -> Vec<ProtectedPosition> {
        self.positions.lock().await.values().cloned().collect()
    }

    /// Last `limit` audit events, oldest first. Unparseable lines are skipped.
    pub async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEvent>, StoreError> {
        let path = self.dir.join(AUDIT_FILE);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err("read", &path, e)),
        };
        let events: Vec<AuditEvent> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let skip = events.len().saturating_sub(limit);
        Ok(events.into_iter().skip(skip).collect())
    }
}

#[async_trait]
impl ProtectionStore for JsonFileStore {
    async fn upsert_position(&self, position: &ProtectedPosition) -> Result<(), StoreError> {
        let mut positions = self.positions.lock().await;
        let previous = positions.insert(position.key(), position.clone());
        if let Err(e) = self.write_positions(&positions).await {
            // Keep memory consistent with disk
            match previous {
                Some(p) => positions.insert(p.key(), p),
                None => positions.remove(&position.key()),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn get_position(&self, token_mint: &str, wallet: &str) -> Result<Option<ProtectedPosition>, StoreError> {
        Ok(self
            .positions
            .lock()
            .await
            .get(&PositionKey::new(token_mint, wallet))
            .cloned())
    }

    async fn get_active_positions_for_token(&self, token_mint: &str) -> Result<Vec<ProtectedPosition>, StoreError> {
        Ok(self
            .positions
            .lock()
            .await
            .values()
            .filter(|p| p.token_mint == token_mint && p.is_active)
            .cloned()
            .collect())
    }

    async fn list_active_positions(&self) -> Result<Vec<ProtectedPosition>, StoreError> {
        Ok(self
            .positions
            .lock()
            .await
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.append_line(AUDIT_FILE, event).await
    }

    async fn append_velocity_sample(&self, token_mint: &str, sample: &VelocitySample) -> Result<(), StoreError> {
        let record = SampleRecord {
            token_mint: token_mint.to_string(),
            sample: *sample,
        };
        self.append_line(SAMPLES_FILE, &record).await
    }
}
