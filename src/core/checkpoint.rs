//! Checkpoint：按 thread_id 持久化编排状态
//!
//! 状态以 JSON 文本存取，保证「纯结构化记录」的 checkpoint 边界：重新加载后
//! 与保存前逐字节一致。内存实现用于开发与测试，SQLite 实现用于单机持久化。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::error::OrchestratorError;
use crate::core::state::OrchestrationState;

/// Checkpoint 存储：线程键控的状态存取
///
/// 核心假设每个 thread_id 的访问由外层串行化，存储自身只需保证单次读写原子。
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(
        &self,
        thread_id: &str,
        state: &OrchestrationState,
    ) -> Result<(), OrchestratorError>;

    async fn load(&self, thread_id: &str) -> Result<Option<OrchestrationState>, OrchestratorError>;

    async fn delete(&self, thread_id: &str) -> Result<(), OrchestratorError>;
}

fn encode(state: &OrchestrationState) -> Result<String, OrchestratorError> {
    serde_json::to_string(state).map_err(|e| OrchestratorError::CheckpointError(e.to_string()))
}

fn decode(raw: &str) -> Result<OrchestrationState, OrchestratorError> {
    serde_json::from_str(raw).map_err(|e| OrchestratorError::CheckpointError(e.to_string()))
}

/// 内存实现（开发 / 测试）
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    states: RwLock<HashMap<String, String>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        thread_id: &str,
        state: &OrchestrationState,
    ) -> Result<(), OrchestratorError> {
        let encoded = encode(state)?;
        self.states
            .write()
            .await
            .insert(thread_id.to_string(), encoded);
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<OrchestrationState>, OrchestratorError> {
        let states = self.states.read().await;
        states.get(thread_id).map(|raw| decode(raw)).transpose()
    }

    async fn delete(&self, thread_id: &str) -> Result<(), OrchestratorError> {
        self.states.write().await.remove(thread_id);
        Ok(())
    }
}

/// SQLite 实现（单机持久化）
pub struct SqliteCheckpointStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| OrchestratorError::CheckpointError(e.to_string()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| OrchestratorError::CheckpointError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, OrchestratorError> {
        self.conn
            .lock()
            .map_err(|_| OrchestratorError::CheckpointError("connection lock poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(
        &self,
        thread_id: &str,
        state: &OrchestrationState,
    ) -> Result<(), OrchestratorError> {
        let encoded = encode(state)?;
        let now = chrono::Utc::now().timestamp_millis();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO checkpoints (thread_id, state, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(thread_id) DO UPDATE SET state = ?2, updated_at = ?3",
            rusqlite::params![thread_id, encoded, now],
        )
        .map_err(|e| OrchestratorError::CheckpointError(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<OrchestrationState>, OrchestratorError> {
        use rusqlite::OptionalExtension;

        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT state FROM checkpoints WHERE thread_id = ?1",
                [thread_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| OrchestratorError::CheckpointError(e.to_string()))?;
        raw.as_deref().map(decode).transpose()
    }

    async fn delete(&self, thread_id: &str) -> Result<(), OrchestratorError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM checkpoints WHERE thread_id = ?1",
            [thread_id],
        )
        .map_err(|e| OrchestratorError::CheckpointError(e.to_string()))?;
        Ok(())
    }
}
