#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;

use std::path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::models::ChatMessage;

pub const STORAGE_KEY: &str = "lechatpp.messages.v1";

/// Durable cache of the last conversation. Never fatal: failures are logged
/// and behave like "nothing stored".
#[async_trait]
pub trait Persistence {
    async fn load(&self) -> Option<Vec<ChatMessage>>;
    async fn save(&self, messages: &[ChatMessage]);
    async fn clear(&self);
}

pub type PersistenceBox = Arc<dyn Persistence + Send + Sync>;

/// One JSON record under the data directory. Operations are serialized and
/// a write is only visible once it has been fully flushed.
pub struct FilePersistence {
    pub data_dir: path::PathBuf,
    io_lock: Mutex<()>,
}

impl FilePersistence {
    pub fn new(data_dir: path::PathBuf) -> FilePersistence {
        return FilePersistence {
            data_dir,
            io_lock: Mutex::new(()),
        };
    }

    pub fn file_path(&self) -> path::PathBuf {
        return self.data_dir.join(format!("{STORAGE_KEY}.json"));
    }

    async fn read(&self) -> Result<Option<Vec<ChatMessage>>> {
        let file_path = self.file_path();
        if !file_path.exists() {
            return Ok(None);
        }

        let payload = fs::read_to_string(file_path).await?;
        let messages: Vec<ChatMessage> = serde_json::from_str(&payload)?;

        return Ok(Some(messages));
    }

    async fn write(&self, messages: &[ChatMessage]) -> Result<()> {
        let payload = serde_json::to_string(messages)?;

        if !self.data_dir.exists() {
            fs::create_dir_all(&self.data_dir).await?;
        }

        let tmp_path = self.data_dir.join(format!("{STORAGE_KEY}.json.tmp"));
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(payload.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, self.file_path()).await?;

        return Ok(());
    }

    async fn remove(&self) -> Result<()> {
        let file_path = self.file_path();
        if !file_path.exists() {
            return Ok(());
        }

        fs::remove_file(file_path).await?;
        return Ok(());
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    async fn load(&self) -> Option<Vec<ChatMessage>> {
        let _guard = self.io_lock.lock().await;
        match self.read().await {
            Ok(messages) => return messages,
            Err(err) => {
                tracing::warn!(error = ?err, "Failed to read persisted messages");
                return None;
            }
        }
    }

    async fn save(&self, messages: &[ChatMessage]) {
        let _guard = self.io_lock.lock().await;
        if let Err(err) = self.write(messages).await {
            tracing::warn!(error = ?err, "Failed to persist messages");
        }
    }

    async fn clear(&self) {
        let _guard = self.io_lock.lock().await;
        if let Err(err) = self.remove().await {
            tracing::warn!(error = ?err, "Failed to clear persisted messages");
        }
    }
}

/// Keeps the record in process.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryPersistence {
    record: Mutex<Option<Vec<ChatMessage>>>,
}

#[cfg(test)]
impl MemoryPersistence {
    pub async fn stored(&self) -> Option<Vec<ChatMessage>> {
        return self.record.lock().await.clone();
    }
}

#[cfg(test)]
#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self) -> Option<Vec<ChatMessage>> {
        return self.stored().await;
    }

    async fn save(&self, messages: &[ChatMessage]) {
        *self.record.lock().await = Some(messages.to_vec());
    }

    async fn clear(&self) {
        *self.record.lock().await = None;
    }
}
