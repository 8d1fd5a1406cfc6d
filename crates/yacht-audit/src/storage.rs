//! Audit storage backends.
//!
//! Storage is append-only: events are written and never read back, except by
//! [`MemoryStorage`] which keeps them for inspection.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::AuditError;
use crate::event::AuditEvent;

/// Destination for audit events.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Append an audit event.
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Console storage: human-readable lines on stdout.
#[derive(Debug, Default)]
pub struct ConsoleStorage;

impl ConsoleStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditStorage for ConsoleStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        println!("{}", event.to_log_line());
        Ok(())
    }
}

/// File storage: one JSON object per line, appended.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileStorage {
    /// Open (or create) the audit file, creating parent directories.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                AuditError::InitializationFailed(format!("cannot open {}: {e}", path.display()))
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditStorage for FileStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        // A poisoned lock only means another writer panicked mid-append.
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// File plus console.
#[derive(Debug)]
pub struct DualStorage {
    file: FileStorage,
    console: ConsoleStorage,
}

impl DualStorage {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        Ok(Self {
            file: FileStorage::new(path)?,
            console: ConsoleStorage::new(),
        })
    }
}

#[async_trait]
impl AuditStorage for DualStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.console.store(event.clone()).await?;
        self.file.store(event).await
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullStorage;

impl NullStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditStorage for NullStorage {
    async fn store(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Keeps events in memory. Used by tests and the offline `explain` command.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored event, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditStorage for MemoryStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditEventType;

    #[tokio::test]
    async fn test_console_storage() {
        let storage = ConsoleStorage::new();
        let event = AuditEvent::new(AuditEventType::SessionOpened, "wordpress");
        storage.store(event).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_storage_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");
        let storage = FileStorage::new(&path).unwrap();

        storage
            .store(AuditEvent::new(AuditEventType::SessionOpened, "a"))
            .await
            .unwrap();
        storage
            .store(AuditEvent::new(AuditEventType::SessionClosed, "a"))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let events: Vec<AuditEvent> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, AuditEventType::SessionClosed);

        // Reopening appends rather than truncating.
        let reopened = FileStorage::new(&path).unwrap();
        reopened
            .store(AuditEvent::new(AuditEventType::MooringChanged, "operator"))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage
            .store(AuditEvent::new(AuditEventType::PolicyReloaded, "operator"))
            .await
            .unwrap();
        assert_eq!(storage.events().len(), 1);
    }
}
