use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chatrelay_db::Database;
use chrono::Utc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Per-tenant media storage rooted at `root/<org_id>/`. Every path
/// resolution rejects `..` components and re-checks the canonicalized
/// result against the tenant's root, so a maliciously-crafted filename
/// (from an inbound media attachment's reported name) can never read or
/// delete outside its own org's directory.
///
/// Auto-deletion is opt-in per org (`OrganizationSettings.auto_delete_media_enabled`,
/// default `false`, `auto_delete_media_days` default 30) — a directory
/// whose name isn't a recognized org id, or whose org has auto-delete
/// off, is left untouched by [`sweep_once`].
pub struct MediaStore {
    root: PathBuf,
    db: Arc<dyn Database>,
}

impl MediaStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, db: Arc<dyn Database>) -> Self {
        Self { root: root.into(), db }
    }

    fn org_dir(&self, org_id: &str) -> PathBuf {
        self.root.join(org_id)
    }

    /// Resolves `relative_path` under `org_id`'s directory, rejecting any
    /// path that contains a `..` component or that canonicalizes outside
    /// the tenant's root.
    pub async fn resolve(&self, org_id: &str, relative_path: &str) -> Result<PathBuf> {
        if Path::new(relative_path)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::PathTraversal(relative_path.to_string()));
        }

        let org_dir = self.org_dir(org_id);
        fs::create_dir_all(&org_dir).await?;

        let candidate = org_dir.join(relative_path);
        let canonical_org_dir = fs::canonicalize(&org_dir).await?;

        // The file may not exist yet (a fresh upload); canonicalize its
        // parent instead and re-attach the file name.
        let canonical_parent = match fs::canonicalize(candidate.parent().unwrap_or(&org_dir)).await {
            Ok(parent) => parent,
            Err(_) => return Err(Error::PathTraversal(relative_path.to_string())),
        };

        if !canonical_parent.starts_with(&canonical_org_dir) {
            return Err(Error::PathTraversal(relative_path.to_string()));
        }

        Ok(canonical_parent.join(
            candidate
                .file_name()
                .ok_or_else(|| Error::PathTraversal(relative_path.to_string()))?,
        ))
    }

    pub async fn write(&self, org_id: &str, relative_path: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.resolve(org_id, relative_path).await?;
        fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Deletes every file under each tenant directory whose modified time
    /// is older than that tenant's `auto_delete_media_days`, but only for
    /// tenants with `auto_delete_media_enabled` set — disabled (the
    /// default) or unresolvable orgs are skipped entirely. Runs once; the
    /// caller loops this on an interval.
    pub async fn sweep_once(&self) -> Result<u64> {
        let mut deleted = 0u64;
        let mut org_dirs = match fs::read_dir(&self.root).await {
            Ok(dirs) => dirs,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        while let Some(org_entry) = org_dirs.next_entry().await? {
            if !org_entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(ttl) = self.tenant_ttl(&org_entry).await else {
                continue;
            };

            let mut files = fs::read_dir(org_entry.path()).await?;
            while let Some(file_entry) = files.next_entry().await? {
                if Self::is_expired(&file_entry, ttl).await? {
                    match fs::remove_file(file_entry.path()).await {
                        Ok(()) => deleted += 1,
                        Err(err) => warn!(path = ?file_entry.path(), %err, "failed to remove expired media file"),
                    }
                }
            }
        }

        if deleted > 0 {
            info!(deleted, "media sweep removed expired files");
        }
        Ok(deleted)
    }

    /// Resolves the org directory's name to an org id and looks up its
    /// auto-delete setting. Returns `None` when the directory isn't a
    /// valid org id, the org has no settings row, or auto-delete is off
    /// — any of which means this run skips the directory untouched.
    async fn tenant_ttl(&self, org_entry: &tokio::fs::DirEntry) -> Option<Duration> {
        let name = org_entry.file_name();
        let org_id = Uuid::parse_str(name.to_str()?).ok()?;
        let settings = self.db.get_organization_settings(org_id).await.ok()?;
        if !settings.auto_delete_media_enabled {
            return None;
        }
        Some(Duration::from_secs(u64::try_from(settings.auto_delete_media_days).unwrap_or(30) * SECS_PER_DAY))
    }

    async fn is_expired(entry: &tokio::fs::DirEntry, ttl: Duration) -> Result<bool> {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            return Ok(false);
        }
        let modified = metadata.modified()?;
        let age = modified.elapsed().unwrap_or_default();
        Ok(age > ttl)
    }

    /// Runs [`sweep_once`] on an interval until `cancel` fires.
    pub async fn run_sweep_loop(&self, interval: Duration, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(err) = self.sweep_once().await {
                warn!(%err, "media sweep failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                () = cancel.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chatrelay_db::{InMemoryDatabase, entities::OrganizationSettings};

    use super::*;

    fn store(db: InMemoryDatabase, dir: &tempfile::TempDir) -> MediaStore {
        MediaStore::new(dir.path(), Arc::new(db))
    }

    fn enable_auto_delete(db: &InMemoryDatabase, org_id: Uuid, days: i32) {
        db.seed_org_settings(OrganizationSettings {
            org_id,
            business_hours: serde_json::json!({}),
            default_transfer_strategy: chatrelay_db::entities::TransferStrategy::RoundRobin,
            automation_enabled: true,
            ai_enabled: false,
            default_fallback_reply: None,
            session_idle_minutes: 30,
            auto_delete_media_enabled: true,
            auto_delete_media_days: days,
            webhook_retry_schedule: None,
        });
    }

    #[tokio::test]
    async fn rejects_parent_dir_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(InMemoryDatabase::new(), &dir);
        let result = store.resolve("org1", "../../etc/passwd").await;
        assert!(matches!(result, Err(Error::PathTraversal(_))));
    }

    #[tokio::test]
    async fn writes_stay_within_org_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(InMemoryDatabase::new(), &dir);
        let path = store.write("org1", "photo.jpg", b"data").await.unwrap();
        assert!(path.starts_with(dir.path().join("org1")));
    }

    #[tokio::test]
    async fn sweep_skips_org_with_auto_delete_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let org_id = Uuid::new_v4();
        let db = InMemoryDatabase::new();
        let store = store(db, &dir);
        store.write(&org_id.to_string(), "old.jpg", b"data").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let deleted = store.sweep_once().await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn sweep_removes_expired_files_for_enabled_org() {
        let dir = tempfile::tempdir().unwrap();
        let org_id = Uuid::new_v4();
        let db = InMemoryDatabase::new();
        enable_auto_delete(&db, org_id, 0);
        let store = store(db, &dir);
        store.write(&org_id.to_string(), "old.jpg", b"data").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let deleted = store.sweep_once().await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_files_within_retention_window() {
        let dir = tempfile::tempdir().unwrap();
        let org_id = Uuid::new_v4();
        let db = InMemoryDatabase::new();
        enable_auto_delete(&db, org_id, 30);
        let store = store(db, &dir);
        store.write(&org_id.to_string(), "fresh.jpg", b"data").await.unwrap();

        let deleted = store.sweep_once().await.unwrap();
        assert_eq!(deleted, 0);
    }
}
