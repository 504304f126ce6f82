//! # Settings & Cache Repository
//!
//! Generic key-value settings plus a TTL cache with tag-based invalidation.
//! Consumed by external feature-flag/export/email collaborators; cache reads
//! may be stale until expiry but never corrupt.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::debug;

use crate::error::DbResult;
use till_core::CacheEntry;

/// Repository for the settings and cache tables.
#[derive(Debug, Clone)]
pub struct CacheRepository {
    pool: SqlitePool,
}

/// Tags are stored comma-fenced (",a,b,") so a single LIKE matches whole
/// tags without tripping on substrings.
fn fence_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        String::new()
    } else {
        format!(",{},", tags.join(","))
    }
}

fn unfence_tags(fenced: &str) -> Vec<String> {
    fenced
        .split(',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn entry_from_row(row: &SqliteRow) -> DbResult<CacheEntry> {
    let fenced: String = row.try_get("tags")?;
    Ok(CacheEntry {
        key: row.try_get("key")?,
        value: row.try_get("value")?,
        expires_at: row.try_get("expires_at")?,
        tags: unfence_tags(&fenced),
    })
}

impl CacheRepository {
    /// Creates a new CacheRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CacheRepository { pool }
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Gets a setting value.
    pub async fn get_setting(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    /// Creates or overwrites a setting.
    pub async fn put_setting(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Gets a cache entry; an expired entry reads as absent.
    pub async fn cache_get(&self, key: &str, now: DateTime<Utc>) -> DbResult<Option<CacheEntry>> {
        let row = sqlx::query("SELECT key, value, expires_at, tags FROM cache_entries WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let entry = row.as_ref().map(entry_from_row).transpose()?;
        Ok(entry.filter(|e| !e.is_expired(now)))
    }

    /// Creates or overwrites a cache entry. `ttl = None` never expires.
    pub async fn cache_put(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> DbResult<()> {
        let expires_at = ttl.map(|d| {
            Utc::now() + chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
        });

        sqlx::query(
            "INSERT INTO cache_entries (key, value, expires_at, tags) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            expires_at = excluded.expires_at,
                                            tags = excluded.tags",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .bind(fence_tags(tags))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes a cache entry.
    pub async fn cache_delete(&self, key: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes all expired entries; returns how many were swept.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result =
            sqlx::query("DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1")
                .bind(now)
                .execute(&self.pool)
                .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            debug!(swept, "Swept expired cache entries");
        }
        Ok(swept)
    }

    /// Deletes every entry carrying the given tag; returns how many.
    pub async fn invalidate_tag(&self, tag: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE tags LIKE ?1")
            .bind(format!("%,{},%", tag))
            .execute(&self.pool)
            .await?;

        let invalidated = result.rows_affected();
        debug!(tag = %tag, invalidated, "Invalidated cache tag");
        Ok(invalidated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.cache();

        assert_eq!(repo.get_setting("theme").await.unwrap(), None);
        repo.put_setting("theme", "dark").await.unwrap();
        repo.put_setting("theme", "light").await.unwrap();
        assert_eq!(repo.get_setting("theme").await.unwrap().as_deref(), Some("light"));
    }

    #[tokio::test]
    async fn test_cache_ttl() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.cache();
        let now = Utc::now();

        repo.cache_put("k", "\"v\"", Some(Duration::from_secs(60)), &[])
            .await
            .unwrap();
        assert!(repo.cache_get("k", now).await.unwrap().is_some());

        // Expired entries read as absent, then sweep deletes them
        let later = now + chrono::Duration::seconds(120);
        assert!(repo.cache_get("k", later).await.unwrap().is_none());
        assert_eq!(repo.sweep_expired(later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tag_invalidation_matches_whole_tags() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.cache();

        repo.cache_put("a", "1", None, &["exports".into()]).await.unwrap();
        repo.cache_put("b", "2", None, &["exports".into(), "flags".into()])
            .await
            .unwrap();
        repo.cache_put("c", "3", None, &["export".into()]).await.unwrap();

        // "export" must not match entries tagged "exports"
        assert_eq!(repo.invalidate_tag("exports").await.unwrap(), 2);
        assert!(repo.cache_get("c", Utc::now()).await.unwrap().is_some());
    }
}
