//! Repository for cache entry rows.
//!
//! The usage engine only reads the padding column back (as a sum). Inserting
//! and deleting entries is here so that the write-commit path and the tests
//! can produce real padding totals.

use crate::Database;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::SqlitePool;

/// A cache entry about to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub request_url: String,
    /// Identifier of the body blob in the morgue, if the response had a body.
    pub response_body_id: Option<String>,
    /// Padding assigned to an opaque response; `None` for everything else.
    pub padding_size: Option<u64>,
}
impl NewEntry {
    pub fn new(request_url: impl Into<String>) -> Self {
        Self {
            request_url: request_url.into(),
            response_body_id: None,
            padding_size: None,
        }
    }

    pub fn with_body(mut self, body_id: impl Into<String>) -> Self {
        self.response_body_id = Some(body_id.into());
        self
    }

    pub fn with_padding(mut self, padding_size: u64) -> Self {
        self.padding_size = Some(padding_size);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    fn padding_to_column(padding_size: Option<u64>) -> Result<Option<i64>> {
        padding_size
            .map(|size| i64::try_from(size).or_raise(|| ErrorKind::InvalidData("padding size exceeds i64::MAX")))
            .transpose()
    }

    fn padding_from_column(padding_size: i64) -> Result<u64> {
        u64::try_from(padding_size).or_raise(|| ErrorKind::InvalidData("negative padding size"))
    }

    /// Sum of the padding sizes of every entry.
    ///
    /// This is the authoritative padding total for the origin. An empty
    /// store sums to zero.
    pub async fn overall_padding_size(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar(include_str!("../queries/overall_padding_size.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Self::padding_from_column(total)
    }

    /// Insert an entry, returning its row id.
    pub async fn insert_entry(&self, entry: &NewEntry) -> Result<i64> {
        let padding = Self::padding_to_column(entry.padding_size)?;
        sqlx::query_scalar(include_str!("../queries/insert_entry.sql"))
            .bind(&entry.request_url)
            .bind(entry.response_body_id.as_deref())
            .bind(padding)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Delete an entry.
    ///
    /// Returns `None` if no such entry exists, otherwise the padding the
    /// entry carried (zero for unpadded entries).
    pub async fn delete_entry(&self, id: i64) -> Result<Option<u64>> {
        let deleted: Option<Option<i64>> = sqlx::query_scalar(include_str!("../queries/delete_entry.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        match deleted {
            None => Ok(None),
            Some(padding) => Ok(Some(Self::padding_from_column(padding.unwrap_or(0))?)),
        }
    }

    /// Number of stored entries.
    pub async fn entry_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/entry_count.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("negative entry count"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    async fn repository() -> (Database, Repository) {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        (db, repo)
    }

    #[tokio::test]
    async fn test_empty_store_has_no_padding() {
        let (db, repo) = repository().await;
        assert_eq!(repo.overall_padding_size().await.unwrap(), 0);
        assert_eq!(repo.entry_count().await.unwrap(), 0);
        db.close().await;
    }

    #[rstest]
    #[case::all_padded(&[Some(100), Some(200), Some(300)], 600)]
    #[case::mixed(&[Some(20480), None, Some(1)], 20481)]
    #[case::unpadded(&[None, None], 0)]
    #[tokio::test]
    async fn test_overall_padding_size(#[case] paddings: &[Option<u64>], #[case] expected: u64) {
        let (db, repo) = repository().await;
        for (i, padding) in paddings.iter().enumerate() {
            let mut entry = NewEntry::new(format!("https://example.com/{i}"));
            entry.padding_size = *padding;
            repo.insert_entry(&entry).await.unwrap();
        }
        assert_eq!(repo.overall_padding_size().await.unwrap(), expected);
        assert_eq!(repo.entry_count().await.unwrap(), paddings.len() as u64);
        db.close().await;
    }

    #[tokio::test]
    async fn test_delete_entry_returns_padding() {
        let (db, repo) = repository().await;
        let padded = repo
            .insert_entry(&NewEntry::new("https://example.com/a").with_body("{0001}").with_padding(512))
            .await
            .unwrap();
        let plain = repo.insert_entry(&NewEntry::new("https://example.com/b")).await.unwrap();
        assert_eq!(repo.delete_entry(padded).await.unwrap(), Some(512));
        assert_eq!(repo.delete_entry(plain).await.unwrap(), Some(0));
        assert_eq!(repo.delete_entry(plain).await.unwrap(), None);
        assert_eq!(repo.overall_padding_size().await.unwrap(), 0);
        db.close().await;
    }

    #[tokio::test]
    async fn test_padding_out_of_range_is_rejected() {
        let (db, repo) = repository().await;
        let entry = NewEntry::new("https://example.com/huge").with_padding(u64::MAX);
        let err = repo.insert_entry(&entry).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));
        db.close().await;
    }
}
