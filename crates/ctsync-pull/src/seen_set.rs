//! The persistent seen-set: PostgreSQL table
//! `downloaded_certs(sha256 BYTEA PRIMARY KEY, tbs_no_ct_sha256 BYTEA)`.
//! The Sink is the sole writer.
//!
//! Queries are issued with bound parameters (`= ANY($1)`, multi-row
//! `INSERT ... ON CONFLICT DO NOTHING`); building SQL by string
//! concatenation is never the idiomatic choice here (see DESIGN.md).

use crate::cert::Fingerprint;
use crate::error::SinkError;
use sqlx::PgPool;
use std::collections::HashSet;

/// Abstracts the seen-set behind a trait so the Sink's dedup/commit logic
/// (including the bisection fallback) can be unit-tested without a live
/// PostgreSQL instance, following the same boundary-trait shape as
/// `CtLogClient`.
#[async_trait::async_trait]
pub trait SeenSetStore: Send + Sync {
    async fn already_present(
        &self,
        fingerprints: &[Fingerprint],
    ) -> Result<HashSet<Fingerprint>, SinkError>;

    /// Returns `Err` only for failures that are not a plain conflict (e.g. a
    /// transient connection error) — the native `ON CONFLICT DO NOTHING`
    /// path silently absorbs duplicates and never errors for them.
    async fn insert_batch(
        &self,
        rows: &[(Fingerprint, Fingerprint)],
    ) -> Result<Vec<Fingerprint>, SinkError>;
}

pub struct SeenSet {
    pool: PgPool,
}

impl SeenSet {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        let seen_set = Self { pool };
        seen_set.migrate().await?;
        Ok(seen_set)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloaded_certs (
                sha256 BYTEA PRIMARY KEY,
                tbs_no_ct_sha256 BYTEA NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait::async_trait]
impl SeenSetStore for SeenSet {
    /// Returns the subset of `fingerprints` already present in the seen-set
    /// (CommitBatch step b).
    async fn already_present(
        &self,
        fingerprints: &[Fingerprint],
    ) -> Result<HashSet<Fingerprint>, SinkError> {
        if fingerprints.is_empty() {
            return Ok(HashSet::new());
        }
        let params: Vec<Vec<u8>> = fingerprints.iter().map(|f| f.0.to_vec()).collect();
        let rows: Vec<(Vec<u8>,)> =
            sqlx::query_as("SELECT sha256 FROM downloaded_certs WHERE sha256 = ANY($1)")
                .bind(&params)
                .fetch_all(&self.pool)
                .await
                .map_err(SinkError::SeenSetQuery)?;

        Ok(rows
            .into_iter()
            .filter_map(|(bytes,)| <[u8; 32]>::try_from(bytes).ok().map(Fingerprint))
            .collect())
    }

    /// Attempts to insert all of `rows` as a single statement, using the
    /// native `ON CONFLICT DO NOTHING` upsert rather than a bisect-on-any-
    /// error approach. Returns the fingerprints that were *newly* inserted
    /// (conflicting rows are silently absorbed, not treated as errors).
    async fn insert_batch(
        &self,
        rows: &[(Fingerprint, Fingerprint)],
    ) -> Result<Vec<Fingerprint>, SinkError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let sha256: Vec<Vec<u8>> = rows.iter().map(|(fp, _)| fp.0.to_vec()).collect();
        let tbs: Vec<Vec<u8>> = rows.iter().map(|(_, tbs)| tbs.0.to_vec()).collect();

        let inserted: Vec<(Vec<u8>,)> = sqlx::query_as(
            r#"
            INSERT INTO downloaded_certs (sha256, tbs_no_ct_sha256)
            SELECT * FROM UNNEST($1::bytea[], $2::bytea[])
            ON CONFLICT (sha256) DO NOTHING
            RETURNING sha256
            "#,
        )
        .bind(&sha256)
        .bind(&tbs)
        .fetch_all(&self.pool)
        .await
        .map_err(SinkError::SeenSetInsert)?;

        Ok(inserted
            .into_iter()
            .filter_map(|(bytes,)| <[u8; 32]>::try_from(bytes).ok().map(Fingerprint))
            .collect())
    }
}
