// Postgres bookkeeping for observations, CID entries and round proofs.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;

use harvest_common::{CidEntry, Proof, Record};

use crate::traits::RecordStore;

pub struct PgRecordStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct CidEntryRow {
    natural_key: String,
    round: i64,
    cid: String,
}

impl From<CidEntryRow> for CidEntry {
    fn from(row: CidEntryRow) -> Self {
        CidEntry {
            natural_key: row.natural_key,
            round: row.round as u64,
            cid: row.cid,
        }
    }
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> crate::error::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> crate::error::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn observation_count(&self, natural_key: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM observations WHERE natural_key = $1",
        )
        .bind(natural_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_observation(&self, record: &Record) -> Result<()> {
        let json = serde_json::to_value(record)?;
        sqlx::query(
            r#"
            INSERT INTO observations (natural_key, observed_at, record)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&record.natural_key)
        .bind(record.observed_at)
        .bind(&json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cid_entry(&self, natural_key: &str) -> Result<Option<CidEntry>> {
        let row = sqlx::query_as::<_, CidEntryRow>(
            "SELECT natural_key, round, cid FROM cid_entries WHERE natural_key = $1",
        )
        .bind(natural_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CidEntry::from))
    }

    async fn create_cid_entry(&self, entry: &CidEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO cid_entries (natural_key, round, cid)
            VALUES ($1, $2, $3)
            ON CONFLICT (natural_key) DO NOTHING
            "#,
        )
        .bind(&entry.natural_key)
        .bind(entry.round as i64)
        .bind(&entry.cid)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() == 1;
        if !created {
            debug!(natural_key = %entry.natural_key, "store: cid entry already present");
        }
        Ok(created)
    }

    async fn cid_entries_for_round(&self, round: u64) -> Result<Vec<CidEntry>> {
        let rows = sqlx::query_as::<_, CidEntryRow>(
            r#"
            SELECT natural_key, round, cid FROM cid_entries
            WHERE round = $1
            ORDER BY natural_key ASC
            "#,
        )
        .bind(round as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CidEntry::from).collect())
    }

    async fn put_proof(&self, proof: &Proof) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO proofs (round, cid)
            VALUES ($1, $2)
            ON CONFLICT (round) DO UPDATE
            SET cid = EXCLUDED.cid, updated_at = NOW()
            "#,
        )
        .bind(proof.round as i64)
        .bind(&proof.cid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn proof(&self, round: u64) -> Result<Option<Proof>> {
        let row = sqlx::query_as::<_, (i64, String)>("SELECT round, cid FROM proofs WHERE round = $1")
            .bind(round as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(round, cid)| Proof {
            round: round as u64,
            cid,
        }))
    }
}
