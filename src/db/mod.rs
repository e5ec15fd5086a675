//! Trade record persistence.
//!
//! The sequencer only talks to [`RecordStore`]. Two implementations exist:
//! - [`Database`]: SQLite through sqlx, used by the binary
//! - [`MemoryStore`]: process-local, used for dry runs and tests

mod memory;

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, QueryBuilder, Sqlite, SqlitePool};

use crate::error::TradeError;
use crate::models::{OrderSide, PositionSide, RecordFilter, RecordPatch, TradeRecord, TradeStatus};

pub use memory::MemoryStore;

/// Durable store of executed trades.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records matching every set field of `filter`, oldest first.
    async fn find_all(&self, filter: &RecordFilter) -> Result<Vec<TradeRecord>, TradeError>;

    async fn find_by_id(&self, id: &str) -> Result<TradeRecord, TradeError> {
        self.find_all(&RecordFilter::by_id(id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TradeError::RecordNotFound(id.to_string()))
    }

    async fn save(&self, record: TradeRecord) -> Result<TradeRecord, TradeError>;

    /// Patch the oldest record matching `filter`.
    async fn update_one(&self, filter: &RecordFilter, patch: &RecordPatch) -> Result<TradeRecord, TradeError>;

    /// Delete every matching record and return how many went.
    async fn remove(&self, filter: &RecordFilter) -> Result<u64, TradeError>;
}

/// SQLite-backed record store.
pub struct Database {
    pool: SqlitePool,
}

/// Row of the `trade_records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTradeRecord {
    pub id: String,
    pub user_id: String,
    pub trade_id: String,
    pub status: String,
    pub pair: String,
    pub side: String,
    pub quantity: String,
    pub position_side: String,
    pub exchange_trade_type: String,
    pub reference_price: String,
    pub created_at: String,
    pub updated_at: String,
}

fn corrupt(id: &str, field: &str, value: &str) -> TradeError {
    TradeError::Persistence(format!("record {} has invalid {} {:?}", id, field, value))
}

fn parse_time(id: &str, field: &str, value: &str) -> Result<DateTime<Utc>, TradeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| corrupt(id, field, value))
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl TryFrom<StoredTradeRecord> for TradeRecord {
    type Error = TradeError;

    fn try_from(row: StoredTradeRecord) -> Result<Self, Self::Error> {
        let status = TradeStatus::from_str(&row.status).map_err(|_| corrupt(&row.id, "status", &row.status))?;
        let side = OrderSide::from_wire(&row.side).ok_or_else(|| corrupt(&row.id, "side", &row.side))?;
        let position_side = PositionSide::from_wire(&row.position_side)
            .ok_or_else(|| corrupt(&row.id, "position side", &row.position_side))?;
        let reference_price = Decimal::from_str(&row.reference_price)
            .map_err(|_| corrupt(&row.id, "reference price", &row.reference_price))?;
        let created_at = parse_time(&row.id, "created_at", &row.created_at)?;
        let updated_at = parse_time(&row.id, "updated_at", &row.updated_at)?;

        Ok(TradeRecord {
            id: row.id,
            user_id: row.user_id,
            trade_id: row.trade_id,
            status,
            pair: row.pair,
            side,
            quantity: row.quantity,
            position_side,
            exchange_trade_type: row.exchange_trade_type,
            reference_price,
            created_at,
            updated_at,
        })
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &RecordFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(id) = &filter.id {
        qb.push(" AND id = ").push_bind(id.clone());
    }
    if let Some(user_id) = &filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id.clone());
    }
    if let Some(pair) = &filter.pair {
        qb.push(" AND pair = ").push_bind(pair.clone());
    }
    if let Some(side) = filter.position_side {
        qb.push(" AND position_side = ").push_bind(side.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
}

impl Database {
    /// Connect and create the schema if needed.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database. A single connection keeps every query on the same database.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                trade_id TEXT NOT NULL,
                status TEXT NOT NULL,
                pair TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                position_side TEXT NOT NULL,
                exchange_trade_type TEXT NOT NULL,
                reference_price TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create trade_records")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trade_records_leg ON trade_records(user_id, pair, position_side, status)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create trade_records index")?;

        Ok(())
    }

    async fn select(&self, filter: &RecordFilter, limit: Option<u32>) -> Result<Vec<TradeRecord>, TradeError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM trade_records");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at, id");
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows: Vec<StoredTradeRecord> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(TradeRecord::try_from).collect()
    }
}

#[async_trait]
impl RecordStore for Database {
    async fn find_all(&self, filter: &RecordFilter) -> Result<Vec<TradeRecord>, TradeError> {
        self.select(filter, None).await
    }

    async fn save(&self, record: TradeRecord) -> Result<TradeRecord, TradeError> {
        sqlx::query(
            r#"
            INSERT INTO trade_records
                (id, user_id, trade_id, status, pair, side, quantity, position_side,
                 exchange_trade_type, reference_price, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.trade_id)
        .bind(record.status.as_str())
        .bind(&record.pair)
        .bind(record.side.as_str())
        .bind(&record.quantity)
        .bind(record.position_side.as_str())
        .bind(&record.exchange_trade_type)
        .bind(record.reference_price.to_string())
        .bind(format_time(&record.created_at))
        .bind(format_time(&record.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn update_one(&self, filter: &RecordFilter, patch: &RecordPatch) -> Result<TradeRecord, TradeError> {
        let mut record = self
            .select(filter, Some(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TradeError::RecordNotFound(format!("no record matches {:?}", filter)))?;

        patch.apply(&mut record);

        sqlx::query("UPDATE trade_records SET status = ?, quantity = ?, updated_at = ? WHERE id = ?")
            .bind(record.status.as_str())
            .bind(&record.quantity)
            .bind(format_time(&record.updated_at))
            .bind(&record.id)
            .execute(&self.pool)
            .await?;

        Ok(record)
    }

    async fn remove(&self, filter: &RecordFilter) -> Result<u64, TradeError> {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM trade_records");
        push_filter(&mut qb, filter);

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderAck, TradeSignal};
    use rust_decimal_macros::dec;

    fn record(user: &str, side: PositionSide, order_id: i64) -> TradeRecord {
        let signal = TradeSignal::open("BTCUSDT", side, dec!(27123.50), 3);
        let ack = OrderAck {
            order_id,
            status: "FILLED".to_string(),
            client_order_id: String::new(),
        };
        TradeRecord::opened(user, &signal, &ack, "0.018", "BINANCE")
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let db = Database::in_memory().await.unwrap();
        let saved = db.save(record("u1", PositionSide::Long, 1)).await.unwrap();
        db.save(record("u1", PositionSide::Short, 2)).await.unwrap();
        db.save(record("u2", PositionSide::Long, 3)).await.unwrap();

        let found = db.find_by_id(&saved.id).await.unwrap();
        assert_eq!(found.trade_id, "1");
        assert_eq!(found.reference_price.to_string(), "27123.50");
        assert_eq!(found.side, OrderSide::Buy);

        let legs = db
            .find_all(&RecordFilter::open_leg("u1", "BTCUSDT", PositionSide::Short))
            .await
            .unwrap();
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].trade_id, "2");

        assert_eq!(db.find_all(&RecordFilter::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_record() {
        let db = Database::in_memory().await.unwrap();
        assert!(matches!(
            db.find_by_id("nope").await,
            Err(TradeError::RecordNotFound(_))
        ));
        assert!(matches!(
            db.update_one(&RecordFilter::by_id("nope"), &RecordPatch::status(TradeStatus::Closed))
                .await,
            Err(TradeError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let db = Database::in_memory().await.unwrap();
        let saved = db.save(record("u1", PositionSide::Long, 1)).await.unwrap();

        let updated = db
            .update_one(&RecordFilter::by_id(&saved.id), &RecordPatch::status(TradeStatus::Closed))
            .await
            .unwrap();
        assert_eq!(updated.status, TradeStatus::Closed);
        assert_eq!(db.find_by_id(&saved.id).await.unwrap().status, TradeStatus::Closed);

        let open = RecordFilter {
            status: Some(TradeStatus::Open),
            ..Default::default()
        };
        assert_eq!(db.remove(&open).await.unwrap(), 0);
        assert_eq!(db.remove(&RecordFilter::by_id(&saved.id)).await.unwrap(), 1);
        assert!(db.find_all(&RecordFilter::default()).await.unwrap().is_empty());
    }
}
