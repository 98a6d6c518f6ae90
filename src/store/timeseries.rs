// Time-Series Store - async Postgres handle for closed bars
// Writes are idempotent (ON CONFLICT DO NOTHING); reads back the most recent
// N bars for buffer warmup

use thiserror::Error;
use tracing::error;

use crate::core::types::{BufferedBar, Candle, Timeframe};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

const INSERT_BAR: &str = "\
    INSERT INTO klines (start_time, symbol, timeframe, open, high, low, close, volume) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
    ON CONFLICT (symbol, timeframe, start_time) DO NOTHING";

const SELECT_RECENT: &str = "\
    SELECT start_time, open, high, low, close, volume \
    FROM klines \
    WHERE symbol = $1 AND timeframe = $2 \
    ORDER BY start_time DESC \
    LIMIT $3";

pub struct TimeseriesStore {
    client: tokio_postgres::Client,
}

impl TimeseriesStore {
    /// Connect and spawn the connection driver task. Callers treat a failure
    /// here as fatal at startup.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(dsn, tokio_postgres::NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "Postgres connection terminated");
            }
        });
        Ok(Self { client })
    }

    /// Idempotent upsert keyed by (symbol, timeframe, start_time). Returns the
    /// number of rows written: 0 means the bar already existed.
    pub async fn insert_bar(&self, candle: &Candle) -> Result<u64, StoreError> {
        let timeframe = candle.timeframe.as_str();
        let rows = self
            .client
            .execute(
                INSERT_BAR,
                &[
                    &candle.start_time,
                    &candle.symbol,
                    &timeframe,
                    &candle.open,
                    &candle.high,
                    &candle.low,
                    &candle.close,
                    &candle.volume,
                ],
            )
            .await?;
        Ok(rows)
    }

    /// Most recent `limit` closed bars, returned oldest to newest.
    pub async fn recent_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: i64,
    ) -> Result<Vec<BufferedBar>, StoreError> {
        let tf = timeframe.as_str();
        let rows = self
            .client
            .query(SELECT_RECENT, &[&symbol, &tf, &limit])
            .await?;

        let mut bars: Vec<BufferedBar> = rows
            .iter()
            .map(|row| BufferedBar {
                time: row.get(0),
                open: row.get(1),
                high: row.get(2),
                low: row.get(3),
                close: row.get(4),
                volume: row.get(5),
            })
            .collect();
        bars.reverse();
        Ok(bars)
    }
}
