//! History store (C10): append-only telemetry/event tables, hourly rollups,
//! retention-based cleanup.
//!
//! Three tables (port samples, gateway events, and their rollups) served off
//! a pooled `sqlx::SqlitePool` connection; `get_hourly_power` buckets by
//! `strftime`-formatted hour, and a background task periodically evicts rows
//! older than the configured retention window.

use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::Error;
use crate::gateway_registry::PortData;

pub struct HistoryStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortHistoryRow {
    pub gateway_id: String,
    pub port_id: i64,
    pub voltage_mv: i64,
    pub current_ma: i64,
    pub power_w: f64,
    pub protocol: i64,
    pub temperature: i64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayEventRow {
    pub gateway_id: String,
    pub event_type: String,
    pub event_data: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PowerStats {
    pub gateway_id: String,
    pub period_hours: i64,
    pub total_wh: f64,
    pub max_w: f64,
    pub avg_w: f64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourlyPower {
    pub hour: String,
    pub total_power_w: f64,
    pub max_power_w: f64,
    pub avg_power_w: f64,
    pub sample_count: i64,
}

impl HistoryStore {
    pub async fn open(db_path: &str) -> Result<Self, Error> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::StorageError(e.to_string()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        let store = HistoryStore { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS port_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gateway_id TEXT NOT NULL,
                port_id INTEGER NOT NULL,
                voltage_mv INTEGER,
                current_ma INTEGER,
                power_w REAL,
                protocol INTEGER,
                temperature INTEGER,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_port_history_gateway ON port_history(gateway_id, timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_port_history_time ON port_history(timestamp)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS gateway_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gateway_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_data TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_gateway_events_time ON gateway_events(gateway_id, timestamp)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS power_aggregates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gateway_id TEXT NOT NULL,
                period_type TEXT NOT NULL,
                period_start DATETIME NOT NULL,
                total_power_wh REAL,
                max_power_w REAL,
                avg_power_w REAL,
                sample_count INTEGER,
                UNIQUE(gateway_id, period_type, period_start)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_power_aggregates ON power_aggregates(gateway_id, period_type, period_start)",
        )
        .execute(&self.pool)
        .await?;

        info!("history database schema ready");
        Ok(())
    }

    /// Append-only write for one telemetry burst. Batched in a single
    /// transaction so a burst of N ports costs one round trip, not N.
    pub async fn record_port_data(&self, gateway_id: &str, ports: &[PortData]) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        for port in ports {
            sqlx::query(
                "INSERT INTO port_history (gateway_id, port_id, voltage_mv, current_ma, power_w, protocol, temperature)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(gateway_id)
            .bind(port.port_id as i64)
            .bind(port.voltage_mv as i64)
            .bind(port.current_ma as i64)
            .bind(port.power_w)
            .bind(port.protocol as i64)
            .bind(port.temperature as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn record_event(&self, gateway_id: &str, kind: &str, data: Option<&str>) -> Result<(), Error> {
        sqlx::query("INSERT INTO gateway_events (gateway_id, event_type, event_data) VALUES (?, ?, ?)")
            .bind(gateway_id)
            .bind(kind)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn port_history(
        &self,
        gateway_id: &str,
        port_id: Option<i64>,
        hours: i64,
        limit: i64,
    ) -> Result<Vec<PortHistoryRow>, Error> {
        let since = format!("-{hours} hours");
        let rows = if let Some(port_id) = port_id {
            sqlx::query(
                "SELECT gateway_id, port_id, voltage_mv, current_ma, power_w, protocol, temperature, timestamp
                 FROM port_history
                 WHERE gateway_id = ? AND port_id = ? AND timestamp > datetime('now', ?)
                 ORDER BY timestamp DESC LIMIT ?",
            )
            .bind(gateway_id)
            .bind(port_id)
            .bind(&since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT gateway_id, port_id, voltage_mv, current_ma, power_w, protocol, temperature, timestamp
                 FROM port_history
                 WHERE gateway_id = ? AND timestamp > datetime('now', ?)
                 ORDER BY timestamp DESC LIMIT ?",
            )
            .bind(gateway_id)
            .bind(&since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows
            .into_iter()
            .map(|row| PortHistoryRow {
                gateway_id: row.get("gateway_id"),
                port_id: row.get("port_id"),
                voltage_mv: row.get("voltage_mv"),
                current_ma: row.get("current_ma"),
                power_w: row.get("power_w"),
                protocol: row.get("protocol"),
                temperature: row.get("temperature"),
                timestamp: row.get("timestamp"),
            })
            .collect())
    }

    pub async fn power_stats(&self, gateway_id: &str, hours: i64) -> Result<PowerStats, Error> {
        let since = format!("-{hours} hours");
        let row = sqlx::query(
            "SELECT SUM(power_w) / 3600.0 as total_wh, MAX(power_w) as max_power,
                    AVG(power_w) as avg_power, COUNT(*) as samples
             FROM port_history WHERE gateway_id = ? AND timestamp > datetime('now', ?)",
        )
        .bind(gateway_id)
        .bind(&since)
        .fetch_one(&self.pool)
        .await?;

        Ok(PowerStats {
            gateway_id: gateway_id.to_string(),
            period_hours: hours,
            total_wh: row.try_get::<Option<f64>, _>("total_wh")?.unwrap_or(0.0),
            max_w: row.try_get::<Option<f64>, _>("max_power")?.unwrap_or(0.0),
            avg_w: row.try_get::<Option<f64>, _>("avg_power")?.unwrap_or(0.0),
            sample_count: row.try_get("samples")?,
        })
    }

    pub async fn hourly_power(&self, gateway_id: &str, hours: i64) -> Result<Vec<HourlyPower>, Error> {
        let since = format!("-{hours} hours");
        let rows = sqlx::query(
            "SELECT strftime('%Y-%m-%d %H:00:00', timestamp) as hour,
                    SUM(power_w) as total_power, MAX(power_w) as max_power,
                    AVG(power_w) as avg_power, COUNT(*) as samples
             FROM port_history
             WHERE gateway_id = ? AND timestamp > datetime('now', ?)
             GROUP BY hour ORDER BY hour",
        )
        .bind(gateway_id)
        .bind(&since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HourlyPower {
                hour: row.get("hour"),
                total_power_w: row.try_get::<Option<f64>, _>("total_power").unwrap_or(None).unwrap_or(0.0),
                max_power_w: row.try_get::<Option<f64>, _>("max_power").unwrap_or(None).unwrap_or(0.0),
                avg_power_w: row.try_get::<Option<f64>, _>("avg_power").unwrap_or(None).unwrap_or(0.0),
                sample_count: row.get("samples"),
            })
            .collect())
    }

    pub async fn events(
        &self,
        gateway_id: &str,
        event_type: Option<&str>,
        hours: i64,
        limit: i64,
    ) -> Result<Vec<GatewayEventRow>, Error> {
        let since = format!("-{hours} hours");
        let rows = if let Some(event_type) = event_type {
            sqlx::query(
                "SELECT gateway_id, event_type, event_data, timestamp FROM gateway_events
                 WHERE gateway_id = ? AND event_type = ? AND timestamp > datetime('now', ?)
                 ORDER BY timestamp DESC LIMIT ?",
            )
            .bind(gateway_id)
            .bind(event_type)
            .bind(&since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT gateway_id, event_type, event_data, timestamp FROM gateway_events
                 WHERE gateway_id = ? AND timestamp > datetime('now', ?)
                 ORDER BY timestamp DESC LIMIT ?",
            )
            .bind(gateway_id)
            .bind(&since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows
            .into_iter()
            .map(|row| GatewayEventRow {
                gateway_id: row.get("gateway_id"),
                event_type: row.get("event_type"),
                event_data: row.get("event_data"),
                timestamp: row.get("timestamp"),
            })
            .collect())
    }

    pub async fn cleanup_old_data(&self, retention_days: i64) -> Result<(), Error> {
        let cutoff = format!("-{retention_days} days");
        sqlx::query("DELETE FROM port_history WHERE timestamp < datetime('now', ?)")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM gateway_events WHERE timestamp < datetime('now', ?)")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        info!(retention_days, "cleaned up history data older than retention window");
        Ok(())
    }

    /// Runs `cleanup_old_data` every `interval` until cancelled.
    pub async fn run_cleanup_task(self: std::sync::Arc<Self>, interval: Duration, retention_days: i64) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.cleanup_old_data(retention_days).await {
                tracing::warn!(error = %e, "history cleanup failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> HistoryStore {
        HistoryStore::open(":memory:").await.unwrap()
    }

    fn sample_port(power_w: f64) -> PortData {
        PortData {
            port_id: 1,
            state: 1,
            protocol: 6,
            voltage_mv: 5000,
            current_ma: 2000,
            power_w,
            temperature: 32,
        }
    }

    #[tokio::test]
    async fn record_and_query_power_stats() {
        let store = test_store().await;
        for _ in 0..10 {
            store.record_port_data("gw1", &[sample_port(10.0)]).await.unwrap();
        }
        let stats = store.power_stats("gw1", 24).await.unwrap();
        assert_eq!(stats.sample_count, 10);
        assert!((stats.max_w - 10.0).abs() < 1e-9);
        assert!((stats.avg_w - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn record_event_then_query() {
        let store = test_store().await;
        store.record_event("gw1", "status", Some("{\"connected\":true}")).await.unwrap();
        let events = store.events("gw1", None, 24, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "status");
    }

    #[tokio::test]
    async fn cleanup_removes_nothing_recent() {
        let store = test_store().await;
        store.record_port_data("gw1", &[sample_port(5.0)]).await.unwrap();
        store.cleanup_old_data(7).await.unwrap();
        let stats = store.power_stats("gw1", 24).await.unwrap();
        assert_eq!(stats.sample_count, 1);
    }
}
