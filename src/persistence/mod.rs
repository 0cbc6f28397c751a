//! SQLite persistence for keeper history.
//!
//! Persists what the keeper observed so `status` can report it later:
//! - Emitted events, as JSON payloads
//! - Vault snapshots (assets, supply, price per share, position)

use crate::deployment::VaultSnapshot;
use crate::events::{Receipt, StrategyEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Stored event row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event: StrategyEvent,
}

/// Stored snapshot row (the subset `status` prints).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_assets: Decimal,
    pub total_supply: Decimal,
    pub total_lent: Decimal,
    pub price_per_share: Decimal,
    pub state: String,
    pub long_balance: Decimal,
    pub perp_contracts: Decimal,
    pub margin: Decimal,
}

/// SQLite-based event and snapshot store.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open (or create) the store at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Event store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// In-memory store for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory().context("Failed to open in-memory database")?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Emitted events
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                name TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_name ON events(name);

            -- Vault snapshots
            CREATE TABLE IF NOT EXISTS vault_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                total_assets TEXT NOT NULL,
                total_supply TEXT NOT NULL,
                total_lent TEXT NOT NULL,
                idle TEXT NOT NULL,
                price_per_share TEXT NOT NULL,
                state TEXT NOT NULL,
                long_balance TEXT NOT NULL,
                perp_contracts TEXT NOT NULL,
                margin TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON vault_snapshots(timestamp);
            "#,
        )?;
        Ok(())
    }

    /// Store every event of a receipt under one timestamp.
    pub fn record_receipt(&mut self, timestamp: DateTime<Utc>, receipt: &Receipt) -> Result<usize> {
        let tx = self.conn.transaction()?;
        for event in &receipt.events {
            let payload = serde_json::to_string(event).context("Failed to encode event")?;
            tx.execute(
                "INSERT INTO events (timestamp, name, payload) VALUES (?1, ?2, ?3)",
                params![timestamp.to_rfc3339(), event.name(), payload],
            )?;
        }
        tx.commit()?;

        debug!(count = receipt.events.len(), "Events recorded");
        Ok(receipt.events.len())
    }

    pub fn record_snapshot(&self, snapshot: &VaultSnapshot) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO vault_snapshots
                (timestamp, total_assets, total_supply, total_lent, idle, price_per_share,
                 state, long_balance, perp_contracts, margin)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                snapshot.timestamp.to_rfc3339(),
                snapshot.total_assets.to_string(),
                snapshot.total_supply.to_string(),
                snapshot.total_lent.to_string(),
                snapshot.idle.to_string(),
                snapshot.price_per_share.to_string(),
                format!("{:?}", snapshot.state),
                snapshot.position.long_balance.to_string(),
                snapshot.position.perp_contracts.to_string(),
                snapshot.position.margin.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Most recent events, newest first; optionally only one event name.
    pub fn recent_events(&self, name: Option<&str>, limit: usize) -> Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, timestamp, payload FROM events
            WHERE (?1 IS NULL OR name = ?1)
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![name, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp, payload) = row?;
            events.push(StoredEvent {
                id,
                timestamp: parse_timestamp(&timestamp)?,
                event: serde_json::from_str(&payload)
                    .with_context(|| format!("Corrupt event payload in row {}", id))?,
            });
        }
        Ok(events)
    }

    /// Number of stored events per name.
    pub fn event_counts(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, COUNT(*) FROM events GROUP BY name ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn latest_snapshot(&self) -> Result<Option<StoredSnapshot>> {
        Ok(self.recent_snapshots(1)?.into_iter().next())
    }

    /// Most recent snapshots, newest first.
    pub fn recent_snapshots(&self, limit: usize) -> Result<Vec<StoredSnapshot>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, total_assets, total_supply, total_lent, price_per_share,
                   state, long_balance, perp_contracts, margin
            FROM vault_snapshots
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok([
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ])
        })?;

        let mut snapshots = Vec::new();
        for row in rows {
            let [timestamp, total_assets, total_supply, total_lent, pps, state, long, perp, margin] = row?;
            snapshots.push(StoredSnapshot {
                timestamp: parse_timestamp(&timestamp)?,
                total_assets: parse_decimal(&total_assets)?,
                total_supply: parse_decimal(&total_supply)?,
                total_lent: parse_decimal(&total_lent)?,
                price_per_share: parse_decimal(&pps)?,
                state,
                long_balance: parse_decimal(&long)?,
                perp_contracts: parse_decimal(&perp)?,
                margin: parse_decimal(&margin)?,
            });
        }
        Ok(snapshots)
    }

    /// Timestamp of the last stored event, if any.
    pub fn last_event_at(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT MAX(timestamp) FROM events", [], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?
            .flatten();
        raw.as_deref().map(parse_timestamp).transpose()
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp {}", raw))?
        .with_timezone(&Utc))
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Invalid decimal {}", raw))
}
