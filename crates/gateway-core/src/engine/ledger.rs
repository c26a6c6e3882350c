//! Cost Ledger (§4.2).
//!
//! Durable append-only store of SpendRecords plus fast windowed aggregation,
//! grounded on `engine::sessions::SessionStore`'s `Mutex<Connection>` +
//! WAL-mode rusqlite pattern and on `at-core::cache::CacheDb`'s aggregate
//! query style (`spendSince`/`spendInCurrentDay`/`spendInCurrentMonth`).
//!
//! Money is stored as integer cents so comparisons and sums are exact;
//! bankers' rounding (round-half-to-even) is applied once, at the record
//! boundary, converting the computed USD cost into cents.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::error::GatewayError;
use crate::atoms::types::{ModelTier, SessionKey, SpendRecord};

pub struct CostLedger {
    conn: Mutex<Connection>,
}

impl CostLedger {
    pub fn open_in_memory() -> Result<Self, GatewayError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    pub fn open(path: &std::path::Path) -> Result<Self, GatewayError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, GatewayError> {
        run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Atomic append. Must succeed-or-surface: the Dispatcher must not
    /// silently lose records.
    pub fn record(&self, spend: &SpendRecord) -> Result<(), GatewayError> {
        let cents = round_bankers_cents(spend.cost_usd);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO spend_records
                (timestamp, session_key, project_id, tier, input_tokens, output_tokens, cost_cents)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                spend.timestamp.to_rfc3339(),
                spend.session_key.as_ref().map(|k| k.as_str()),
                spend.project_id,
                spend.tier.as_str(),
                spend.input_tokens as i64,
                spend.output_tokens as i64,
                cents,
            ],
        )?;
        Ok(())
    }

    /// Sum over records with timestamp >= since; unscoped (`project_id =
    /// None`) sums across all projects.
    pub fn spend_since(&self, project_id: Option<&str>, since: DateTime<Utc>) -> Result<f64, GatewayError> {
        let conn = self.conn.lock();
        let cents: Option<i64> = match project_id {
            Some(pid) => conn
                .query_row(
                    "SELECT SUM(cost_cents) FROM spend_records WHERE timestamp >= ?1 AND project_id = ?2",
                    params![since.to_rfc3339(), pid],
                    |row| row.get(0),
                )
                .optional()?
                .flatten(),
            None => conn
                .query_row(
                    "SELECT SUM(cost_cents) FROM spend_records WHERE timestamp >= ?1",
                    params![since.to_rfc3339()],
                    |row| row.get(0),
                )
                .optional()?
                .flatten(),
        };
        Ok(cents.unwrap_or(0) as f64 / 100.0)
    }

    pub fn spend_in_current_day(&self, project_id: Option<&str>) -> Result<f64, GatewayError> {
        self.spend_since(project_id, start_of_utc_day(Utc::now()))
    }

    pub fn spend_in_current_month(&self, project_id: Option<&str>) -> Result<f64, GatewayError> {
        self.spend_since(project_id, start_of_utc_month(Utc::now()))
    }

    #[cfg(test)]
    pub fn record_count(&self) -> usize {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM spend_records", [], |row| row.get::<_, i64>(0)).unwrap_or(0) as usize
    }
}

fn run_migrations(conn: &Connection) -> Result<(), GatewayError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS spend_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            session_key TEXT,
            project_id TEXT,
            tier TEXT NOT NULL,
            input_tokens INTEGER NOT NULL,
            output_tokens INTEGER NOT NULL,
            cost_cents INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_spend_records_ts ON spend_records(timestamp);
        CREATE INDEX IF NOT EXISTS idx_spend_records_project ON spend_records(project_id);",
    )?;
    Ok(())
}

fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0).single().unwrap_or(now)
}

fn start_of_utc_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).single().unwrap_or(now)
}

/// Round-half-to-even at the cent boundary (§4.2 "Numeric semantics").
fn round_bankers_cents(usd: f64) -> i64 {
    let scaled = usd * 100.0;
    let floor = scaled.floor();
    let diff = scaled - floor;
    let floor_i = floor as i64;
    if (diff - 0.5).abs() < f64::EPSILON {
        if floor_i % 2 == 0 {
            floor_i
        } else {
            floor_i + 1
        }
    } else {
        scaled.round() as i64
    }
}

/// cost = input-tokens x input-price + output-tokens x output-price, prices
/// given per megatoken (§3 SpendRecord invariant).
pub fn compute_cost_usd(tier_input_price: f64, tier_output_price: f64, input_tokens: u64, output_tokens: u64) -> f64 {
    let input_cost = (input_tokens as f64 / 1_000_000.0) * tier_input_price;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * tier_output_price;
    input_cost + output_cost
}

pub fn spend_record(
    session_key: Option<SessionKey>,
    project_id: Option<String>,
    tier: ModelTier,
    input_tokens: u64,
    output_tokens: u64,
    input_price: f64,
    output_price: f64,
) -> SpendRecord {
    SpendRecord {
        timestamp: Utc::now(),
        session_key,
        project_id,
        tier,
        input_tokens,
        output_tokens,
        cost_usd: compute_cost_usd(input_price, output_price, input_tokens, output_tokens),
    }
}
