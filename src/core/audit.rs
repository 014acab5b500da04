use crate::domain::model::{AuditEntry, AuditKind};
use crate::utils::error::{RepricerError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, Transaction};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS price_change_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL,
    old_price REAL,
    new_price REAL,
    market_reference_price REAL,
    floor_price REAL,
    discount_base INTEGER,
    timestamp TEXT NOT NULL,
    tenant TEXT NOT NULL,
    market TEXT NOT NULL,
    reason TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS failed_price_change_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL,
    current_price REAL,
    market_reference_price REAL,
    floor_price REAL,
    timestamp TEXT NOT NULL,
    tenant TEXT NOT NULL,
    market TEXT NOT NULL,
    reason TEXT NOT NULL,
    best_price_holder TEXT
);
"#;

/// Keeps letters, digits, `_` and `-`; everything else becomes `_`.
fn safe_file_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Append-only SQLite audit trail for one tenant and market.
///
/// The store only remembers its path; every call opens its own connection so a
/// clone can be moved onto a blocking worker.
#[derive(Debug, Clone)]
pub struct AuditStore {
    path: PathBuf,
}

impl AuditStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    RepricerError::AuditDirError {
                        path: parent.display().to_string(),
                        source,
                    }
                })?;
            }
        }
        let store = Self { path };
        store.connect()?;
        Ok(store)
    }

    /// Store at `{dir}/{tenant}_data_{market}.db`.
    pub fn open_for(dir: impl AsRef<Path>, tenant: &str, market: &str) -> Result<Self> {
        let file = format!(
            "{}_data_{}.db",
            safe_file_component(tenant),
            safe_file_component(market)
        );
        Self::open(dir.as_ref().join(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Appends `entries` to the table for `kind` in a single transaction.
    pub fn record(&self, entries: &[AuditEntry], kind: AuditKind) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        insert_entries(&tx, entries, kind)?;
        tx.commit()?;

        debug!(
            "Recorded {} {:?} audit entries in {}",
            entries.len(),
            kind,
            self.path.display()
        );
        Ok(entries.len())
    }

    /// Newest `limit` entries of one table, most recent first.
    pub fn recent(&self, kind: AuditKind, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.connect()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let entries = match kind {
            AuditKind::Successful => {
                let mut stmt = conn.prepare(
                    "SELECT sku, old_price, new_price, market_reference_price, floor_price, discount_base, timestamp, tenant, market, reason FROM price_change_history ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], |row: &Row| {
                    Ok(AuditEntry {
                        sku: row.get(0)?,
                        old_price: row.get(1)?,
                        new_price: row.get(2)?,
                        market_reference_price: row.get(3)?,
                        floor_price: row.get(4)?,
                        discount_base: row.get(5)?,
                        best_price_holder: String::new(),
                        timestamp: parse_timestamp(6, row.get(6)?)?,
                        tenant: row.get(7)?,
                        market: row.get(8)?,
                        reason: row.get(9)?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            AuditKind::Failed => {
                let mut stmt = conn.prepare(
                    "SELECT sku, current_price, market_reference_price, floor_price, timestamp, tenant, market, reason, best_price_holder FROM failed_price_change_attempts ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], |row: &Row| {
                    let current: Option<f64> = row.get(1)?;
                    Ok(AuditEntry {
                        sku: row.get(0)?,
                        old_price: current,
                        new_price: current,
                        market_reference_price: row.get(2)?,
                        floor_price: row.get(3)?,
                        discount_base: None,
                        timestamp: parse_timestamp(4, row.get(4)?)?,
                        tenant: row.get(5)?,
                        market: row.get(6)?,
                        reason: row.get(7)?,
                        best_price_holder: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(entries)
    }

    /// Records changed and not-changed entries of one cycle. Both tables are
    /// written in one transaction: either the whole cycle lands or none of it.
    pub fn record_cycle(&self, successful: &[AuditEntry], failed: &[AuditEntry]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        insert_entries(&tx, successful, AuditKind::Successful)?;
        insert_entries(&tx, failed, AuditKind::Failed)?;
        tx.commit()?;

        info!(
            "🗄️ Audit trail updated: {} changes, {} rejected attempts",
            successful.len(),
            failed.len()
        );
        Ok(())
    }
}

fn insert_entries(tx: &Transaction<'_>, entries: &[AuditEntry], kind: AuditKind) -> Result<()> {
    match kind {
        AuditKind::Successful => {
            let mut stmt = tx.prepare(
                "INSERT INTO price_change_history (sku, old_price, new_price, market_reference_price, floor_price, discount_base, timestamp, tenant, market, reason) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.sku,
                    entry.old_price,
                    entry.new_price,
                    entry.market_reference_price,
                    entry.floor_price,
                    entry.discount_base,
                    entry.timestamp.to_rfc3339(),
                    entry.tenant,
                    entry.market,
                    entry.reason,
                ])?;
            }
        }
        AuditKind::Failed => {
            let mut stmt = tx.prepare(
                "INSERT INTO failed_price_change_attempts (sku, current_price, market_reference_price, floor_price, timestamp, tenant, market, reason, best_price_holder) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.sku,
                    entry.old_price,
                    entry.market_reference_price,
                    entry.floor_price,
                    entry.timestamp.to_rfc3339(),
                    entry.tenant,
                    entry.market,
                    entry.reason,
                    entry.best_price_holder,
                ])?;
            }
        }
    }
    Ok(())
}
