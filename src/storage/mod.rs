//! SQLite persistence layer.
//!
//! Five tables mirror the entities in `types`: `markets`,
//! `probability_estimates`, `edge_analyses`, `positions`,
//! `calibration_records`. Schema is created idempotently at startup
//! rather than through a separate migration file set, since the whole
//! schema is small enough to read in one place.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use crate::errors::EngineError;
use crate::types::{
    CalibrationRecord, EdgeAnalysis, Market, MarketCategory, MarketStatus, Position, PositionStatus,
    ProbabilityEstimate, Side, Venue,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS markets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    venue TEXT NOT NULL,
    venue_market_id TEXT NOT NULL,
    venue_event_id TEXT,
    title TEXT NOT NULL,
    category TEXT NOT NULL,
    description TEXT NOT NULL,
    resolution_source TEXT,
    yes_price TEXT NOT NULL,
    no_price TEXT NOT NULL,
    spread TEXT NOT NULL,
    volume_24h TEXT NOT NULL,
    close_time TEXT,
    resolution_time TEXT,
    days_to_expiry INTEGER,
    status TEXT NOT NULL,
    resolved_outcome INTEGER,
    first_seen TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    UNIQUE(venue, venue_market_id)
);
CREATE INDEX IF NOT EXISTS idx_markets_status ON markets(status);

CREATE TABLE IF NOT EXISTS probability_estimates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id INTEGER NOT NULL REFERENCES markets(id),
    scan_id TEXT NOT NULL,
    role TEXT NOT NULL,
    agent_name TEXT NOT NULL,
    probability TEXT NOT NULL,
    confidence TEXT NOT NULL,
    reasoning TEXT NOT NULL,
    model_kind TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_estimates_market ON probability_estimates(market_id);
CREATE INDEX IF NOT EXISTS idx_estimates_scan ON probability_estimates(scan_id);

CREATE TABLE IF NOT EXISTS edge_analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id INTEGER NOT NULL REFERENCES markets(id),
    scan_id TEXT NOT NULL,
    system_probability TEXT NOT NULL,
    market_price TEXT NOT NULL,
    edge TEXT NOT NULL,
    expected_value TEXT NOT NULL,
    kelly_fraction TEXT NOT NULL,
    half_kelly_fraction TEXT NOT NULL,
    position_size_dollars TEXT NOT NULL,
    num_contracts INTEGER NOT NULL,
    recommended_side TEXT NOT NULL,
    tradeable INTEGER NOT NULL,
    rejection_reason TEXT,
    debate_triggered INTEGER NOT NULL,
    debate_transcript TEXT,
    estimates_divergence TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_edge_market ON edge_analyses(market_id);
CREATE INDEX IF NOT EXISTS idx_edge_scan ON edge_analyses(scan_id);

CREATE TABLE IF NOT EXISTS positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id INTEGER NOT NULL REFERENCES markets(id),
    edge_analysis_id INTEGER NOT NULL REFERENCES edge_analyses(id),
    venue TEXT NOT NULL,
    side TEXT NOT NULL,
    num_contracts INTEGER NOT NULL,
    entry_price TEXT NOT NULL,
    total_cost TEXT NOT NULL,
    exit_price TEXT,
    pnl_dollars TEXT,
    pnl_percent TEXT,
    status TEXT NOT NULL,
    venue_order_id TEXT,
    opened_at TEXT NOT NULL,
    closed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
CREATE INDEX IF NOT EXISTS idx_positions_market ON positions(market_id);

CREATE TABLE IF NOT EXISTS calibration_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id INTEGER NOT NULL REFERENCES markets(id),
    system_probability TEXT NOT NULL,
    market_price_at_entry TEXT NOT NULL,
    actual_outcome INTEGER NOT NULL,
    brier_score TEXT NOT NULL,
    research_estimate TEXT,
    base_rate_estimate TEXT,
    model_estimate TEXT,
    category TEXT NOT NULL,
    resolved_at TEXT NOT NULL
);
"#;

pub async fn connect(database_url: &str) -> Result<SqlitePool, EngineError> {
    let pool = SqlitePoolOptions::new().max_connections(5).connect(database_url).await?;
    sqlx::query(SCHEMA).execute(&pool).await?;
    info!(database_url, "storage schema ready");
    Ok(pool)
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

fn dec_str(d: Decimal) -> String {
    d.to_string()
}

fn parse_dec(s: &str) -> Decimal {
    s.parse().unwrap_or(Decimal::ZERO)
}

/// Transaction-scoped twin of `Store::upsert_market`. Kept as a
/// separate function rather than a generic-executor helper because it
/// issues two sequential statements (a lookup, then an update or
/// insert) and a `&mut Transaction` can't be reused across two calls
/// the way a `&Pool` reference can — each statement here takes its own
/// fresh reborrow of `tx`.
async fn upsert_market_tx_impl(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    m: &Market,
) -> Result<(i64, bool), EngineError> {
    let existing = sqlx::query("SELECT id FROM markets WHERE venue = ? AND venue_market_id = ?")
        .bind(m.venue.to_string())
        .bind(&m.venue_market_id)
        .fetch_optional(&mut **tx)
        .await?;

    if let Some(row) = existing {
        let id: i64 = row.try_get("id")?;
        sqlx::query(
            "UPDATE markets SET yes_price = ?, no_price = ?, spread = ?, volume_24h = ?, \
             days_to_expiry = ?, close_time = ?, last_updated = ? WHERE id = ?",
        )
        .bind(dec_str(m.yes_price))
        .bind(dec_str(m.no_price))
        .bind(dec_str(m.spread))
        .bind(dec_str(m.volume_24h))
        .bind(m.days_to_expiry)
        .bind(m.close_time.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut **tx)
        .await?;
        return Ok((id, false));
    }

    let result = sqlx::query(
        "INSERT INTO markets (venue, venue_market_id, venue_event_id, title, category, description, \
         resolution_source, yes_price, no_price, spread, volume_24h, close_time, resolution_time, \
         days_to_expiry, status, resolved_outcome, first_seen, last_updated) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(m.venue.to_string())
    .bind(&m.venue_market_id)
    .bind(&m.venue_event_id)
    .bind(&m.title)
    .bind(m.category.as_str())
    .bind(&m.description)
    .bind(&m.resolution_source)
    .bind(dec_str(m.yes_price))
    .bind(dec_str(m.no_price))
    .bind(dec_str(m.spread))
    .bind(dec_str(m.volume_24h))
    .bind(m.close_time.map(|t| t.to_rfc3339()))
    .bind(m.resolution_time.map(|t| t.to_rfc3339()))
    .bind(m.days_to_expiry)
    .bind(format!("{:?}", m.status))
    .bind(m.resolved_outcome)
    .bind(m.first_seen.to_rfc3339())
    .bind(m.last_updated.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok((result.last_insert_rowid(), true))
}

async fn count_open_positions_exec<'c, E>(exec: E) -> Result<i64, EngineError>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let row = sqlx::query("SELECT COUNT(*) as n FROM positions WHERE status IN ('Pending', 'Open')").fetch_one(exec).await?;
    Ok(row.try_get("n")?)
}

async fn realized_pnl_today_exec<'c, E>(exec: E) -> Result<Decimal, EngineError>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let midnight = Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
    let rows = sqlx::query(
        "SELECT pnl_dollars FROM positions WHERE closed_at IS NOT NULL AND closed_at >= ? AND pnl_dollars IS NOT NULL",
    )
    .bind(midnight.to_rfc3339())
    .fetch_all(exec)
    .await?;

    Ok(rows.iter().filter_map(|r| r.try_get::<Option<String>, _>("pnl_dollars").ok().flatten()).map(|s| parse_dec(&s)).sum())
}

async fn insert_position_exec<'c, E>(exec: E, p: &Position) -> Result<i64, EngineError>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let side = match p.side {
        Side::Yes => "Yes",
        Side::No => "No",
    };
    let result = sqlx::query(
        "INSERT INTO positions (market_id, edge_analysis_id, venue, side, num_contracts, entry_price, \
         total_cost, exit_price, pnl_dollars, pnl_percent, status, venue_order_id, opened_at, closed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(p.market_id)
    .bind(p.edge_analysis_id)
    .bind(p.venue.to_string())
    .bind(side)
    .bind(p.num_contracts)
    .bind(dec_str(p.entry_price))
    .bind(dec_str(p.total_cost))
    .bind(p.exit_price.map(dec_str))
    .bind(p.pnl_dollars.map(dec_str))
    .bind(p.pnl_percent.map(dec_str))
    .bind(format!("{:?}", p.status))
    .bind(&p.venue_order_id)
    .bind(p.opened_at.to_rfc3339())
    .bind(p.closed_at.map(|t| t.to_rfc3339()))
    .execute(exec)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn close_position_exec<'c, E>(
    exec: E,
    id: i64,
    exit_price: Decimal,
    pnl_dollars: Decimal,
    pnl_percent: Decimal,
    status: PositionStatus,
    closed_at: DateTime<Utc>,
) -> Result<(), EngineError>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "UPDATE positions SET exit_price = ?, pnl_dollars = ?, pnl_percent = ?, status = ?, closed_at = ? \
         WHERE id = ?",
    )
    .bind(dec_str(exit_price))
    .bind(dec_str(pnl_dollars))
    .bind(dec_str(pnl_percent))
    .bind(format!("{status:?}"))
    .bind(closed_at.to_rfc3339())
    .bind(id)
    .execute(exec)
    .await?;
    Ok(())
}

async fn mark_market_resolved_exec<'c, E>(exec: E, market_id: i64, outcome: bool, resolved_at: DateTime<Utc>) -> Result<(), EngineError>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let status = if outcome { "ResolvedYes" } else { "ResolvedNo" };
    sqlx::query("UPDATE markets SET status = ?, resolved_outcome = ?, resolution_time = ? WHERE id = ?")
        .bind(status)
        .bind(outcome)
        .bind(resolved_at.to_rfc3339())
        .bind(market_id)
        .execute(exec)
        .await?;
    Ok(())
}

async fn insert_calibration_record_exec<'c, E>(exec: E, c: &CalibrationRecord) -> Result<i64, EngineError>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO calibration_records (market_id, system_probability, market_price_at_entry, \
         actual_outcome, brier_score, research_estimate, base_rate_estimate, model_estimate, category, \
         resolved_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(c.market_id)
    .bind(dec_str(c.system_probability))
    .bind(dec_str(c.market_price_at_entry))
    .bind(c.actual_outcome)
    .bind(dec_str(c.brier_score))
    .bind(c.research_estimate.map(dec_str))
    .bind(c.base_rate_estimate.map(dec_str))
    .bind(c.model_estimate.map(dec_str))
    .bind(c.category.as_str())
    .bind(c.resolved_at.to_rfc3339())
    .execute(exec)
    .await?;
    Ok(result.last_insert_rowid())
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Begin a transaction. Callers that need several reads and writes
    /// to commit atomically (safety-gate checks before a position
    /// insert, a venue batch of market upserts, resolution settlement)
    /// take this instead of calling the pool-backed methods directly.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>, EngineError> {
        Ok(self.pool.begin().await?)
    }

    /// Insert a new market, or update price/volume/expiry/`last_updated`
    /// if `(venue, venue_market_id)` already exists. Returns the row id.
    pub async fn upsert_market(&self, m: &Market) -> Result<(i64, bool), EngineError> {
        let mut tx = self.begin().await?;
        let result = upsert_market_tx_impl(&mut tx, m).await?;
        tx.commit().await?;
        Ok(result)
    }

    /// Same as `upsert_market`, scoped to an already-open transaction —
    /// lets a caller commit several upserts (a venue's whole qualifying
    /// batch) as one unit instead of one-row-at-a-time.
    pub async fn upsert_market_tx(&self, tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, m: &Market) -> Result<(i64, bool), EngineError> {
        upsert_market_tx_impl(tx, m).await
    }

    pub async fn get_market(&self, id: i64) -> Result<Option<Market>, EngineError> {
        let row = sqlx::query("SELECT * FROM markets WHERE id = ?").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| row_to_market(&r)))
    }

    pub async fn list_active_markets(&self) -> Result<Vec<Market>, EngineError> {
        let rows = sqlx::query("SELECT * FROM markets WHERE status = 'Active'").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_market).collect())
    }

    pub async fn insert_probability_estimate(&self, e: &ProbabilityEstimate) -> Result<i64, EngineError> {
        let result = sqlx::query(
            "INSERT INTO probability_estimates (market_id, scan_id, role, agent_name, probability, \
             confidence, reasoning, model_kind, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(e.market_id)
        .bind(&e.scan_id)
        .bind(e.role.to_string())
        .bind(&e.agent_name)
        .bind(dec_str(e.probability))
        .bind(dec_str(e.confidence))
        .bind(&e.reasoning)
        .bind(&e.model_kind)
        .bind(e.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_edge_analysis(&self, e: &EdgeAnalysis) -> Result<i64, EngineError> {
        let side = match e.recommended_side {
            Side::Yes => "Yes",
            Side::No => "No",
        };
        let result = sqlx::query(
            "INSERT INTO edge_analyses (market_id, scan_id, system_probability, market_price, edge, \
             expected_value, kelly_fraction, half_kelly_fraction, position_size_dollars, num_contracts, \
             recommended_side, tradeable, rejection_reason, debate_triggered, debate_transcript, \
             estimates_divergence, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(e.market_id)
        .bind(&e.scan_id)
        .bind(dec_str(e.system_probability))
        .bind(dec_str(e.market_price))
        .bind(dec_str(e.edge))
        .bind(dec_str(e.expected_value))
        .bind(dec_str(e.kelly_fraction))
        .bind(dec_str(e.half_kelly_fraction))
        .bind(dec_str(e.position_size_dollars))
        .bind(e.num_contracts)
        .bind(side)
        .bind(e.tradeable)
        .bind(&e.rejection_reason)
        .bind(e.debate_triggered)
        .bind(e.debate_transcript.as_ref().map(|v| v.to_string()))
        .bind(dec_str(e.estimates_divergence))
        .bind(e.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_position(&self, p: &Position) -> Result<i64, EngineError> {
        insert_position_exec(&self.pool, p).await
    }

    /// Same as `insert_position`, scoped to an already-open transaction.
    pub async fn insert_position_tx(&self, tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, p: &Position) -> Result<i64, EngineError> {
        insert_position_exec(&mut **tx, p).await
    }

    pub async fn list_open_positions(&self) -> Result<Vec<Position>, EngineError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE status IN ('Pending', 'Open')")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_position).collect())
    }

    pub async fn count_open_positions(&self) -> Result<i64, EngineError> {
        count_open_positions_exec(&self.pool).await
    }

    /// Same as `count_open_positions`, scoped to an already-open
    /// transaction — so a concurrency-cap read is consistent with the
    /// position insert that follows it.
    pub async fn count_open_positions_tx(&self, tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<i64, EngineError> {
        count_open_positions_exec(&mut **tx).await
    }

    pub async fn close_position(
        &self,
        id: i64,
        exit_price: Decimal,
        pnl_dollars: Decimal,
        pnl_percent: Decimal,
        status: PositionStatus,
        closed_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        close_position_exec(&self.pool, id, exit_price, pnl_dollars, pnl_percent, status, closed_at).await
    }

    /// Same as `close_position`, scoped to an already-open transaction.
    pub async fn close_position_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: i64,
        exit_price: Decimal,
        pnl_dollars: Decimal,
        pnl_percent: Decimal,
        status: PositionStatus,
        closed_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        close_position_exec(&mut **tx, id, exit_price, pnl_dollars, pnl_percent, status, closed_at).await
    }

    /// Realized P&L for positions closed since UTC midnight today —
    /// backs the daily-drawdown kill-switch.
    pub async fn realized_pnl_today(&self) -> Result<Decimal, EngineError> {
        realized_pnl_today_exec(&self.pool).await
    }

    /// Same as `realized_pnl_today`, scoped to an already-open
    /// transaction.
    pub async fn realized_pnl_today_tx(&self, tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<Decimal, EngineError> {
        realized_pnl_today_exec(&mut **tx).await
    }

    pub async fn insert_calibration_record(&self, c: &CalibrationRecord) -> Result<i64, EngineError> {
        insert_calibration_record_exec(&self.pool, c).await
    }

    /// Same as `insert_calibration_record`, scoped to an already-open
    /// transaction.
    pub async fn insert_calibration_record_tx(&self, tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, c: &CalibrationRecord) -> Result<i64, EngineError> {
        insert_calibration_record_exec(&mut **tx, c).await
    }

    pub async fn list_calibration_records(&self) -> Result<Vec<CalibrationRecord>, EngineError> {
        let rows = sqlx::query("SELECT * FROM calibration_records ORDER BY resolved_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_calibration).collect())
    }

    pub async fn list_pending_positions_with_order(&self) -> Result<Vec<Position>, EngineError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE status = 'Pending' AND venue_order_id IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_position).collect())
    }

    pub async fn list_open_positions_only(&self) -> Result<Vec<Position>, EngineError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE status = 'Open'").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_position).collect())
    }

    pub async fn mark_position_open(&self, id: i64) -> Result<(), EngineError> {
        sqlx::query("UPDATE positions SET status = 'Open' WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn mark_position_cancelled(&self, id: i64, closed_at: DateTime<Utc>) -> Result<(), EngineError> {
        sqlx::query("UPDATE positions SET status = 'Cancelled', closed_at = ? WHERE id = ?")
            .bind(closed_at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Active markets with at least one pending or open position.
    pub async fn active_markets_with_live_positions(&self) -> Result<Vec<Market>, EngineError> {
        let rows = sqlx::query(
            "SELECT DISTINCT m.* FROM markets m JOIN positions p ON p.market_id = m.id \
             WHERE m.status = 'Active' AND p.status IN ('Pending', 'Open')",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_market).collect())
    }

    pub async fn list_positions_for_market(&self, market_id: i64) -> Result<Vec<Position>, EngineError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE market_id = ? AND status IN ('Pending', 'Open')")
            .bind(market_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_position).collect())
    }

    pub async fn mark_market_resolved(&self, market_id: i64, outcome: bool, resolved_at: DateTime<Utc>) -> Result<(), EngineError> {
        mark_market_resolved_exec(&self.pool, market_id, outcome, resolved_at).await
    }

    /// Same as `mark_market_resolved`, scoped to an already-open
    /// transaction.
    pub async fn mark_market_resolved_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        market_id: i64,
        outcome: bool,
        resolved_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        mark_market_resolved_exec(&mut **tx, market_id, outcome, resolved_at).await
    }

    pub async fn latest_edge_analysis_for_market(&self, market_id: i64) -> Result<Option<EdgeAnalysis>, EngineError> {
        let row = sqlx::query("SELECT * FROM edge_analyses WHERE market_id = ? ORDER BY created_at DESC LIMIT 1")
            .bind(market_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_edge_analysis))
    }

    /// Latest `ProbabilityEstimate` per role for a market.
    pub async fn latest_estimates_by_role(&self, market_id: i64) -> Result<Vec<ProbabilityEstimate>, EngineError> {
        let rows = sqlx::query(
            "SELECT pe.* FROM probability_estimates pe \
             INNER JOIN (SELECT role, MAX(created_at) AS max_created FROM probability_estimates WHERE market_id = ? GROUP BY role) latest \
             ON pe.role = latest.role AND pe.created_at = latest.max_created WHERE pe.market_id = ?",
        )
        .bind(market_id)
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_estimate).collect())
    }

    pub async fn get_position(&self, id: i64) -> Result<Option<Position>, EngineError> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = ?").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| row_to_position(&r)))
    }

    /// Markets matching the dashboard's `/markets` and `/scan/results`
    /// filters: venue, category, and a volume floor, sorted by the
    /// caller's choice of column (falls back to `last_updated`).
    pub async fn list_markets_filtered(
        &self,
        venue: Option<Venue>,
        category: Option<MarketCategory>,
        min_volume: Option<Decimal>,
        sort_by: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Market>, EngineError> {
        let sort_col = match sort_by {
            Some("volume") => "CAST(volume_24h AS REAL)",
            Some("spread") => "CAST(spread AS REAL)",
            Some("yes_price") => "CAST(yes_price AS REAL)",
            Some("days_to_expiry") => "days_to_expiry",
            _ => "last_updated",
        };
        let sql = format!("SELECT * FROM markets WHERE 1=1 ORDER BY {sort_col} DESC LIMIT ?");
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(row_to_market)
            .filter(|m| venue.map(|v| v == m.venue).unwrap_or(true))
            .filter(|m| category.map(|c| c == m.category).unwrap_or(true))
            .filter(|m| min_volume.map(|v| m.volume_24h >= v).unwrap_or(true))
            .collect())
    }

    /// All positions matching the optional status/venue filters, most
    /// recently opened first.
    pub async fn list_positions_filtered(
        &self,
        status: Option<PositionStatus>,
        venue: Option<Venue>,
    ) -> Result<Vec<Position>, EngineError> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY opened_at DESC").fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(row_to_position)
            .filter(|p| status.map(|s| s == p.status).unwrap_or(true))
            .filter(|p| venue.map(|v| v == p.venue).unwrap_or(true))
            .collect())
    }

    /// One row per distinct `scan_id` seen in `edge_analyses`: when it
    /// ran and how many candidates it produced.
    pub async fn scan_history(&self, limit: i64) -> Result<Vec<ScanHistoryEntry>, EngineError> {
        let rows = sqlx::query(
            "SELECT scan_id, MIN(created_at) as started_at, COUNT(*) as analyzed, \
             SUM(CASE WHEN tradeable THEN 1 ELSE 0 END) as tradeable \
             FROM edge_analyses GROUP BY scan_id ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| ScanHistoryEntry {
                scan_id: r.try_get("scan_id").unwrap_or_default(),
                started_at: r.try_get("started_at").unwrap_or_default(),
                analyzed: r.try_get("analyzed").unwrap_or_default(),
                tradeable: r.try_get("tradeable").unwrap_or_default(),
            })
            .collect())
    }

    /// Most recent edge analyses where the ensemble's disagreement
    /// triggered a debate round, newest first.
    pub async fn recent_debates(&self, limit: i64) -> Result<Vec<EdgeAnalysis>, EngineError> {
        let rows = sqlx::query("SELECT * FROM edge_analyses WHERE debate_triggered = 1 ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_edge_analysis).collect())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanHistoryEntry {
    pub scan_id: String,
    pub started_at: String,
    pub analyzed: i64,
    pub tradeable: i64,
}

fn row_to_market(row: &sqlx::sqlite::SqliteRow) -> Market {
    let venue_str: String = row.try_get("venue").unwrap_or_default();
    let category_str: String = row.try_get("category").unwrap_or_default();
    let status_str: String = row.try_get("status").unwrap_or_default();

    Market {
        id: row.try_get("id").unwrap_or_default(),
        venue: if venue_str == "Kalshi" { Venue::Kalshi } else { Venue::Polymarket },
        venue_market_id: row.try_get("venue_market_id").unwrap_or_default(),
        venue_event_id: row.try_get("venue_event_id").unwrap_or_default(),
        title: row.try_get("title").unwrap_or_default(),
        category: MarketCategory::ALL.iter().find(|c| c.as_str() == category_str).copied().unwrap_or(MarketCategory::Other),
        description: row.try_get("description").unwrap_or_default(),
        resolution_source: row.try_get("resolution_source").unwrap_or_default(),
        yes_price: row.try_get::<String, _>("yes_price").map(|s| parse_dec(&s)).unwrap_or_default(),
        no_price: row.try_get::<String, _>("no_price").map(|s| parse_dec(&s)).unwrap_or_default(),
        spread: row.try_get::<String, _>("spread").map(|s| parse_dec(&s)).unwrap_or_default(),
        volume_24h: row.try_get::<String, _>("volume_24h").map(|s| parse_dec(&s)).unwrap_or_default(),
        close_time: row.try_get::<Option<String>, _>("close_time").ok().flatten().and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        resolution_time: row.try_get::<Option<String>, _>("resolution_time").ok().flatten().and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        days_to_expiry: row.try_get("days_to_expiry").unwrap_or_default(),
        status: match status_str.as_str() {
            "ResolvedYes" => MarketStatus::ResolvedYes,
            "ResolvedNo" => MarketStatus::ResolvedNo,
            "Expired" => MarketStatus::Expired,
            _ => MarketStatus::Active,
        },
        resolved_outcome: row.try_get("resolved_outcome").unwrap_or_default(),
        first_seen: row.try_get::<String, _>("first_seen").ok().and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)).unwrap_or_else(Utc::now),
        last_updated: row.try_get::<String, _>("last_updated").ok().and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)).unwrap_or_else(Utc::now),
    }
}

fn row_to_position(row: &sqlx::sqlite::SqliteRow) -> Position {
    let venue_str: String = row.try_get("venue").unwrap_or_default();
    let side_str: String = row.try_get("side").unwrap_or_default();
    let status_str: String = row.try_get("status").unwrap_or_default();

    Position {
        id: row.try_get("id").unwrap_or_default(),
        market_id: row.try_get("market_id").unwrap_or_default(),
        edge_analysis_id: row.try_get("edge_analysis_id").unwrap_or_default(),
        venue: if venue_str == "Kalshi" { Venue::Kalshi } else { Venue::Polymarket },
        side: if side_str == "Yes" { Side::Yes } else { Side::No },
        num_contracts: row.try_get("num_contracts").unwrap_or_default(),
        entry_price: row.try_get::<String, _>("entry_price").map(|s| parse_dec(&s)).unwrap_or_default(),
        total_cost: row.try_get::<String, _>("total_cost").map(|s| parse_dec(&s)).unwrap_or_default(),
        exit_price: row.try_get::<Option<String>, _>("exit_price").ok().flatten().map(|s| parse_dec(&s)),
        pnl_dollars: row.try_get::<Option<String>, _>("pnl_dollars").ok().flatten().map(|s| parse_dec(&s)),
        pnl_percent: row.try_get::<Option<String>, _>("pnl_percent").ok().flatten().map(|s| parse_dec(&s)),
        status: match status_str.as_str() {
            "Open" => PositionStatus::Open,
            "ClosedWin" => PositionStatus::ClosedWin,
            "ClosedLoss" => PositionStatus::ClosedLoss,
            "ClosedEarly" => PositionStatus::ClosedEarly,
            "Cancelled" => PositionStatus::Cancelled,
            _ => PositionStatus::Pending,
        },
        venue_order_id: row.try_get("venue_order_id").unwrap_or_default(),
        opened_at: row.try_get::<String, _>("opened_at").ok().and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)).unwrap_or_else(Utc::now),
        closed_at: row.try_get::<Option<String>, _>("closed_at").ok().flatten().and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
    }
}

fn row_to_calibration(row: &sqlx::sqlite::SqliteRow) -> CalibrationRecord {
    let category_str: String = row.try_get("category").unwrap_or_default();
    CalibrationRecord {
        id: row.try_get("id").unwrap_or_default(),
        market_id: row.try_get("market_id").unwrap_or_default(),
        system_probability: row.try_get::<String, _>("system_probability").map(|s| parse_dec(&s)).unwrap_or_default(),
        market_price_at_entry: row.try_get::<String, _>("market_price_at_entry").map(|s| parse_dec(&s)).unwrap_or_default(),
        actual_outcome: row.try_get("actual_outcome").unwrap_or_default(),
        brier_score: row.try_get::<String, _>("brier_score").map(|s| parse_dec(&s)).unwrap_or_default(),
        research_estimate: row.try_get::<Option<String>, _>("research_estimate").ok().flatten().map(|s| parse_dec(&s)),
        base_rate_estimate: row.try_get::<Option<String>, _>("base_rate_estimate").ok().flatten().map(|s| parse_dec(&s)),
        model_estimate: row.try_get::<Option<String>, _>("model_estimate").ok().flatten().map(|s| parse_dec(&s)),
        category: MarketCategory::ALL.iter().find(|c| c.as_str() == category_str).copied().unwrap_or(MarketCategory::Other),
        resolved_at: row.try_get::<String, _>("resolved_at").ok().and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)).unwrap_or_else(Utc::now),
    }
}

fn row_to_edge_analysis(row: &sqlx::sqlite::SqliteRow) -> EdgeAnalysis {
    let side_str: String = row.try_get("recommended_side").unwrap_or_default();
    EdgeAnalysis {
        id: row.try_get("id").unwrap_or_default(),
        market_id: row.try_get("market_id").unwrap_or_default(),
        scan_id: row.try_get("scan_id").unwrap_or_default(),
        system_probability: row.try_get::<String, _>("system_probability").map(|s| parse_dec(&s)).unwrap_or_default(),
        market_price: row.try_get::<String, _>("market_price").map(|s| parse_dec(&s)).unwrap_or_default(),
        edge: row.try_get::<String, _>("edge").map(|s| parse_dec(&s)).unwrap_or_default(),
        expected_value: row.try_get::<String, _>("expected_value").map(|s| parse_dec(&s)).unwrap_or_default(),
        kelly_fraction: row.try_get::<String, _>("kelly_fraction").map(|s| parse_dec(&s)).unwrap_or_default(),
        half_kelly_fraction: row.try_get::<String, _>("half_kelly_fraction").map(|s| parse_dec(&s)).unwrap_or_default(),
        position_size_dollars: row.try_get::<String, _>("position_size_dollars").map(|s| parse_dec(&s)).unwrap_or_default(),
        num_contracts: row.try_get("num_contracts").unwrap_or_default(),
        recommended_side: if side_str == "Yes" { Side::Yes } else { Side::No },
        tradeable: row.try_get("tradeable").unwrap_or_default(),
        rejection_reason: row.try_get("rejection_reason").unwrap_or_default(),
        debate_triggered: row.try_get("debate_triggered").unwrap_or_default(),
        debate_transcript: row
            .try_get::<Option<String>, _>("debate_transcript")
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str(&s).ok()),
        estimates_divergence: row.try_get::<String, _>("estimates_divergence").map(|s| parse_dec(&s)).unwrap_or_default(),
        created_at: row.try_get::<String, _>("created_at").ok().and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)).unwrap_or_else(Utc::now),
    }
}

fn row_to_estimate(row: &sqlx::sqlite::SqliteRow) -> ProbabilityEstimate {
    let role_str: String = row.try_get("role").unwrap_or_default();
    ProbabilityEstimate {
        id: row.try_get("id").unwrap_or_default(),
        market_id: row.try_get("market_id").unwrap_or_default(),
        scan_id: row.try_get("scan_id").unwrap_or_default(),
        role: match role_str.as_str() {
            "base_rate" => crate::types::AnalystRole::BaseRate,
            "model" => crate::types::AnalystRole::Model,
            _ => crate::types::AnalystRole::Research,
        },
        agent_name: row.try_get("agent_name").unwrap_or_default(),
        probability: row.try_get::<String, _>("probability").map(|s| parse_dec(&s)).unwrap_or_default(),
        confidence: row.try_get::<String, _>("confidence").map(|s| parse_dec(&s)).unwrap_or_default(),
        reasoning: row.try_get("reasoning").unwrap_or_default(),
        model_kind: row.try_get("model_kind").unwrap_or_default(),
        created_at: row.try_get::<String, _>("created_at").ok().and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_schema_creates_and_roundtrips_market() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let store = Store::new(pool);

        let market = Market::sample();
        let (id, was_new) = store.upsert_market(&market).await.unwrap();
        assert!(id > 0);
        assert!(was_new);

        let fetched = store.get_market(id).await.unwrap().unwrap();
        assert_eq!(fetched.venue_market_id, "CPI-26Q1");
        assert_eq!(fetched.yes_price, dec!(0.45));
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_row() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let store = Store::new(pool);

        let mut market = Market::sample();
        let (id1, new1) = store.upsert_market(&market).await.unwrap();
        assert!(new1);

        market.yes_price = dec!(0.60);
        let (id2, new2) = store.upsert_market(&market).await.unwrap();
        assert_eq!(id1, id2);
        assert!(!new2);

        let fetched = store.get_market(id1).await.unwrap().unwrap();
        assert_eq!(fetched.yes_price, dec!(0.60));
    }

    #[tokio::test]
    async fn test_count_open_positions_empty() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let store = Store::new(pool);
        assert_eq!(store.count_open_positions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_realized_pnl_today_empty() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let store = Store::new(pool);
        assert_eq!(store.realized_pnl_today().await.unwrap(), Decimal::ZERO);
    }
}
