use super::report::Report;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;

pub const DEFAULT_HISTORY_PATH: &str = "barrage_history.db";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY,
    start_time TEXT NOT NULL,
    scenario TEXT NOT NULL,
    passed INTEGER NOT NULL,
    summary_json TEXT NOT NULL
)";

/// One row of the run history listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: i64,
    pub start_time: String,
    pub scenario: String,
    pub passed: bool,
}

/// SQLite-backed log of finished runs.
pub struct HistoryDb {
    conn: Connection,
}

impl HistoryDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open history database {}", path.display()))?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self { conn })
    }

    pub fn save_run(&self, report: &Report) -> Result<i64> {
        let summary_json = serde_json::to_string(report)?;

        self.conn.execute(
            "INSERT INTO runs (start_time, scenario, passed, summary_json) VALUES (?1, ?2, ?3, ?4)",
            params![report.started_at, report.scenario, report.passed, summary_json],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, start_time, scenario, passed FROM runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(RunRecord {
                id: row.get(0)?,
                start_time: row.get(1)?,
                scenario: row.get(2)?,
                passed: row.get(3)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn get_report(&self, id: i64) -> Result<Report> {
        let summary_json: String = self
            .conn
            .query_row(
                "SELECT summary_json FROM runs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .with_context(|| format!("no run with id {}", id))?;

        let report: Report = serde_json::from_str(&summary_json)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::sink::MetricsSnapshot;
    use std::collections::BTreeMap;

    fn create_test_report(scenario: &str, passed: bool) -> Report {
        let mut metrics = MetricsSnapshot::default();
        metrics.counters.insert("http_reqs".to_string(), 1000);
        Report {
            scenario: scenario.to_string(),
            tags: BTreeMap::new(),
            started_at: "2026-03-01T12:00:00+00:00".to_string(),
            run_duration_ms: 90_000,
            peak_vus: 300,
            iterations: 1000,
            outcomes: BTreeMap::from([("queued".to_string(), 1000)]),
            metrics,
            thresholds: Vec::new(),
            passed,
            aborted: false,
            inventory: None,
        }
    }

    #[test]
    fn test_history_db_save_and_list() {
        let db = HistoryDb::open_memory().unwrap();
        let id = db
            .save_run(&create_test_report("coupon-issue", true))
            .unwrap();
        assert!(id > 0);

        let runs = db.list_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, id);
        assert_eq!(runs[0].scenario, "coupon-issue");
        assert!(runs[0].passed);
    }

    #[test]
    fn test_history_db_get_report() {
        let db = HistoryDb::open_memory().unwrap();
        let id = db
            .save_run(&create_test_report("popular-products", false))
            .unwrap();

        let loaded = db.get_report(id).unwrap();
        assert_eq!(loaded.iterations, 1000);
        assert_eq!(loaded.metrics.counter("http_reqs"), 1000);
        assert!(!loaded.passed);
        assert!(db.get_report(id + 100).is_err());
    }

    #[test]
    fn test_history_db_list_limit() {
        let db = HistoryDb::open_memory().unwrap();
        for i in 0..5 {
            db.save_run(&create_test_report(&format!("scenario_{}", i), i % 2 == 0))
                .unwrap();
        }

        let runs = db.list_runs(3).unwrap();
        assert_eq!(runs.len(), 3);
        // newest first
        assert!(runs[0].id > runs[1].id);
    }

    #[test]
    fn test_history_db_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let db = HistoryDb::open(&path).unwrap();
            db.save_run(&create_test_report("coupon-issue", true)).unwrap();
        }
        let db = HistoryDb::open(&path).unwrap();
        assert_eq!(db.list_runs(10).unwrap().len(), 1);
    }
}
