use crate::{Db, ProxyStatRow, Result, RunRecord};
use jobwatch_core::{now_ms, CanonicalJob};
use rusqlite::{params, OptionalExtension, Row};
use std::time::Duration;

const JOB_COLUMNS: &str = "fingerprint,title,company,location,url,source,description,experience,salary,posted_date,keyword_matched,scraped_at_ms,published_at_ms,delivery_id";

fn row_to_job(r: &Row<'_>) -> rusqlite::Result<CanonicalJob> {
    Ok(CanonicalJob {
        fingerprint: r.get(0)?,
        title: r.get(1)?,
        company: r.get(2)?,
        location: r.get(3)?,
        url: r.get(4)?,
        source: r.get(5)?,
        description: r.get(6)?,
        experience: r.get(7)?,
        salary: r.get(8)?,
        posted_date: r.get(9)?,
        keyword_matched: r.get(10)?,
        scraped_at_ms: r.get(11)?,
        published_at_ms: r.get(12)?,
        delivery_id: r.get(13)?,
    })
}

fn window_ms(d: Duration) -> i64 { i64::try_from(d.as_millis()).unwrap_or(i64::MAX) }

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let cnt: i64 = conn.query_row(
                "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
                [name],
                |r| r.get(0),
            )?;
            Ok(cnt > 0)
        })
    }

    fn select_jobs(&self, tail: &str, args: impl rusqlite::Params) -> Result<Vec<CanonicalJob>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs {tail}"))?;
            let rows = stmt.query_map(args, row_to_job)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn get(&self, fingerprint: &str) -> Result<Option<CanonicalJob>> {
        self.with_conn(|conn| {
            let job = conn
                .query_row(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE fingerprint=?"), [fingerprint], row_to_job)
                .optional()?;
            Ok(job)
        })
    }

    pub fn created_at_ms(&self, fingerprint: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT created_at_ms FROM jobs WHERE fingerprint=?", [fingerprint], |r| r.get(0))
                .optional()?)
        })
    }

    /// Records last seen within `window` of now, newest first.
    pub fn query_recent(&self, window: Duration) -> Result<Vec<CanonicalJob>> {
        self.seen_since(now_ms().saturating_sub(window_ms(window)))
    }

    pub fn seen_since(&self, cutoff_ms: i64) -> Result<Vec<CanonicalJob>> {
        self.select_jobs(
            "WHERE scraped_at_ms >= ? ORDER BY scraped_at_ms DESC, created_at_ms DESC",
            params![cutoff_ms],
        )
    }

    /// Deletes records not seen within `age`. Returns how many were removed.
    pub fn purge_older_than(&self, age: Duration) -> Result<u64> {
        self.purge_before(now_ms().saturating_sub(window_ms(age)))
    }

    pub fn purge_before(&self, cutoff_ms: i64) -> Result<u64> {
        let n = self.with_conn(|conn| Ok(conn.execute("DELETE FROM jobs WHERE scraped_at_ms < ?", [cutoff_ms])?))?;
        if n > 0 {
            tracing::info!(removed = n, "purged stale jobs");
        }
        Ok(n as u64)
    }

    /// Never-published records, most recently seen first.
    pub fn unpublished(&self, limit: usize) -> Result<Vec<CanonicalJob>> {
        self.select_jobs(
            "WHERE published_at_ms IS NULL ORDER BY scraped_at_ms DESC, created_at_ms DESC LIMIT ?",
            params![limit as i64],
        )
    }

    pub fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(1) FROM jobs", [], |r| r.get(0))?;
            Ok(n as u64)
        })
    }

    pub fn counts_by_source(&self) -> Result<Vec<(String, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT source, COUNT(1) FROM jobs GROUP BY source ORDER BY source")?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64)))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn by_source(&self, source: &str, limit: usize) -> Result<Vec<CanonicalJob>> {
        self.select_jobs(
            "WHERE source=? ORDER BY scraped_at_ms DESC LIMIT ?",
            params![source.to_lowercase(), limit as i64],
        )
    }

    /// Case-insensitive substring match on title, company or location.
    pub fn search(&self, text: &str, limit: usize) -> Result<Vec<CanonicalJob>> {
        let escaped = text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let pattern = format!("%{escaped}%");
        self.select_jobs(
            "WHERE title LIKE ?1 ESCAPE '\\' OR company LIKE ?1 ESCAPE '\\' OR location LIKE ?1 ESCAPE '\\' \
             ORDER BY scraped_at_ms DESC LIMIT ?2",
            params![pattern, limit as i64],
        )
    }

    pub fn all(&self) -> Result<Vec<CanonicalJob>> {
        self.select_jobs("ORDER BY scraped_at_ms DESC", [])
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let raw: Vec<(String, i64, Option<i64>, String, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, run_started_ms, ended_at_ms, status, stats_json FROM run_stats ORDER BY run_started_ms DESC, id DESC LIMIT ?",
            )?;
            let rows = stmt.query_map([limit as i64], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;
        raw.into_iter()
            .map(|(run_id, started_at_ms, ended_at_ms, status, json)| -> Result<RunRecord> {
                Ok(RunRecord { run_id, started_at_ms, ended_at_ms, status, stats: serde_json::from_str(&json)? })
            })
            .collect()
    }

    pub fn proxy_stats(&self) -> Result<Vec<ProxyStatRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT address,total_successes,total_failures,consecutive_failures,blacklisted,blacklisted_until_ms FROM proxy_stats ORDER BY address",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(ProxyStatRow {
                    address: r.get(0)?,
                    total_successes: r.get::<_, i64>(1)? as u64,
                    total_failures: r.get::<_, i64>(2)? as u64,
                    consecutive_failures: r.get(3)?,
                    blacklisted: r.get::<_, i64>(4)? != 0,
                    blacklisted_until_ms: r.get(5)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
