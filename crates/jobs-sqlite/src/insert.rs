use crate::{BatchOutcome, Db, ProxyStatRow, Result, RunStatus};
use jobwatch_core::{CanonicalJob, RunStatistics};
use rusqlite::{ffi, params, Connection, ErrorCode};

const INSERT_JOB: &str = "INSERT INTO jobs(fingerprint,title,company,location,url,source,description,experience,salary,posted_date,keyword_matched,created_at_ms,scraped_at_ms) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)";

// Identity, source, creation time and publish state survive a re-sighting.
const REFRESH_JOB: &str = "UPDATE jobs SET title=?, company=?, location=?, url=?, description=COALESCE(?,description), experience=COALESCE(?,experience), salary=COALESCE(?,salary), posted_date=COALESCE(?,posted_date), keyword_matched=?, scraped_at_ms=? WHERE fingerprint=?";

impl Db {
    /// Inserts the job, or refreshes the stored record if its fingerprint is already
    /// known. Returns true when the record is new.
    pub fn upsert(&self, job: &CanonicalJob) -> Result<bool> {
        self.with_conn(|conn| upsert_on(conn, job))
    }

    /// Upserts in order. A failing record is logged and counted, the rest still land.
    pub fn upsert_many(&self, jobs: &[CanonicalJob]) -> BatchOutcome {
        let mut out = BatchOutcome::default();
        for job in jobs {
            match self.upsert(job) {
                Ok(true) => out.new += 1,
                Ok(false) => out.duplicate += 1,
                Err(e) => {
                    tracing::warn!(fingerprint = %job.fingerprint, url = %job.url, error = %e, "failed to store job");
                    out.errors += 1;
                }
            }
        }
        out
    }

    pub fn mark_published(&self, fingerprint: &str, delivery_id: &str, at_ms: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE jobs SET published_at_ms=?, delivery_id=? WHERE fingerprint=?",
                params![at_ms, delivery_id, fingerprint],
            )?;
            Ok(n > 0)
        })
    }

    pub fn record_run(&self, stats: &RunStatistics, status: RunStatus) -> Result<()> {
        let json = serde_json::to_string(stats)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO run_stats(run_started_ms,run_id,ended_at_ms,status,stats_json) VALUES (?,?,?,?,?)",
                params![stats.started_at_ms, stats.run_id, stats.ended_at_ms, status.as_str(), json],
            )?;
            Ok(())
        })
    }

    pub fn save_proxy_stats(&self, rows: &[ProxyStatRow], at_ms: i64) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO proxy_stats(address,total_successes,total_failures,consecutive_failures,blacklisted,blacklisted_until_ms,updated_at_ms) VALUES (?,?,?,?,?,?,?) \
                     ON CONFLICT(address) DO UPDATE SET total_successes=excluded.total_successes, total_failures=excluded.total_failures, consecutive_failures=excluded.consecutive_failures, blacklisted=excluded.blacklisted, blacklisted_until_ms=excluded.blacklisted_until_ms, updated_at_ms=excluded.updated_at_ms",
                )?;
                for r in rows {
                    stmt.execute(params![
                        r.address,
                        r.total_successes as i64,
                        r.total_failures as i64,
                        r.consecutive_failures,
                        r.blacklisted as i64,
                        r.blacklisted_until_ms,
                        at_ms
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

fn upsert_on(conn: &Connection, job: &CanonicalJob) -> Result<bool> {
    let inserted = conn.execute(
        INSERT_JOB,
        params![
            job.fingerprint,
            job.title,
            job.company,
            job.location,
            job.url,
            job.source,
            job.description,
            job.experience,
            job.salary,
            job.posted_date,
            job.keyword_matched,
            job.scraped_at_ms,
            job.scraped_at_ms
        ],
    );
    match inserted {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(e, _)) if is_key_conflict(&e) => {
            conn.execute(
                REFRESH_JOB,
                params![
                    job.title,
                    job.company,
                    job.location,
                    job.url,
                    job.description,
                    job.experience,
                    job.salary,
                    job.posted_date,
                    job.keyword_matched,
                    job.scraped_at_ms,
                    job.fingerprint
                ],
            )?;
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn is_key_conflict(e: &ffi::Error) -> bool {
    e.code == ErrorCode::ConstraintViolation
        && (e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobwatch_core::RawPosting;
    use std::sync::Arc;

    fn job(title: &str, company: &str, source: &str, at: i64) -> CanonicalJob {
        let raw = RawPosting::new(source, title, company, "https://jobs.example/1").with_location("Pune");
        CanonicalJob::from_raw(&raw, at).unwrap()
    }

    #[test]
    fn second_sighting_is_a_duplicate() {
        let db = Db::open_in_memory().unwrap();
        let j = job("Backend Engineer", "Acme", "linkedin", 1_000);
        assert_eq!(db.upsert_many(std::slice::from_ref(&j)).counts(), (1, 0));
        assert_eq!(db.upsert_many(std::slice::from_ref(&j)).counts(), (0, 1));
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn duplicate_refreshes_timestamp_but_keeps_creation_and_publish_state() {
        let db = Db::open_in_memory().unwrap();
        let first = job("Backend Engineer", "Acme", "linkedin", 1_000);
        assert!(db.upsert(&first).unwrap());
        assert!(db.mark_published(&first.fingerprint, "msg-7", 1_500).unwrap());

        let mut again = job("  backend   ENGINEER ", "ACME", "LinkedIn", 9_000);
        again.location = "Remote".into();
        assert_eq!(again.fingerprint, first.fingerprint);
        assert!(!db.upsert(&again).unwrap());

        let stored = db.get(&first.fingerprint).unwrap().unwrap();
        assert_eq!(stored.scraped_at_ms, 9_000);
        assert_eq!(stored.location, "Remote");
        assert_eq!(stored.published_at_ms, Some(1_500));
        assert_eq!(stored.delivery_id.as_deref(), Some("msg-7"));
        assert_eq!(db.created_at_ms(&first.fingerprint).unwrap(), Some(1_000));
    }

    #[test]
    fn failed_write_is_counted_and_the_batch_continues() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|c| {
            c.execute_batch(
                "CREATE TRIGGER reject_broken BEFORE INSERT ON jobs WHEN NEW.title = 'Broken Role'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )?;
            Ok(())
        })
        .unwrap();
        let batch = vec![
            job("Analyst", "Acme", "linkedin", 1),
            job("Broken Role", "Acme", "linkedin", 1),
            job("Tester", "Acme", "linkedin", 1),
        ];
        let out = db.upsert_many(&batch);
        assert_eq!(out, BatchOutcome { new: 2, duplicate: 0, errors: 1 });
        assert_eq!(db.count().unwrap(), 2);
        assert!(db.get(&batch[2].fingerprint).unwrap().is_some());
    }

    #[test]
    fn same_title_and_company_on_other_source_is_new() {
        let db = Db::open_in_memory().unwrap();
        let out = db.upsert_many(&[job("SRE", "Acme", "linkedin", 1), job("SRE", "Acme", "indeed", 1)]);
        assert_eq!(out.counts(), (2, 0));
    }

    #[test]
    fn concurrent_upserts_of_one_fingerprint_yield_one_record() {
        let db = Arc::new(Db::open_in_memory().unwrap());
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let db = db.clone();
                std::thread::spawn(move || db.upsert(&job("SRE", "Acme", "naukri", 10 + i)).unwrap())
            })
            .collect();
        let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|new| **new).count(), 1);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn run_log_is_append_only() {
        let db = Db::open_in_memory().unwrap();
        let mut stats = RunStatistics::start("r1", 100);
        stats.source_mut("linkedin").found = 3;
        stats.finish(200);
        db.record_run(&stats, RunStatus::Completed).unwrap();
        db.record_run(&RunStatistics::start("r2", 300), RunStatus::Cancelled).unwrap();
        let runs = db.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "r2");
        assert_eq!(runs[1].stats.source("linkedin").unwrap().found, 3);
        assert_eq!(runs[1].status, "completed");
    }

    #[test]
    fn proxy_stats_upsert_by_address() {
        let db = Db::open_in_memory().unwrap();
        let mut row = ProxyStatRow {
            address: "http://10.0.0.1:8080".into(),
            total_successes: 1,
            total_failures: 0,
            consecutive_failures: 0,
            blacklisted: false,
            blacklisted_until_ms: None,
        };
        db.save_proxy_stats(std::slice::from_ref(&row), 1).unwrap();
        row.total_failures = 3;
        row.blacklisted = true;
        db.save_proxy_stats(std::slice::from_ref(&row), 2).unwrap();
        assert_eq!(db.proxy_stats().unwrap(), vec![row]);
    }
}
