pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE jobs (
  fingerprint     TEXT PRIMARY KEY,
  title           TEXT NOT NULL,
  company         TEXT NOT NULL,
  location        TEXT NOT NULL DEFAULT '',
  url             TEXT NOT NULL,
  source          TEXT NOT NULL,
  description     TEXT,
  experience      TEXT,
  salary          TEXT,
  posted_date     TEXT,
  keyword_matched TEXT NOT NULL DEFAULT '',
  created_at_ms   INTEGER NOT NULL,
  scraped_at_ms   INTEGER NOT NULL,
  published_at_ms INTEGER,
  delivery_id     TEXT
);

CREATE TABLE run_stats (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  run_started_ms  INTEGER NOT NULL,
  run_id          TEXT NOT NULL,
  ended_at_ms     INTEGER,
  status          TEXT NOT NULL CHECK (status IN ('completed','cancelled')),
  stats_json      TEXT NOT NULL
);

CREATE TABLE proxy_stats (
  address              TEXT PRIMARY KEY,
  total_successes      INTEGER NOT NULL DEFAULT 0,
  total_failures       INTEGER NOT NULL DEFAULT 0,
  consecutive_failures INTEGER NOT NULL DEFAULT 0,
  blacklisted          INTEGER NOT NULL CHECK (blacklisted IN (0,1)) DEFAULT 0,
  blacklisted_until_ms INTEGER,
  updated_at_ms        INTEGER NOT NULL
);

CREATE INDEX idx_jobs_scraped ON jobs(scraped_at_ms);
CREATE INDEX idx_jobs_source ON jobs(source);
CREATE INDEX idx_jobs_published ON jobs(published_at_ms);
CREATE INDEX idx_run_stats_started ON run_stats(run_started_ms);

COMMIT;
"#
;
