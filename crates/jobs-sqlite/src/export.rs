use crate::{Db, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

impl Db {
    /// Writes every stored job to `path` as CSV with a header row. Returns the row count.
    pub fn export_csv(&self, path: &Path) -> Result<usize> {
        let jobs = self.all()?;
        let mut w = csv::Writer::from_path(path)?;
        for job in &jobs {
            w.serialize(job)?;
        }
        w.flush()?;
        Ok(jobs.len())
    }

    pub fn export_json(&self, path: &Path) -> Result<usize> {
        let jobs = self.all()?;
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, &jobs)?;
        w.flush()?;
        Ok(jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobwatch_core::{CanonicalJob, RawPosting};

    #[test]
    fn exports_csv_and_json() {
        let db = Db::open_in_memory().unwrap();
        for (i, title) in ["Rust Dev", "QA, Manual"].iter().enumerate() {
            let raw = RawPosting::new("linkedin", title, "Acme", "https://jobs.example/x");
            db.upsert(&CanonicalJob::from_raw(&raw, i as i64).unwrap()).unwrap();
        }
        let dir = tempfile::tempdir().unwrap();

        let csv_path = dir.path().join("jobs.csv");
        assert_eq!(db.export_csv(&csv_path).unwrap(), 2);
        let mut rdr = csv::Reader::from_path(&csv_path).unwrap();
        assert!(rdr.headers().unwrap().iter().any(|h| h == "fingerprint"));
        assert_eq!(rdr.records().count(), 2);

        let json_path = dir.path().join("jobs.json");
        assert_eq!(db.export_json(&json_path).unwrap(), 2);
        let back: Vec<CanonicalJob> = serde_json::from_reader(File::open(&json_path).unwrap()).unwrap();
        assert_eq!(back[0].title, "QA, Manual");
    }
}
