//! Rejected-record log: one JSON object per line

use chrono::NaiveDate;
use etl_core::batch::RejectedRecord;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// `<input>.<YYYY-MM-DD>.log` next to the input file
pub fn default_path(input: &Path, date: NaiveDate) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(format!(".{}.log", date.format("%Y-%m-%d")));
    PathBuf::from(name)
}

/// Write `rejected` to `path`. Nothing is created when there is nothing
/// to write.
pub fn write(path: &Path, rejected: &[RejectedRecord]) -> Result<usize> {
    if rejected.is_empty() {
        return Ok(0);
    }

    let mut out = BufWriter::new(File::create(path)?);
    for record in rejected {
        serde_json::to_writer(&mut out, &record.to_json())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(rejected.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_core::value::raw_record;

    #[test]
    fn test_default_path() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let path = default_path(Path::new("/this/is/somewhere/filesystem.csv"), date);
        assert_eq!(path, PathBuf::from("/this/is/somewhere/filesystem.csv.2024-03-09.log"));
    }

    #[test]
    fn test_write_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rejects.log");
        let rejected = vec![
            RejectedRecord {
                ordinal: 2,
                reason: "bad value".to_string(),
                record: Some(raw_record([("name", "x")])),
            },
            RejectedRecord {
                ordinal: 5,
                reason: "Malformed row in line 6".to_string(),
                record: None,
            },
        ];

        assert_eq!(write(&path, &rejected).unwrap(), 2);
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["record"]["name"], "x");
        assert!(lines[1]["record"].is_null());
    }

    #[test]
    fn test_nothing_written_without_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rejects.log");
        assert_eq!(write(&path, &[]).unwrap(), 0);
        assert!(!path.exists());
    }
}
