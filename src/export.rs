use anyhow::{Context, Result};
use chrono::Utc;
use csv::Writer;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;

/// Writes `data` to a fresh CSV file with a header row.
pub fn save_to_csv<T: Serialize, P: AsRef<Path>>(data: &[T], file_path: P) -> Result<()> {
    let path = file_path.as_ref();
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut wtr = Writer::from_writer(file);

    for row in data {
        wtr.serialize(row)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn generate_filename(prefix: &str) -> String {
    let now = Utc::now();
    format!("{}_{}.csv", prefix, now.format("%Y%m%d_%H%M%S"))
}
