//! CSV ingestion of the crash dataset.
//!
//! The file's first row is a header; every following row maps positionally
//! onto a `CrashRecord` (13 columns). Numeric cells tolerate empty or
//! garbage values and default to zero. Each row is stored under the
//! synthetic key `crash_<i>`, `i` counting from 0 within one load call.

use std::path::Path;

use chrono::Utc;
use csv::ReaderBuilder;
use overlay_protocol::types::{CrashRecord, DataEntry, DataValue};

use super::errors::StoreError;
use super::LocalStore;

fn cell(record: &csv::StringRecord, index: usize) -> String {
    record.get(index).unwrap_or("").trim().to_string()
}

fn int_cell(record: &csv::StringRecord, index: usize) -> i32 {
    record
        .get(index)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(0)
}

fn float_cell(record: &csv::StringRecord, index: usize) -> f64 {
    record
        .get(index)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(0.0)
}

impl LocalStore {
    /// Loads a crash dataset CSV into the store. Returns the number of rows
    /// stored.
    pub fn load_csv(&self, path: &Path) -> Result<usize, StoreError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let mut stored = 0usize;
        let now = Utc::now().timestamp_millis();

        for (i, row) in reader.records().enumerate() {
            let row = row?;

            let record = CrashRecord {
                date: cell(&row, 0),
                time: cell(&row, 1),
                borough: cell(&row, 2),
                zip: cell(&row, 3),
                lat: float_cell(&row, 4),
                lon: float_cell(&row, 5),
                location: cell(&row, 6),
                on_street: cell(&row, 7),
                cross_street: cell(&row, 8),
                off_street: cell(&row, 9),
                injured: int_cell(&row, 10),
                killed: int_cell(&row, 11),
                pedestrians: int_cell(&row, 12),
            };

            self.store(DataEntry::new(
                format!("crash_{}", i),
                DataValue::Crash(record),
                now,
            ))?;
            stored += 1;
        }

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HEADER: &str = "CRASH DATE,CRASH TIME,BOROUGH,ZIP CODE,LATITUDE,LONGITUDE,LOCATION,ON STREET NAME,CROSS STREET NAME,OFF STREET NAME,NUMBER OF PERSONS INJURED,NUMBER OF PERSONS KILLED,NUMBER OF PEDESTRIANS INJURED\n";

    fn write_temp_csv(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        fs::write(&path, format!("{}{}", HEADER, body)).expect("write csv");
        path
    }

    #[test]
    fn test_load_csv_counts_and_keys() {
        let path = write_temp_csv(
            "overlay_store_basic.csv",
            "01/15/2021,14:30,BROOKLYN,11201,40.69,-73.99,\"(40.69, -73.99)\",ATLANTIC AVENUE,COURT STREET,,2,0,1\n\
             02/01/2021,09:10,QUEENS,11101,40.74,-73.93,\"(40.74, -73.93)\",QUEENS BOULEVARD,,,0,1,0\n",
        );

        let store = LocalStore::new();
        let loaded = store.load_csv(&path).expect("load");

        assert_eq!(loaded, 2);
        let entry = store.get("crash_0").expect("get").expect("row 0");
        match entry.value {
            DataValue::Crash(record) => {
                assert_eq!(record.borough, "BROOKLYN");
                assert_eq!(record.injured, 2);
                assert_eq!(record.on_street, "ATLANTIC AVENUE");
                assert!((record.lat - 40.69).abs() < 1e-9);
            }
            other => panic!("expected crash record, got {:?}", other),
        }

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_csv_tolerates_empty_numerics() {
        let path = write_temp_csv(
            "overlay_store_empty_cells.csv",
            "01/15/2021,14:30,BRONX,,,,,GRAND CONCOURSE,,,,,\n",
        );

        let store = LocalStore::new();
        let loaded = store.load_csv(&path).expect("load");

        assert_eq!(loaded, 1);
        let entry = store.get("crash_0").expect("get").expect("row 0");
        match entry.value {
            DataValue::Crash(record) => {
                assert_eq!(record.injured, 0);
                assert_eq!(record.killed, 0);
                assert_eq!(record.lat, 0.0);
            }
            other => panic!("expected crash record, got {:?}", other),
        }

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_csv_missing_file() {
        let store = LocalStore::new();

        let result = store.load_csv(Path::new("/definitely/not/here.csv"));

        assert!(result.is_err());
    }
}
