//! Result-table sinks with clean feature flag handling.
use crate::error::{AppResult, SweepError};
use crate::measurement::{SweepTable, COLUMNS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Destination for per-frequency result tables.
#[async_trait]
pub trait TableSink: Send {
    /// Persist `table` under its key.
    async fn write_table(&mut self, table: &SweepTable) -> AppResult<()>;

    /// Flush and release the sink. Later writes fail.
    async fn close(&mut self) -> AppResult<()>;
}

/// Consolidated store format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One CSV file with a leading `table` column.
    #[default]
    Csv,
    /// One HDF5 file with a group per table.
    Hdf5,
}

fn ensure_dir(dir: &Path) -> AppResult<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| {
            SweepError::Persistence(format!(
                "Failed to create output directory at {:?}: {}",
                dir, e
            ))
        })?;
    }
    Ok(())
}

/// Store-local table name for `key`.
pub fn store_table_name(key: &str) -> String {
    format!("f{key}")
}

// ============================================================================
// Spreadsheet Writer
// ============================================================================

/// Writes each table to its own `<prefix>_<key>.csv`.
pub struct SpreadsheetWriter {
    output_dir: PathBuf,
    file_prefix: String,
}

impl SpreadsheetWriter {
    /// Writer rooted at `output_dir`; the directory is created on demand.
    pub fn new(output_dir: impl Into<PathBuf>, file_prefix: &str) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_prefix: file_prefix.to_string(),
        }
    }

    /// File that receives the table stored under `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.csv", self.file_prefix, key))
    }
}

#[async_trait]
impl TableSink for SpreadsheetWriter {
    async fn write_table(&mut self, table: &SweepTable) -> AppResult<()> {
        ensure_dir(&self.output_dir)?;
        let path = self.path_for(&table.key);
        let mut writer = csv::Writer::from_path(&path)?;
        if table.is_empty() {
            writer.write_record(COLUMNS)?;
        }
        for row in &table.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        debug!("Wrote {} rows to {}", table.len(), path.display());
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

// ============================================================================
// CSV Table Store
// ============================================================================

/// Consolidated CSV store: every table in one file, tagged by a `table` column.
///
/// The file is flushed after every table, so a run that aborts part-way
/// leaves the tables written so far intact.
pub struct CsvTableStore {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    keys: HashSet<String>,
}

impl CsvTableStore {
    /// Create (truncate) the store file and write its header.
    pub fn create(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        // header is written by hand; rows are serialized as (table, row) tuples
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)?;
        let mut header = vec!["table"];
        header.extend(COLUMNS);
        writer.write_record(&header)?;
        writer.flush()?;
        info!("CSV table store opened at '{}'.", path.display());
        Ok(Self {
            path,
            writer: Some(writer),
            keys: HashSet::new(),
        })
    }

    /// Store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TableSink for CsvTableStore {
    async fn write_table(&mut self, table: &SweepTable) -> AppResult<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            SweepError::Persistence(format!("Store '{}' is closed", self.path.display()))
        })?;
        if !self.keys.insert(table.key.clone()) {
            return Err(SweepError::Persistence(format!(
                "Table '{}' already exists in '{}'",
                table.key,
                self.path.display()
            )));
        }
        let name = store_table_name(&table.key);
        for row in &table.rows {
            writer.serialize((name.as_str(), row))?;
        }
        writer.flush()?;
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!("CSV table store closed: '{}'.", self.path.display());
        }
        Ok(())
    }
}

// ============================================================================
// HDF5 Table Store
// ============================================================================

#[cfg(feature = "storage_hdf5")]
mod hdf5_enabled {
    use super::*;

    /// Consolidated HDF5 store: one group per table, one dataset per column.
    pub struct Hdf5TableStore {
        path: PathBuf,
        file: Option<hdf5::File>,
    }

    impl Hdf5TableStore {
        /// Create (truncate) the store file.
        pub fn create(path: impl Into<PathBuf>) -> AppResult<Self> {
            let path = path.into();
            if let Some(parent) = path.parent() {
                ensure_dir(parent)?;
            }
            let file = hdf5::File::create(&path).map_err(|e| {
                SweepError::Persistence(format!("Failed to create HDF5 file at {:?}: {}", path, e))
            })?;
            info!("HDF5 table store opened at '{}'.", path.display());
            Ok(Self {
                path,
                file: Some(file),
            })
        }

        /// Store file path.
        pub fn path(&self) -> &Path {
            &self.path
        }

        fn write_group(file: &hdf5::File, table: &SweepTable) -> hdf5::Result<()> {
            let group = file.create_group(&store_table_name(&table.key))?;
            for name in COLUMNS {
                let values = table.column(name).unwrap_or_default();
                group
                    .new_dataset_builder()
                    .with_data(values.as_slice())
                    .create(name)?;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TableSink for Hdf5TableStore {
        async fn write_table(&mut self, table: &SweepTable) -> AppResult<()> {
            let file = self.file.as_ref().ok_or_else(|| {
                SweepError::Persistence(format!("Store '{}' is closed", self.path.display()))
            })?;
            let name = store_table_name(&table.key);
            if file.group(&name).is_ok() {
                return Err(SweepError::Persistence(format!(
                    "Table '{}' already exists in '{}'",
                    table.key,
                    self.path.display()
                )));
            }
            Self::write_group(file, table)
                .and_then(|()| file.flush())
                .map_err(|e| {
                    SweepError::Persistence(format!("Failed to write table '{}': {}", name, e))
                })
        }

        async fn close(&mut self) -> AppResult<()> {
            if let Some(file) = self.file.take() {
                file.flush()
                    .map_err(|e| SweepError::Persistence(format!("Failed to flush HDF5 file: {e}")))?;
                info!("HDF5 table store closed: '{}'.", self.path.display());
            }
            Ok(())
        }
    }
}

#[cfg(feature = "storage_hdf5")]
pub use hdf5_enabled::Hdf5TableStore;

/// Consolidated HDF5 store (requires the `storage_hdf5` feature).
#[cfg(not(feature = "storage_hdf5"))]
pub struct Hdf5TableStore;

#[cfg(not(feature = "storage_hdf5"))]
impl Hdf5TableStore {
    /// Always fails without HDF5 support.
    pub fn create(_path: impl Into<PathBuf>) -> AppResult<Self> {
        Err(SweepError::FeatureNotEnabled("storage_hdf5".to_string()))
    }
}

#[cfg(not(feature = "storage_hdf5"))]
#[async_trait]
impl TableSink for Hdf5TableStore {
    async fn write_table(&mut self, _table: &SweepTable) -> AppResult<()> {
        Err(SweepError::FeatureNotEnabled("storage_hdf5".to_string()))
    }

    async fn close(&mut self) -> AppResult<()> {
        Err(SweepError::FeatureNotEnabled("storage_hdf5".to_string()))
    }
}

// ============================================================================
// Run Sink
// ============================================================================

/// Fans every table out to the spreadsheet writer and the consolidated store.
///
/// A key is accepted once per run and is checked before any sink is
/// touched, so the spreadsheet and the store never disagree.
pub struct RunSink {
    sinks: Vec<Box<dyn TableSink>>,
    keys: HashSet<String>,
}

impl RunSink {
    /// Open the sinks of one run under `output_dir`.
    pub fn open(output_dir: &Path, file_prefix: &str, backend: StoreBackend) -> AppResult<Self> {
        ensure_dir(output_dir)?;
        let store: Box<dyn TableSink> = match backend {
            StoreBackend::Csv => Box::new(CsvTableStore::create(
                output_dir.join(format!("{file_prefix}_store.csv")),
            )?),
            StoreBackend::Hdf5 => Box::new(Hdf5TableStore::create(
                output_dir.join(format!("{file_prefix}.h5")),
            )?),
        };
        Ok(Self::from_sinks(vec![
            Box::new(SpreadsheetWriter::new(output_dir, file_prefix)),
            store,
        ]))
    }

    /// Fan out to arbitrary sinks.
    pub fn from_sinks(sinks: Vec<Box<dyn TableSink>>) -> Self {
        Self {
            sinks,
            keys: HashSet::new(),
        }
    }
}

#[async_trait]
impl TableSink for RunSink {
    async fn write_table(&mut self, table: &SweepTable) -> AppResult<()> {
        if !self.keys.insert(table.key.clone()) {
            return Err(SweepError::Persistence(format!(
                "Table '{}' was already written in this run",
                table.key
            )));
        }
        for sink in &mut self.sinks {
            sink.write_table(table).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        for sink in &mut self.sinks {
            sink.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::SweepRow;
    use tempfile::tempdir;

    fn table(key: &str, phases: &[f64]) -> SweepTable {
        SweepTable {
            key: key.to_string(),
            rows: phases
                .iter()
                .map(|p| SweepRow {
                    f_gen: 110.0,
                    phi_gen: *p,
                    f_ch1: 110.0,
                    r_ch1: 1.0,
                    phi_ch1: 0.0,
                    f_ch2: 220.0,
                    r_ch2: 1.0,
                    phi_ch2: *p - 0.5,
                    phi_delta_abs: 0.5,
                    phi_delta_rel: 0.0,
                    dt: 2.0,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_spreadsheet_per_key() {
        let dir = tempdir().unwrap();
        let mut writer = SpreadsheetWriter::new(dir.path(), "Run");
        writer.write_table(&table("110", &[0.0, 90.0])).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("Run_110.csv")).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(COLUMNS.join(",").as_str()));
        assert!(lines.next().unwrap().starts_with("110.0,0.0,"));
        assert!(lines.next().unwrap().starts_with("110.0,90.0,"));
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn test_spreadsheet_empty_table_has_header() {
        let dir = tempdir().unwrap();
        let mut writer = SpreadsheetWriter::new(dir.path().join("nested"), "Run");
        writer.write_table(&table("100", &[])).await.unwrap();
        let content = std::fs::read_to_string(writer.path_for("100")).unwrap();
        assert_eq!(content.trim_end(), COLUMNS.join(","));
    }

    #[tokio::test]
    async fn test_csv_store_tags_tables_and_rejects_duplicates() {
        let dir = tempdir().unwrap();
        let mut store = CsvTableStore::create(dir.path().join("store.csv")).unwrap();
        store.write_table(&table("100", &[0.0])).await.unwrap();
        store.write_table(&table("110", &[0.0, 1.0])).await.unwrap();
        let err = store.write_table(&table("100", &[5.0])).await.unwrap_err();
        assert!(matches!(err, SweepError::Persistence(_)));
        store.close().await.unwrap();

        let mut reader = csv::Reader::from_path(store.path()).unwrap();
        let tags: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[0].to_string())
            .collect();
        assert_eq!(tags, vec!["f100", "f110", "f110"]);
        assert!(store.write_table(&table("120", &[0.0])).await.is_err());
    }

    #[tokio::test]
    async fn test_run_sink_fans_out() {
        let dir = tempdir().unwrap();
        let mut sink = RunSink::open(dir.path(), "Run", StoreBackend::Csv).unwrap();
        sink.write_table(&table("100", &[0.0])).await.unwrap();
        sink.close().await.unwrap();

        assert!(dir.path().join("Run_100.csv").exists());
        let store = std::fs::read_to_string(dir.path().join("Run_store.csv")).unwrap();
        assert_eq!(store.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_store_and_spreadsheet_share_number_format() {
        let dir = tempdir().unwrap();
        let mut sink = RunSink::open(dir.path(), "Run", StoreBackend::Csv).unwrap();
        sink.write_table(&table("110", &[90.0])).await.unwrap();
        sink.close().await.unwrap();

        let sheet = std::fs::read_to_string(dir.path().join("Run_110.csv")).unwrap();
        let store = std::fs::read_to_string(dir.path().join("Run_store.csv")).unwrap();
        let sheet_row = sheet.lines().nth(1).unwrap();
        let store_row = store.lines().nth(1).unwrap();
        assert_eq!(store_row, format!("f110,{sheet_row}"));
        assert!(store_row.starts_with("f110,110.0,90.0,"));
    }

    #[tokio::test]
    async fn test_run_sink_rejects_repeated_key_before_writing() {
        let dir = tempdir().unwrap();
        let mut sink = RunSink::open(dir.path(), "Run", StoreBackend::Csv).unwrap();
        sink.write_table(&table("100", &[0.0, 1.0])).await.unwrap();

        let err = sink.write_table(&table("100", &[7.0])).await.unwrap_err();
        assert!(matches!(err, SweepError::Persistence(_)));
        sink.close().await.unwrap();

        let mut sheet = csv::Reader::from_path(dir.path().join("Run_100.csv")).unwrap();
        let phases: Vec<String> = sheet
            .records()
            .map(|r| r.unwrap()[1].to_string())
            .collect();
        assert_eq!(phases, vec!["0.0", "1.0"]);
        let store = std::fs::read_to_string(dir.path().join("Run_store.csv")).unwrap();
        assert_eq!(store.lines().count(), 3);
    }

    #[cfg(not(feature = "storage_hdf5"))]
    #[test]
    fn test_hdf5_without_feature() {
        let dir = tempdir().unwrap();
        let result = RunSink::open(dir.path(), "Run", StoreBackend::Hdf5);
        assert!(matches!(result, Err(SweepError::FeatureNotEnabled(_))));
    }
}
