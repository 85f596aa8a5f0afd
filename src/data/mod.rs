//! Result persistence and the run journal.

pub mod journal;
pub mod storage;

pub use journal::RunJournal;
pub use storage::{
    CsvTableStore, Hdf5TableStore, RunSink, SpreadsheetWriter, StoreBackend, TableSink,
};
