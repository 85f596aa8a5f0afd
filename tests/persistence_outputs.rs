//! Output files of a simulated run: spreadsheets, consolidated store, journal, metadata.

mod common;

use common::{grid, journal, read_lines, rig, simulated_config};
use harmonic_sweep::data::{RunSink, StoreBackend, TableSink};
use harmonic_sweep::measurement::COLUMNS;
use harmonic_sweep::metadata::{RunMetadata, RunMetadataBuilder};
use tempfile::tempdir;

#[tokio::test(start_paused = true)]
async fn simulated_run_writes_every_output() {
    let dir = tempdir().unwrap();
    let sweep = grid((100.0, 110.0, 10.0), (0.0, 2.0, 1.0));
    let config = simulated_config(dir.path(), sweep);
    let storage = &config.storage;
    let (mut controller, _) = rig(&config, Vec::new());
    let journal = journal(&config);

    let metadata_path = storage
        .output_dir
        .join(format!("{}_metadata.json", storage.file_prefix));
    RunMetadataBuilder::from_config(&config)
        .build()
        .write_json(&metadata_path)
        .unwrap();

    let mut sink =
        RunSink::open(&storage.output_dir, &storage.file_prefix, StoreBackend::Csv).unwrap();
    let report = controller
        .run(&config.sweep, &mut sink, &journal)
        .await
        .unwrap();
    sink.close().await.unwrap();
    assert!(report.is_clean());

    for key in ["100", "110"] {
        let path = storage
            .output_dir
            .join(format!("{}_{}.csv", storage.file_prefix, key));
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader
            .headers()
            .unwrap()
            .iter()
            .map(str::to_string)
            .collect();
        assert_eq!(header, COLUMNS);
        assert_eq!(reader.records().count(), 3);
    }

    let store = storage
        .output_dir
        .join(format!("{}_store.csv", storage.file_prefix));
    let mut reader = csv::Reader::from_path(&store).unwrap();
    assert_eq!(&reader.headers().unwrap()[0], "table");
    let tags: Vec<String> = reader
        .records()
        .map(|r| r.unwrap()[0].to_string())
        .collect();
    assert_eq!(tags, vec!["f100", "f100", "f100", "f110", "f110", "f110"]);

    assert!(read_lines(journal.error_log()).is_empty());
    let finish = read_lines(journal.finish_marker());
    assert_eq!(finish.len(), 1);
    assert!(finish[0].starts_with("Measurement done in "));

    let metadata: RunMetadata =
        serde_json::from_str(&std::fs::read_to_string(&metadata_path).unwrap()).unwrap();
    assert_eq!(metadata.grid, config.sweep);
    assert_eq!(metadata.devices["lockin"], "dev1234");
}

#[tokio::test(start_paused = true)]
async fn aborted_run_keeps_tables_written_so_far() {
    let dir = tempdir().unwrap();
    let sweep = grid((100.0, 120.0, 10.0), (0.0, 1.0, 1.0));
    let mut config = simulated_config(dir.path(), sweep);
    config.storage.file_prefix = "Aborted".to_string();
    let storage = &config.storage;

    let (mut controller, _) = rig(&config, Vec::new());
    let mut sink =
        RunSink::open(&storage.output_dir, &storage.file_prefix, StoreBackend::Csv).unwrap();
    let first = controller
        .run(&grid((100.0, 100.0, 1.0), (0.0, 1.0, 1.0)), &mut sink, &journal(&config))
        .await
        .unwrap();
    assert_eq!(first.tables, vec!["100"]);

    // A second sweep into the same store repeats table 100.
    let second = controller
        .run(&config.sweep, &mut sink, &journal(&config))
        .await;
    assert!(second.is_err(), "table 100 is already in the store");
    drop(sink);

    let store = storage.output_dir.join("Aborted_store.csv");
    let mut reader = csv::Reader::from_path(&store).unwrap();
    assert_eq!(reader.records().count(), 2);
}
