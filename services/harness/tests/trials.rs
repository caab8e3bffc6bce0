use std::{
    path::PathBuf,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use harness::{StablePolicy, TrialSpec, reduce_to_stable, run_trial};
use schema::{AnalysisKind, ExperimentConfig, FieldMode};
use store::{IndexReader, StorageSpec};
use textgen::generate_word_pool;

fn temp_dir_for(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic")
        .as_nanos();
    std::env::temp_dir().join(format!("harness-test-{tag}-{}-{nanos}", std::process::id()))
}

fn small_config(analysis: AnalysisKind) -> ExperimentConfig {
    ExperimentConfig {
        distinct_word_count: 50,
        word_length: 6,
        document_count: 300,
        words_per_document: 12,
        analysis,
    }
}

fn empty_config(document_count: usize) -> ExperimentConfig {
    ExperimentConfig {
        distinct_word_count: 1,
        word_length: 1,
        document_count,
        words_per_document: 0,
        analysis: AnalysisKind::Standard,
    }
}

#[test]
fn byte_counts_are_idempotent_across_fresh_trials() {
    let config = small_config(AnalysisKind::Standard);
    let pool = generate_word_pool(config.word_length, config.distinct_word_count, 42);
    let spec = TrialSpec::new(StorageSpec::InMemory);

    let first = run_trial(&config, &spec, &pool).unwrap();
    let second = run_trial(&config, &spec, &pool).unwrap();
    assert!(first.measurement.total_bytes > 0);
    assert_eq!(
        first.measurement.total_bytes,
        second.measurement.total_bytes
    );
}

#[test]
fn empty_index_baseline_and_single_empty_document() {
    let spec = TrialSpec::new(StorageSpec::InMemory);
    let baseline = run_trial(&empty_config(0), &spec, &[]).unwrap();
    assert!(baseline.measurement.total_bytes > 0);

    let one_document = run_trial(&empty_config(1), &spec, &[]).unwrap();
    assert!(one_document.measurement.total_bytes >= baseline.measurement.total_bytes);
}

#[test]
fn incremental_commits_are_counted() {
    let spec = TrialSpec {
        commit_every: Some(100),
        ..TrialSpec::new(StorageSpec::InMemory)
    };
    let outcome = run_trial(&empty_config(300), &spec, &[]).unwrap();
    assert_eq!(outcome.commits, 3);

    let no_incremental = run_trial(&empty_config(300), &TrialSpec::new(StorageSpec::InMemory), &[])
        .unwrap();
    assert_eq!(no_incremental.commits, 0);
}

#[test]
fn stored_and_indexed_carries_both_overheads() {
    let config = small_config(AnalysisKind::Standard);
    let pool = generate_word_pool(config.word_length, config.distinct_word_count, 42);
    let bytes_for_mode = |mode: FieldMode| {
        let spec = TrialSpec {
            field_mode: mode,
            ..TrialSpec::new(StorageSpec::InMemory)
        };
        run_trial(&config, &spec, &pool)
            .unwrap()
            .measurement
            .total_bytes
    };

    let indexed = bytes_for_mode(FieldMode::IndexedOnly);
    let stored = bytes_for_mode(FieldMode::StoredOnly);
    let both = bytes_for_mode(FieldMode::StoredAndIndexed);

    assert!(both >= indexed);
    assert!(both >= stored);
    // Indexing and storing are additive overheads over one shared skeleton,
    // so carrying both never costs more than the two single-mode indexes.
    assert!(both <= indexed + stored);
}

#[test]
fn indexed_trials_are_searchable_and_stored_only_trials_are_not() {
    let config = small_config(AnalysisKind::Standard);
    let pool = generate_word_pool(config.word_length, config.distinct_word_count, 42);

    let total_hits_for_mode = |tag: &str, mode: FieldMode| {
        let root = temp_dir_for(tag);
        let storage_spec = StorageSpec::file_backed(&root);
        let spec = TrialSpec {
            field_mode: mode,
            ..TrialSpec::new(storage_spec.clone())
        };
        run_trial(&config, &spec, &pool).unwrap();

        let storage = storage_spec.open().unwrap();
        let reader = IndexReader::open(&storage).unwrap();
        let hits: usize = pool
            .iter()
            .map(|word| reader.search("body", word, 1_000).len())
            .sum();
        let _ = std::fs::remove_dir_all(&root);
        hits
    };

    assert!(total_hits_for_mode("searchable", FieldMode::IndexedOnly) > 0);
    assert_eq!(total_hits_for_mode("unsearchable", FieldMode::StoredOnly), 0);
}

#[test]
fn reduce_to_stable_drives_real_trials() {
    let mut config = small_config(AnalysisKind::Keyword);
    config.document_count = 50;
    let pool = generate_word_pool(config.word_length, config.distinct_word_count, 42);
    let spec = TrialSpec::new(StorageSpec::InMemory);
    let policy = StablePolicy {
        min_iterations: 3,
        min_wall_clock: Duration::ZERO,
    };

    let mut runs = 0usize;
    let stable = reduce_to_stable(
        || {
            runs += 1;
            run_trial(&config, &spec, &pool).map(|outcome| outcome.measurement)
        },
        &policy,
    )
    .unwrap();
    assert_eq!(runs, 3);
    assert!(stable > Duration::ZERO);
}
