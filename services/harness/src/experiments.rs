use std::time::Instant;

use schema::{AnalysisKind, ExperimentConfig, FieldMode, Measurement, field, validate_config};
use store::{IndexReader, IndexWriter, MergePolicy, StorageSpec, StoreError, WriterOptions};
use textgen::generate_word_pool;

use crate::{
    HarnessError,
    compare::{ComparisonFlag, MUCH_FASTER_RATIO, ReportSink, compare_pair},
    consistency::{check_commit_gated_visibility, check_nrt_snapshot_isolation},
    stable::{StablePolicy, reduce_to_stable},
    trial::{TrialSpec, run_trial},
};

/// Sizing and policy knobs shared by every experiment, so the driver binary
/// and tests can scale the same code paths differently.
#[derive(Debug, Clone)]
pub struct ExperimentOptions {
    pub storage: StorageSpec,
    pub stable: StablePolicy,
    /// Document count for fixed-size experiments.
    pub documents: usize,
    /// Ceiling for the empty-document scaling sweep.
    pub max_documents: usize,
    pub much_faster_ratio: f64,
    pub word_seed: u64,
}

impl Default for ExperimentOptions {
    fn default() -> Self {
        Self {
            storage: StorageSpec::InMemory,
            stable: StablePolicy::default(),
            documents: 10_000,
            max_documents: 100_000,
            much_faster_ratio: MUCH_FASTER_RATIO,
            word_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentKind {
    AnalyzerSweep,
    IndexSizes,
    SegmentSizes,
    CommitSpeed,
    FieldModes,
    SearchDemo,
    Consistency,
    All,
}

impl ExperimentKind {
    pub fn from_arg(raw: &str) -> Option<Self> {
        match raw {
            "analyzer-sweep" => Some(Self::AnalyzerSweep),
            "index-sizes" => Some(Self::IndexSizes),
            "segment-sizes" => Some(Self::SegmentSizes),
            "commit-speed" => Some(Self::CommitSpeed),
            "field-modes" => Some(Self::FieldModes),
            "search-demo" => Some(Self::SearchDemo),
            "consistency" => Some(Self::Consistency),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnalyzerSweep => "analyzer-sweep",
            Self::IndexSizes => "index-sizes",
            Self::SegmentSizes => "segment-sizes",
            Self::CommitSpeed => "commit-speed",
            Self::FieldModes => "field-modes",
            Self::SearchDemo => "search-demo",
            Self::Consistency => "consistency",
            Self::All => "all",
        }
    }
}

pub fn run_experiment(
    kind: ExperimentKind,
    sink: &mut dyn ReportSink,
    opts: &ExperimentOptions,
) -> Result<(), HarnessError> {
    match kind {
        ExperimentKind::AnalyzerSweep => analyzer_sweep(sink, opts),
        ExperimentKind::IndexSizes => {
            index_size_sweep(sink, opts, true)?;
            index_size_sweep(sink, opts, false)
        }
        ExperimentKind::SegmentSizes => segment_size_sweep(sink, opts),
        ExperimentKind::CommitSpeed => {
            commit_speed(sink, opts, MergePolicy::Default)?;
            commit_speed(sink, opts, MergePolicy::None)
        }
        ExperimentKind::FieldModes => {
            field_mode_write_comparison(sink, opts)?;
            field_mode_roundtrip(sink, opts)
        }
        ExperimentKind::SearchDemo => {
            search_demo(sink, opts, true)?;
            search_demo(sink, opts, false)
        }
        ExperimentKind::Consistency => consistency_suite(sink, opts),
        ExperimentKind::All => {
            for kind in [
                ExperimentKind::AnalyzerSweep,
                ExperimentKind::IndexSizes,
                ExperimentKind::SegmentSizes,
                ExperimentKind::CommitSpeed,
                ExperimentKind::FieldModes,
                ExperimentKind::SearchDemo,
                ExperimentKind::Consistency,
            ] {
                run_experiment(kind, sink, opts)?;
            }
            Ok(())
        }
    }
}

fn format_measurement(measurement: &Measurement) -> String {
    format!(
        "{} bytes in {:.3} sec",
        measurement.total_bytes,
        measurement.elapsed.as_secs_f64()
    )
}

fn empty_doc_config(document_count: usize) -> ExperimentConfig {
    ExperimentConfig {
        distinct_word_count: 1,
        word_length: 1,
        document_count,
        words_per_document: 0,
        analysis: AnalysisKind::Standard,
    }
}

/// The core comparison: for every point of the configuration cross-product,
/// a stable write time per analysis strategy over the same word pool, with
/// the pairwise much-faster flag on the second strategy's line.
pub fn analyzer_sweep(
    sink: &mut dyn ReportSink,
    opts: &ExperimentOptions,
) -> Result<(), HarnessError> {
    let distinct_word_counts = [10usize, 1_000];
    let word_lengths = [15usize, 150];
    let words_per_document_choices = [15usize, 150];
    let strategies = [AnalysisKind::Standard, AnalysisKind::Keyword];

    for &distinct_word_count in &distinct_word_counts {
        for &word_length in &word_lengths {
            let pool = generate_word_pool(word_length, distinct_word_count, opts.word_seed);
            for &words_per_document in &words_per_document_choices {
                let probe = ExperimentConfig {
                    distinct_word_count,
                    word_length,
                    document_count: opts.documents,
                    words_per_document,
                    analysis: AnalysisKind::Standard,
                };
                // Points whose field value would cross the term ceiling are
                // skipped rather than measured with truncated semantics.
                if validate_config(&probe).is_err() {
                    continue;
                }

                let mut stable_times = Vec::with_capacity(strategies.len());
                for analysis in strategies {
                    let config = ExperimentConfig { analysis, ..probe };
                    let spec = TrialSpec {
                        doc_seed: opts.word_seed,
                        ..TrialSpec::new(StorageSpec::InMemory)
                    };
                    let stable = reduce_to_stable(
                        || run_trial(&config, &spec, &pool).map(|outcome| outcome.measurement),
                        &opts.stable,
                    )?;
                    stable_times.push(stable);

                    let us_per_document = stable.as_secs_f64() * 1_000_000.0
                        / config.document_count.max(1) as f64;
                    let mut line = format!(
                        "{:<110} results in {us_per_document:8.1} us/document",
                        config.to_string()
                    );
                    if stable_times.len() == 2 {
                        match compare_pair(stable_times[0], stable_times[1], opts.much_faster_ratio)
                        {
                            ComparisonFlag::FirstMuchFaster => {
                                line.push_str(" ** standard is much faster");
                            }
                            ComparisonFlag::SecondMuchFaster => {
                                line.push_str(" == keyword is much faster");
                            }
                            ComparisonFlag::Comparable => {}
                        }
                    }
                    sink.line(&line);
                }
            }
        }
    }
    Ok(())
}

/// Empty-document scaling: index size and write time at powers of ten,
/// with per-document marginals relative to the single-document baseline.
pub fn index_size_sweep(
    sink: &mut dyn ReportSink,
    opts: &ExperimentOptions,
    use_compound: bool,
) -> Result<(), HarnessError> {
    sink.line(&format!(
        "Examine index size and write time for empty documents ({}, {})",
        opts.storage.describe(),
        if use_compound {
            "compound file"
        } else {
            "separate files"
        }
    ));
    let spec = TrialSpec {
        writer: WriterOptions {
            use_compound_format: use_compound,
            ..WriterOptions::default()
        },
        ..TrialSpec::new(opts.storage.clone())
    };

    let none = run_trial(&empty_doc_config(0), &spec, &[])?;
    sink.line(&format!(
        "  index with no documents: {}",
        format_measurement(&none.measurement)
    ));
    let single = run_trial(&empty_doc_config(1), &spec, &[])?;
    sink.line(&format!(
        "  index with 1 empty document: {}",
        format_measurement(&single.measurement)
    ));

    let mut n = 10usize;
    while n <= opts.max_documents {
        let outcome = run_trial(&empty_doc_config(n), &spec, &[])?;
        let measurement = outcome.measurement;
        let marginal_docs = (n - 1) as f64;
        let bytes_per_document = (measurement.total_bytes as f64
            - single.measurement.total_bytes as f64)
            / marginal_docs;
        let elapsed_delta_ms = (measurement.elapsed.as_secs_f64()
            - single.measurement.elapsed.as_secs_f64())
            * 1_000.0;
        let ms_per_document = elapsed_delta_ms / marginal_docs;
        let documents_per_ms = if elapsed_delta_ms > 0.0 {
            marginal_docs / elapsed_delta_ms
        } else {
            0.0
        };
        sink.line(&format!(
            "  index with {n} empty documents: {} = {bytes_per_document:.5} bytes/document and {ms_per_document:.5} ms/document = {documents_per_ms:.1} documents/ms",
            format_measurement(&measurement)
        ));
        n *= 10;
    }
    Ok(())
}

/// Fixed document count, varying commit cadence: how segment publication
/// frequency changes size and commit cost.
pub fn segment_size_sweep(
    sink: &mut dyn ReportSink,
    opts: &ExperimentOptions,
) -> Result<(), HarnessError> {
    let n = opts.documents;
    sink.line(&format!(
        "Write {n} empty documents using various commit cadences ({})",
        opts.storage.describe()
    ));

    let base_spec = TrialSpec::new(opts.storage.clone());
    let single = run_trial(&empty_doc_config(n), &base_spec, &[])?;
    sink.line(&format!(
        "  only one commit: {}",
        format_measurement(&single.measurement)
    ));

    let mut commit_every = n;
    while commit_every >= 1 {
        let spec = TrialSpec {
            commit_every: Some(commit_every),
            ..base_spec.clone()
        };
        let outcome = run_trial(&empty_doc_config(n), &spec, &[])?;
        let commits = outcome.commits.max(1);
        let elapsed_secs = outcome.measurement.elapsed.as_secs_f64();
        let ms_per_commit = elapsed_secs * 1_000.0 / commits as f64;
        let commits_per_second = if elapsed_secs > 0.0 {
            commits as f64 / elapsed_secs
        } else {
            0.0
        };
        sink.line(&format!(
            "  committing every {commit_every} results in {} and {} commits = {ms_per_commit:.4} ms/commit = {commits_per_second:.1} commits/sec",
            format_measurement(&outcome.measurement),
            outcome.commits
        ));
        commit_every /= 10;
    }
    Ok(())
}

/// Commit after every empty document until the wall-clock budget or the
/// document cap is reached.
pub fn commit_speed(
    sink: &mut dyn ReportSink,
    opts: &ExperimentOptions,
    merge_policy: MergePolicy,
) -> Result<(), HarnessError> {
    sink.line(&format!(
        "Commit after each empty document ({}, {} merge policy)",
        opts.storage.describe(),
        match merge_policy {
            MergePolicy::Default => "default",
            MergePolicy::None => "no",
        }
    ));
    let storage = opts.storage.open_clean()?;
    let options = WriterOptions {
        merge_policy,
        ..WriterOptions::default()
    };
    let mut writer = IndexWriter::open(&storage, options)?;

    let budget = opts.stable.min_wall_clock;
    let start = Instant::now();
    let mut commits = 0usize;
    loop {
        writer.add_document(&[])?;
        writer.commit()?;
        commits += 1;
        if commits >= opts.documents || start.elapsed() >= budget {
            break;
        }
    }
    writer.close()?;
    let elapsed = start.elapsed();

    let measurement = Measurement {
        total_bytes: storage.total_size_bytes()?,
        elapsed,
    };
    let elapsed_secs = elapsed.as_secs_f64();
    let ms_per_commit = elapsed_secs * 1_000.0 / commits as f64;
    let commits_per_second = if elapsed_secs > 0.0 {
        commits as f64 / elapsed_secs
    } else {
        0.0
    };
    sink.line(&format!(
        "  got {} and {commits} commits = {ms_per_commit:.4} ms/commit = {commits_per_second:.1} commits/sec",
        format_measurement(&measurement)
    ));
    Ok(())
}

/// Same write workload per supported field mode; the degenerate mode is
/// excluded because the engine rejects it.
pub fn field_mode_write_comparison(
    sink: &mut dyn ReportSink,
    opts: &ExperimentOptions,
) -> Result<(), HarnessError> {
    let config = ExperimentConfig {
        distinct_word_count: 1_000,
        word_length: 10,
        document_count: opts.documents,
        words_per_document: 20,
        analysis: AnalysisKind::Standard,
    };
    let pool = generate_word_pool(config.word_length, config.distinct_word_count, opts.word_seed);
    sink.line(&format!(
        "Write {} documents per field mode ({})",
        config.document_count,
        opts.storage.describe()
    ));

    for mode in [
        FieldMode::IndexedOnly,
        FieldMode::StoredOnly,
        FieldMode::StoredAndIndexed,
    ] {
        let spec = TrialSpec {
            field_mode: mode,
            doc_seed: opts.word_seed,
            ..TrialSpec::new(opts.storage.clone())
        };
        let outcome = run_trial(&config, &spec, &pool)?;
        sink.line(&format!(
            "  {} results in {} = {:.1} bytes/document",
            mode.as_str(),
            format_measurement(&outcome.measurement),
            outcome.measurement.bytes_per_document(config.document_count)
        ));
    }
    Ok(())
}

/// Write fields in every supported mode and report what can be read back;
/// indexed-only fields have no stored form, and the degenerate mode is
/// rejected outright.
pub fn field_mode_roundtrip(
    sink: &mut dyn ReportSink,
    opts: &ExperimentOptions,
) -> Result<(), HarnessError> {
    sink.line("Examine what can be read back for various field modes");
    let storage = opts.storage.open_clean()?;
    let options = WriterOptions {
        use_compound_format: false,
        ..WriterOptions::default()
    };
    let mut writer = IndexWriter::open(&storage, options)?;
    for i in 0..10 {
        writer.add_document(&[
            field(
                &format!("both{i}"),
                "someValue and someOtherValue",
                FieldMode::StoredAndIndexed,
            ),
            field(&format!("kept{i}"), "someValue", FieldMode::StoredOnly),
            field(
                &format!("searched{i}"),
                &format!("notStoredValue{i}"),
                FieldMode::IndexedOnly,
            ),
        ])?;
    }
    writer.close()?;

    let reader = IndexReader::open(&storage)?;
    for doc_id in 0..reader.doc_count() as u32 {
        let stored = reader.stored_fields(doc_id)?;
        sink.line(&format!(
            "  document {doc_id} retains {} stored fields",
            stored.len()
        ));
        for (name, values) in &stored {
            for value in values {
                sink.line(&format!("      {name} = '{value}'"));
            }
        }
    }

    let mut scratch = IndexWriter::open(&storage, WriterOptions::default())?;
    match scratch.add_document(&[field("ghost", "value", FieldMode::Neither)]) {
        Err(StoreError::UnsupportedFieldMode(name)) => {
            sink.line(&format!(
                "  field mode neither rejected for '{name}' as expected"
            ));
        }
        Ok(_) => {
            return Err(HarnessError::Config(
                "engine accepted the unsupported neither field mode".into(),
            ));
        }
        Err(err) => return Err(err.into()),
    }
    scratch.close()?;
    Ok(())
}

/// Small corpus, ranked term search. With stored subjects the hits can be
/// echoed back; without, only ids and scores remain. Also reports the
/// summed score across all matches.
pub fn search_demo(
    sink: &mut dyn ReportSink,
    opts: &ExperimentOptions,
    stored: bool,
) -> Result<(), HarnessError> {
    let mode = if stored {
        FieldMode::StoredAndIndexed
    } else {
        FieldMode::IndexedOnly
    };
    sink.line(&format!(
        "Term search for 'hallo' over {} subject fields ({})",
        mode.as_str(),
        opts.storage.describe()
    ));

    let storage = opts.storage.open_clean()?;
    let mut writer = IndexWriter::open(&storage, WriterOptions::default())?;
    for subject in ["foo bar", "foobar", "hello", "hallo", "hallo world"] {
        writer.add_document(&[field("subject", subject, mode)])?;
    }
    writer.close()?;

    let reader = IndexReader::open(&storage)?;
    let hits = reader.search("subject", "hallo", 1_000);
    for hit in &hits {
        let subject = if stored {
            reader
                .stored_fields(hit.doc_id)?
                .get("subject")
                .and_then(|values| values.first())
                .cloned()
                .unwrap_or_else(|| "<missing>".to_string())
        } else {
            "<not stored>".to_string()
        };
        sink.line(&format!(
            "    doc {} scored {:.4} with subject '{subject}'",
            hit.doc_id, hit.score
        ));
    }
    let total: f32 = hits.iter().map(|hit| hit.score).sum();
    sink.line(&format!("  got a total score of {total:.4}"));
    Ok(())
}

/// Visibility invariants over the adapter, run directly rather than through
/// the statistical machinery. Always covers the in-memory backend; covers
/// the file backend too when one is configured.
pub fn consistency_suite(
    sink: &mut dyn ReportSink,
    opts: &ExperimentOptions,
) -> Result<(), HarnessError> {
    let mut specs = vec![StorageSpec::InMemory];
    if let StorageSpec::FileBacked(_) = &opts.storage {
        specs.push(opts.storage.clone());
    }
    for spec in &specs {
        check_commit_gated_visibility(spec)?;
        check_nrt_snapshot_isolation(spec)?;
        sink.line(&format!(
            "Consistency checks passed ({})",
            spec.describe()
        ));
    }
    Ok(())
}
