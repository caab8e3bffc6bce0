use std::time::Instant;

use rand::{SeedableRng, rngs::StdRng};
use schema::{ExperimentConfig, Field, FieldMode, Measurement, validate_config};
use store::{IndexWriter, StorageSpec, WriterOptions};
use textgen::concat_random_words;

use crate::HarnessError;

pub const DEFAULT_FIELD_NAME: &str = "body";
pub const DEFAULT_WORD_SEED: u64 = 42;

/// Everything one trial needs beyond the experiment config: where the index
/// lives, how the single field is carried, and how often to commit.
#[derive(Debug, Clone)]
pub struct TrialSpec {
    pub storage: StorageSpec,
    pub field_name: String,
    pub field_mode: FieldMode,
    pub writer: WriterOptions,
    /// Commit after every N documents; `None` commits only at close.
    pub commit_every: Option<usize>,
    /// Seed for the per-trial document stream, so repeated trials write
    /// identical bytes.
    pub doc_seed: u64,
}

impl TrialSpec {
    pub fn new(storage: StorageSpec) -> Self {
        Self {
            storage,
            field_name: DEFAULT_FIELD_NAME.to_string(),
            field_mode: FieldMode::IndexedOnly,
            writer: WriterOptions::default(),
            commit_every: None,
            doc_seed: DEFAULT_WORD_SEED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialOutcome {
    pub measurement: Measurement,
    /// Incremental commits performed inside the timed window, not counting
    /// the one implied by close.
    pub commits: usize,
}

/// Run one full write workload against a freshly cleaned store. The timed
/// window covers the first `add_document` through the completion of
/// `close`; storage setup, writer creation and word-pool generation stay
/// outside it. With `words_per_document == 0` the documents carry no fields
/// at all and the pool goes unused.
pub fn run_trial(
    config: &ExperimentConfig,
    spec: &TrialSpec,
    pool: &[String],
) -> Result<TrialOutcome, HarnessError> {
    validate_config(config)?;
    let options = WriterOptions {
        analysis: config.analysis,
        ..spec.writer.clone()
    };
    let storage = spec.storage.open_clean()?;
    let mut writer = IndexWriter::open(&storage, options)?;
    let mut rng = StdRng::seed_from_u64(spec.doc_seed);
    let mut commits = 0usize;

    let start = Instant::now();
    for i in 0..config.document_count {
        if config.words_per_document == 0 {
            writer.add_document(&[])?;
        } else {
            let value = concat_random_words(pool, &mut rng, config.words_per_document);
            writer.add_document(&[Field {
                name: spec.field_name.clone(),
                value,
                mode: spec.field_mode,
            }])?;
        }
        if let Some(every) = spec.commit_every
            && every > 0
            && (i + 1) % every == 0
        {
            writer.commit()?;
            commits += 1;
        }
    }
    writer.close()?;
    let elapsed = start.elapsed();

    let total_bytes = storage.total_size_bytes()?;
    Ok(TrialOutcome {
        measurement: Measurement {
            total_bytes,
            elapsed,
        },
        commits,
    })
}
