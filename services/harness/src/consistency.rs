use store::{IndexReader, IndexWriter, Storage, StorageSpec, StoreError, WriterOptions};

use crate::HarnessError;

/// A read-visibility expectation that did not hold. Fatal: the run stops
/// rather than continuing with corrupted expectations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    DocCountMismatch {
        check: &'static str,
        expected: usize,
        actual: usize,
    },
    IndexUnexpectedlyPresent {
        check: &'static str,
        doc_count: usize,
    },
    IndexUnexpectedlyMissing {
        check: &'static str,
    },
}

fn expect_doc_count(
    check: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), ConsistencyError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ConsistencyError::DocCountMismatch {
            check,
            expected,
            actual,
        })
    }
}

fn expect_absent(check: &'static str, observed: Option<usize>) -> Result<(), ConsistencyError> {
    match observed {
        None => Ok(()),
        Some(doc_count) => Err(ConsistencyError::IndexUnexpectedlyPresent { check, doc_count }),
    }
}

fn expect_committed(
    check: &'static str,
    observed: Option<usize>,
    expected: usize,
) -> Result<(), ConsistencyError> {
    match observed {
        Some(actual) => expect_doc_count(check, expected, actual),
        None => Err(ConsistencyError::IndexUnexpectedlyMissing { check }),
    }
}

/// Committed document count as seen by a fresh reader over the storage
/// backend; `None` when no commit has ever happened there.
pub fn committed_doc_count(storage: &Storage) -> Result<Option<usize>, StoreError> {
    match IndexReader::open(storage) {
        Ok(reader) => Ok(Some(reader.doc_count())),
        Err(StoreError::IndexNotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Writes become visible to storage readers at commit and only at commit.
/// Before the first commit the index is distinguishably absent.
pub fn check_commit_gated_visibility(spec: &StorageSpec) -> Result<(), HarnessError> {
    let storage = spec.open_clean()?;
    let mut writer = IndexWriter::open(&storage, WriterOptions::default())?;

    expect_absent(
        "storage reader before any commit",
        committed_doc_count(&storage)?,
    )?;

    writer.add_document(&[])?;
    expect_absent(
        "storage reader after an uncommitted write",
        committed_doc_count(&storage)?,
    )?;

    writer.commit()?;
    expect_committed(
        "storage reader after the first commit",
        committed_doc_count(&storage)?,
        1,
    )?;

    writer.add_document(&[])?;
    expect_committed(
        "storage reader while a later write is uncommitted",
        committed_doc_count(&storage)?,
        1,
    )?;

    writer.close()?;
    expect_committed(
        "storage reader after close",
        committed_doc_count(&storage)?,
        2,
    )?;
    Ok(())
}

/// Near-real-time readers are frozen at open time: later writes and commits
/// never change what an open reader sees.
pub fn check_nrt_snapshot_isolation(spec: &StorageSpec) -> Result<(), HarnessError> {
    const LATE_WRITES: usize = 3;

    let storage = spec.open_clean()?;
    let mut writer = IndexWriter::open(&storage, WriterOptions::default())?;

    let first_reader = writer.nrt_reader();
    expect_doc_count(
        "nrt reader opened before any write",
        0,
        first_reader.doc_count(),
    )?;

    writer.add_document(&[])?;
    expect_doc_count(
        "first nrt reader after one write",
        0,
        first_reader.doc_count(),
    )?;

    let second_reader = writer.nrt_reader();
    expect_doc_count(
        "nrt reader opened after one write",
        1,
        second_reader.doc_count(),
    )?;

    for _ in 0..LATE_WRITES {
        writer.add_document(&[])?;
        expect_doc_count(
            "first nrt reader during later writes",
            0,
            first_reader.doc_count(),
        )?;
        expect_doc_count(
            "second nrt reader during later writes",
            1,
            second_reader.doc_count(),
        )?;
    }

    writer.commit()?;
    expect_doc_count(
        "first nrt reader after a commit",
        0,
        first_reader.doc_count(),
    )?;
    expect_doc_count(
        "second nrt reader after a commit",
        1,
        second_reader.doc_count(),
    )?;

    writer.close()?;
    Ok(())
}

/// Startup self-check: the visibility invariants are expressed as returned
/// verification results, so prove the machinery actually reports failures
/// before trusting a clean run.
pub fn verify_invariant_machinery() -> Result<(), HarnessError> {
    match expect_doc_count("invariant machinery self-check", 0, 1) {
        Err(_) => Ok(()),
        Ok(()) => Err(HarnessError::Config(
            "invariant machinery accepted a failing expectation; refusing to run".into(),
        )),
    }
}
