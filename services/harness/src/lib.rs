pub mod compare;
pub mod consistency;
pub mod experiments;
pub mod stable;
pub mod trial;

pub use compare::{
    ComparisonFlag, ConsoleSink, MUCH_FASTER_RATIO, MemorySink, ReportSink, compare_pair,
};
pub use consistency::{
    ConsistencyError, check_commit_gated_visibility, check_nrt_snapshot_isolation,
    committed_doc_count, verify_invariant_machinery,
};
pub use experiments::{ExperimentKind, ExperimentOptions, run_experiment};
pub use stable::{StablePolicy, quiesce, reduce_to_stable};
pub use trial::{TrialOutcome, TrialSpec, run_trial};

use schema::ValidationError;
use store::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub enum HarnessError {
    /// Fatal setup problem: invalid options, or the invariant machinery
    /// itself failed its self-check.
    Config(String),
    /// Storage or engine failure; aborts the current experiment point with
    /// no partial results.
    Store(StoreError),
    /// A read-visibility invariant did not hold.
    Consistency(ConsistencyError),
}

impl From<StoreError> for HarnessError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ValidationError> for HarnessError {
    fn from(value: ValidationError) -> Self {
        Self::Store(StoreError::Validation(value))
    }
}

impl From<ConsistencyError> for HarnessError {
    fn from(value: ConsistencyError) -> Self {
        Self::Consistency(value)
    }
}
