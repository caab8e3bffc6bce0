use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Core domain enums
// ---------------------------------------------------------------------------

/// Text-to-token transformation applied to an indexed field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisKind {
    /// Whitespace split plus lowercase-alphanumeric normalization.
    Standard,
    /// The whole field value becomes a single token.
    Keyword,
}

/// How a field is carried in the index: retrievable, searchable, both, or
/// neither. `Neither` is not supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldMode {
    StoredOnly,
    IndexedOnly,
    StoredAndIndexed,
    Neither,
}

// ---------------------------------------------------------------------------
// Token utilities — shared between analysis and the store
// ---------------------------------------------------------------------------

/// Tokens produced by `AnalysisKind::Standard` are cut at this length.
pub const MAX_TOKEN_LENGTH: usize = 255;
/// Hard ceiling on any single term the index accepts, keyword tokens
/// included.
pub const MAX_TERM_LENGTH: usize = 32_766;

/// Normalize a token to lowercase ASCII alphanumeric.
pub fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Split text on whitespace into normalized, non-empty tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(normalize_token)
        .filter(|t| !t.is_empty())
        .collect()
}

fn truncate_token(mut token: String, max_len: usize) -> String {
    if token.len() > max_len {
        let mut cut = max_len;
        while !token.is_char_boundary(cut) {
            cut -= 1;
        }
        token.truncate(cut);
    }
    token
}

impl AnalysisKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Keyword => "keyword",
        }
    }

    /// Produce the index tokens for one field value. Tokens beyond the
    /// analyzer's length ceiling are silently truncated, so callers that
    /// care about exact term semantics must stay below it.
    pub fn analyze(self, value: &str) -> Vec<String> {
        match self {
            Self::Standard => tokenize(value)
                .into_iter()
                .map(|t| truncate_token(t, MAX_TOKEN_LENGTH))
                .collect(),
            Self::Keyword => {
                if value.is_empty() {
                    Vec::new()
                } else {
                    vec![truncate_token(value.to_string(), MAX_TERM_LENGTH)]
                }
            }
        }
    }
}

impl FieldMode {
    pub fn is_stored(self) -> bool {
        matches!(self, Self::StoredOnly | Self::StoredAndIndexed)
    }

    pub fn is_indexed(self) -> bool {
        matches!(self, Self::IndexedOnly | Self::StoredAndIndexed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StoredOnly => "stored-only",
            Self::IndexedOnly => "indexed-only",
            Self::StoredAndIndexed => "stored-and-indexed",
            Self::Neither => "neither",
        }
    }
}

// ---------------------------------------------------------------------------
// Core domain types
// ---------------------------------------------------------------------------

/// One named field of a document, with its storage mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub mode: FieldMode,
}

/// Helper to build a `Field` without repetitive struct construction.
pub fn field(name: &str, value: &str, mode: FieldMode) -> Field {
    Field {
        name: name.to_string(),
        value: value.to_string(),
        mode,
    }
}

/// One point in the experiment space. Immutable once built; discarded after
/// the experiment point completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperimentConfig {
    pub distinct_word_count: usize,
    pub word_length: usize,
    pub document_count: usize,
    pub words_per_document: usize,
    pub analysis: AnalysisKind,
}

impl ExperimentConfig {
    /// Byte length of one synthesized field value (each word plus its
    /// trailing space).
    pub fn field_value_len(&self) -> usize {
        self.words_per_document * (self.word_length + 1)
    }
}

impl fmt::Display for ExperimentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{docs={}, distinctWords={}, wordLength={}, wordsPerDocument={}, fieldSize={}, analysis={}}}",
            self.document_count,
            self.distinct_word_count,
            self.word_length,
            self.words_per_document,
            self.field_value_len(),
            self.analysis.as_str()
        )
    }
}

/// Bytes written and wall-clock time for one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub total_bytes: u64,
    pub elapsed: Duration,
}

impl Measurement {
    pub fn bytes_per_document(&self, document_count: usize) -> f64 {
        if document_count == 0 {
            return 0.0;
        }
        self.total_bytes as f64 / document_count as f64
    }

    pub fn elapsed_per_document(&self, document_count: usize) -> Duration {
        if document_count == 0 {
            return Duration::ZERO;
        }
        self.elapsed / document_count as u32
    }

    pub fn documents_per_second(&self, document_count: usize) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        document_count as f64 / secs
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingField(&'static str),
    InvalidRange(&'static str),
}

pub fn validate_config(config: &ExperimentConfig) -> Result<(), ValidationError> {
    if config.distinct_word_count == 0 {
        return Err(ValidationError::InvalidRange("distinct_word_count"));
    }
    if config.word_length == 0 {
        return Err(ValidationError::InvalidRange("word_length"));
    }
    // Words at or above the analyzer ceiling would be silently cut and the
    // comparison across strategies would no longer measure the same terms.
    if config.word_length >= MAX_TOKEN_LENGTH {
        return Err(ValidationError::InvalidRange("word_length"));
    }
    if config.field_value_len() >= MAX_TERM_LENGTH {
        return Err(ValidationError::InvalidRange("words_per_document"));
    }
    Ok(())
}

pub fn validate_field(field: &Field) -> Result<(), ValidationError> {
    if field.name.trim().is_empty() {
        return Err(ValidationError::MissingField("name"));
    }
    Ok(())
}
