use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    fs::{OpenOptions, create_dir_all, read_dir, remove_dir, remove_file, rename},
    io::Write,
    path::{Path, PathBuf},
};

use ranking::term_score;
use schema::{AnalysisKind, Field, FieldMode, ValidationError, validate_field};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Validation(ValidationError),
    Io(String),
    Parse(String),
    /// Opening a reader over a storage backend that has never been
    /// committed. Expected and recoverable, unlike the other variants.
    IndexNotFound,
    UnsupportedFieldMode(String),
    WriterClosed,
    MissingDocument(u32),
}

impl From<ValidationError> for StoreError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

const MANIFEST_FILE_NAME: &str = "segments.manifest";
const MANIFEST_HEADER: &str = "LEXBENCH-MANIFEST\t1";
const SEGMENT_HEADER: &str = "LEXBENCH-SEG\t1";
const COMPOUND_SUFFIX: &str = ".seg";
const POSTINGS_SUFFIX: &str = ".pst";
const STORED_SUFFIX: &str = ".sto";

/// With the default merge policy, a commit that leaves more than this many
/// live segments folds them all into one.
pub const MERGE_SEGMENT_THRESHOLD: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    #[default]
    Default,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    pub analysis: AnalysisKind,
    pub use_compound_format: bool,
    pub merge_policy: MergePolicy,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            analysis: AnalysisKind::Standard,
            use_compound_format: true,
            merge_policy: MergePolicy::Default,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage backends
// ---------------------------------------------------------------------------

/// Which backend to open: ephemeral in-memory, or a single-level directory
/// on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSpec {
    InMemory,
    FileBacked(PathBuf),
}

impl StorageSpec {
    pub fn file_backed(path: impl AsRef<Path>) -> Self {
        Self::FileBacked(path.as_ref().to_path_buf())
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::InMemory => "memory",
            Self::FileBacked(_) => "file system",
        }
    }

    pub fn open(&self) -> Result<Storage, StoreError> {
        match self {
            Self::InMemory => Ok(Storage::Ram(RamDirectory::default())),
            Self::FileBacked(root) => {
                create_dir_all(root)?;
                Ok(Storage::File(FsDirectory { root: root.clone() }))
            }
        }
    }

    /// Open with any previous contents removed. File-backed storage wipes
    /// the single-level directory first (all files, then the directory),
    /// tolerating a path that does not exist yet.
    pub fn open_clean(&self) -> Result<Storage, StoreError> {
        if let Self::FileBacked(root) = self {
            remove_single_level_dir(root)?;
        }
        self.open()
    }
}

fn remove_single_level_dir(path: &Path) -> Result<(), StoreError> {
    if path.is_dir() {
        for entry in read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                remove_file(entry.path())?;
            }
        }
    }
    if path.exists() {
        remove_dir(path)?;
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct RamDirectory {
    files: RefCell<BTreeMap<String, String>>,
}

#[derive(Debug)]
pub struct FsDirectory {
    root: PathBuf,
}

#[derive(Debug)]
pub enum Storage {
    Ram(RamDirectory),
    File(FsDirectory),
}

impl Storage {
    /// Sum of every file length inside the backend — the size metric for
    /// all write-throughput experiments.
    pub fn total_size_bytes(&self) -> Result<u64, StoreError> {
        match self {
            Self::Ram(dir) => Ok(dir
                .files
                .borrow()
                .values()
                .map(|contents| contents.len() as u64)
                .sum()),
            Self::File(dir) => {
                let mut total = 0u64;
                for entry in read_dir(&dir.root)? {
                    let entry = entry?;
                    if entry.file_type()?.is_file() {
                        total += entry.metadata()?.len();
                    }
                }
                Ok(total)
            }
        }
    }

    pub fn list_files(&self) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Ram(dir) => Ok(dir.files.borrow().keys().cloned().collect()),
            Self::File(dir) => {
                let mut names = Vec::new();
                for entry in read_dir(&dir.root)? {
                    let entry = entry?;
                    if entry.file_type()?.is_file() {
                        names.push(entry.file_name().to_string_lossy().into_owned());
                    }
                }
                names.sort();
                Ok(names)
            }
        }
    }

    fn file_exists(&self, name: &str) -> Result<bool, StoreError> {
        match self {
            Self::Ram(dir) => Ok(dir.files.borrow().contains_key(name)),
            Self::File(dir) => Ok(dir.root.join(name).is_file()),
        }
    }

    fn read_file(&self, name: &str) -> Result<String, StoreError> {
        match self {
            Self::Ram(dir) => dir
                .files
                .borrow()
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::Io(format!("no such file: {name}"))),
            Self::File(dir) => Ok(std::fs::read_to_string(dir.root.join(name))?),
        }
    }

    fn write_file(&self, name: &str, contents: &str) -> Result<(), StoreError> {
        match self {
            Self::Ram(dir) => {
                dir.files
                    .borrow_mut()
                    .insert(name.to_string(), contents.to_string());
                Ok(())
            }
            Self::File(dir) => {
                let final_path = dir.root.join(name);
                let tmp_path = dir.root.join(format!("{name}.tmp"));
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&tmp_path)?;
                file.write_all(contents.as_bytes())?;
                file.sync_all()?;
                rename(tmp_path, final_path)?;
                Ok(())
            }
        }
    }

    fn delete_file(&self, name: &str) -> Result<(), StoreError> {
        match self {
            Self::Ram(dir) => {
                dir.files.borrow_mut().remove(name);
                Ok(())
            }
            Self::File(dir) => {
                remove_file(dir.root.join(name))?;
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Segment data and serialization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct SegmentMeta {
    id: String,
    doc_count: usize,
    compound: bool,
}

#[derive(Debug, Clone, Default)]
struct SegmentData {
    doc_ids: Vec<u32>,
    /// field -> term -> (doc, term frequency)
    postings: BTreeMap<String, BTreeMap<String, Vec<(u32, u32)>>>,
    /// field -> doc -> token count
    field_lens: BTreeMap<String, BTreeMap<u32, u32>>,
    /// doc -> field -> stored values
    stored: BTreeMap<u32, BTreeMap<String, Vec<String>>>,
}

impl SegmentData {
    fn doc_count(&self) -> usize {
        self.doc_ids.len()
    }

    fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    fn add_document(&mut self, doc_id: u32, fields: &[Field], analysis: AnalysisKind) {
        self.doc_ids.push(doc_id);
        for field in fields {
            if field.mode.is_indexed() {
                let tokens = analysis.analyze(&field.value);
                if !tokens.is_empty() {
                    *self
                        .field_lens
                        .entry(field.name.clone())
                        .or_default()
                        .entry(doc_id)
                        .or_insert(0) += tokens.len() as u32;
                    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
                    for token in tokens {
                        *counts.entry(token).or_insert(0) += 1;
                    }
                    let terms = self.postings.entry(field.name.clone()).or_default();
                    for (term, tf) in counts {
                        terms.entry(term).or_default().push((doc_id, tf));
                    }
                }
            }
            if field.mode.is_stored() {
                self.stored
                    .entry(doc_id)
                    .or_default()
                    .entry(field.name.clone())
                    .or_default()
                    .push(field.value.clone());
            }
        }
    }

    fn merge_from(&mut self, other: &SegmentData) {
        self.doc_ids.extend(other.doc_ids.iter().copied());
        for (field, terms) in &other.postings {
            let into = self.postings.entry(field.clone()).or_default();
            for (term, posts) in terms {
                into.entry(term.clone())
                    .or_default()
                    .extend(posts.iter().copied());
            }
        }
        for (field, lens) in &other.field_lens {
            let into = self.field_lens.entry(field.clone()).or_default();
            for (doc, len) in lens {
                *into.entry(*doc).or_insert(0) += *len;
            }
        }
        for (doc, fields) in &other.stored {
            let into = self.stored.entry(*doc).or_default();
            for (field, values) in fields {
                into.entry(field.clone())
                    .or_default()
                    .extend(values.iter().cloned());
            }
        }
    }

    fn postings_section(&self) -> String {
        let mut out = String::new();
        for doc_id in &self.doc_ids {
            out.push_str(&format!("doc\t{doc_id}\n"));
        }
        for (field, lens) in &self.field_lens {
            for (doc_id, len) in lens {
                out.push_str(&format!("len\t{}\t{doc_id}\t{len}\n", escape_field(field)));
            }
        }
        for (field, terms) in &self.postings {
            for (term, posts) in terms {
                for (doc_id, tf) in posts {
                    out.push_str(&format!(
                        "post\t{}\t{}\t{doc_id}\t{tf}\n",
                        escape_field(field),
                        escape_field(term)
                    ));
                }
            }
        }
        out
    }

    fn stored_section(&self) -> String {
        let mut out = String::new();
        for (doc_id, fields) in &self.stored {
            for (field, values) in fields {
                for value in values {
                    out.push_str(&format!(
                        "stored\t{}\t{doc_id}\t{}\n",
                        escape_field(field),
                        escape_field(value)
                    ));
                }
            }
        }
        out
    }

    fn apply_line(&mut self, line: &str) -> Result<(), StoreError> {
        let parts: Vec<&str> = line.split('\t').collect();
        match parts.as_slice() {
            ["doc", doc_id] => {
                self.doc_ids.push(parse_doc_id(doc_id)?);
                Ok(())
            }
            ["len", field, doc_id, len] => {
                let len = len
                    .parse::<u32>()
                    .map_err(|_| StoreError::Parse("segment has invalid field length".into()))?;
                *self
                    .field_lens
                    .entry(unescape_field(field)?)
                    .or_default()
                    .entry(parse_doc_id(doc_id)?)
                    .or_insert(0) += len;
                Ok(())
            }
            ["post", field, term, doc_id, tf] => {
                let tf = tf
                    .parse::<u32>()
                    .map_err(|_| StoreError::Parse("segment has invalid term frequency".into()))?;
                self.postings
                    .entry(unescape_field(field)?)
                    .or_default()
                    .entry(unescape_field(term)?)
                    .or_default()
                    .push((parse_doc_id(doc_id)?, tf));
                Ok(())
            }
            ["stored", field, doc_id, value] => {
                self.stored
                    .entry(parse_doc_id(doc_id)?)
                    .or_default()
                    .entry(unescape_field(field)?)
                    .or_default()
                    .push(unescape_field(value)?);
                Ok(())
            }
            _ => Err(StoreError::Parse(format!(
                "unrecognized segment record: {line}"
            ))),
        }
    }
}

fn parse_doc_id(raw: &str) -> Result<u32, StoreError> {
    raw.parse::<u32>()
        .map_err(|_| StoreError::Parse("segment has invalid doc id".into()))
}

fn segment_file_names(meta: &SegmentMeta) -> Vec<String> {
    if meta.compound {
        vec![format!("{}{COMPOUND_SUFFIX}", meta.id)]
    } else {
        vec![
            format!("{}{POSTINGS_SUFFIX}", meta.id),
            format!("{}{STORED_SUFFIX}", meta.id),
        ]
    }
}

fn write_segment_files(
    storage: &Storage,
    meta: &SegmentMeta,
    data: &SegmentData,
) -> Result<(), StoreError> {
    if meta.compound {
        let mut contents = String::from(SEGMENT_HEADER);
        contents.push('\n');
        contents.push_str(&data.postings_section());
        contents.push_str(&data.stored_section());
        storage.write_file(&format!("{}{COMPOUND_SUFFIX}", meta.id), &contents)?;
    } else {
        let mut postings = String::from(SEGMENT_HEADER);
        postings.push('\n');
        postings.push_str(&data.postings_section());
        storage.write_file(&format!("{}{POSTINGS_SUFFIX}", meta.id), &postings)?;

        let mut stored = String::from(SEGMENT_HEADER);
        stored.push('\n');
        stored.push_str(&data.stored_section());
        storage.write_file(&format!("{}{STORED_SUFFIX}", meta.id), &stored)?;
    }
    Ok(())
}

fn parse_segment_file(contents: &str, data: &mut SegmentData) -> Result<(), StoreError> {
    let mut lines = contents.lines().filter(|line| !line.trim().is_empty());
    match lines.next() {
        Some(header) if header == SEGMENT_HEADER => {}
        Some(_) => return Err(StoreError::Parse("segment file has invalid header".into())),
        None => return Err(StoreError::Parse("segment file is empty".into())),
    }
    for line in lines {
        data.apply_line(line)?;
    }
    Ok(())
}

fn load_segment(storage: &Storage, meta: &SegmentMeta) -> Result<SegmentData, StoreError> {
    let mut data = SegmentData::default();
    for name in segment_file_names(meta) {
        parse_segment_file(&storage.read_file(&name)?, &mut data)?;
    }
    if data.doc_count() != meta.doc_count {
        return Err(StoreError::Parse(format!(
            "segment {} holds {} documents, manifest says {}",
            meta.id,
            data.doc_count(),
            meta.doc_count
        )));
    }
    Ok(data)
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ManifestState {
    next_doc_id: u32,
    next_segment_ord: u64,
    segments: Vec<SegmentMeta>,
}

fn read_manifest(storage: &Storage) -> Result<Option<ManifestState>, StoreError> {
    if !storage.file_exists(MANIFEST_FILE_NAME)? {
        return Ok(None);
    }
    let contents = storage.read_file(MANIFEST_FILE_NAME)?;
    let mut lines = contents.lines().filter(|line| !line.trim().is_empty());
    match lines.next() {
        Some(header) if header == MANIFEST_HEADER => {}
        _ => return Err(StoreError::Parse("manifest has invalid header".into())),
    }

    let mut state = ManifestState::default();
    for line in lines {
        let parts: Vec<&str> = line.split('\t').collect();
        match parts.as_slice() {
            ["next_doc_id", raw] => {
                state.next_doc_id = raw
                    .parse::<u32>()
                    .map_err(|_| StoreError::Parse("manifest has invalid next_doc_id".into()))?;
            }
            ["next_segment_ord", raw] => {
                state.next_segment_ord = raw.parse::<u64>().map_err(|_| {
                    StoreError::Parse("manifest has invalid next_segment_ord".into())
                })?;
            }
            ["segment", id, doc_count, compound] => {
                let doc_count = doc_count
                    .parse::<usize>()
                    .map_err(|_| StoreError::Parse("manifest has invalid doc count".into()))?;
                let compound = match *compound {
                    "0" => false,
                    "1" => true,
                    _ => {
                        return Err(StoreError::Parse(
                            "manifest has invalid compound flag".into(),
                        ));
                    }
                };
                state.segments.push(SegmentMeta {
                    id: unescape_field(id)?,
                    doc_count,
                    compound,
                });
            }
            _ => {
                return Err(StoreError::Parse(format!(
                    "unrecognized manifest record: {line}"
                )));
            }
        }
    }
    Ok(Some(state))
}

fn write_manifest(storage: &Storage, state: &ManifestState) -> Result<(), StoreError> {
    let mut contents = String::from(MANIFEST_HEADER);
    contents.push('\n');
    contents.push_str(&format!("next_doc_id\t{}\n", state.next_doc_id));
    contents.push_str(&format!("next_segment_ord\t{}\n", state.next_segment_ord));
    for meta in &state.segments {
        contents.push_str(&format!(
            "segment\t{}\t{}\t{}\n",
            escape_field(&meta.id),
            meta.doc_count,
            if meta.compound { "1" } else { "0" }
        ));
    }
    storage.write_file(MANIFEST_FILE_NAME, &contents)
}

fn escape_field(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
}

fn unescape_field(value: &str) -> Result<String, StoreError> {
    let mut output = String::with_capacity(value.len());
    let mut escaped = false;
    for ch in value.chars() {
        if escaped {
            match ch {
                '\\' => output.push('\\'),
                't' => output.push('\t'),
                'n' => output.push('\n'),
                other => {
                    return Err(StoreError::Parse(format!(
                        "invalid escape sequence: \\{other}"
                    )));
                }
            }
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            output.push(ch);
        }
    }
    if escaped {
        return Err(StoreError::Parse(
            "unterminated escape sequence in segment field".into(),
        ));
    }
    Ok(output)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Buffered document writer over one storage backend. At most one writer may
/// be open against a given backend at a time; that is a caller contract, not
/// enforced here.
pub struct IndexWriter<'a> {
    storage: &'a Storage,
    options: WriterOptions,
    segments: Vec<SegmentMeta>,
    segment_datas: Vec<SegmentData>,
    pending: SegmentData,
    next_doc_id: u32,
    next_segment_ord: u64,
    commits: usize,
    closed: bool,
}

impl<'a> IndexWriter<'a> {
    pub fn open(storage: &'a Storage, options: WriterOptions) -> Result<Self, StoreError> {
        let state = read_manifest(storage)?.unwrap_or_default();
        let mut segment_datas = Vec::with_capacity(state.segments.len());
        for meta in &state.segments {
            segment_datas.push(load_segment(storage, meta)?);
        }
        Ok(Self {
            storage,
            options,
            segments: state.segments,
            segment_datas,
            pending: SegmentData::default(),
            next_doc_id: state.next_doc_id,
            next_segment_ord: state.next_segment_ord,
            commits: 0,
            closed: false,
        })
    }

    /// Documents visible to a near-real-time reader opened now: committed
    /// plus pending.
    pub fn doc_count(&self) -> usize {
        self.committed_doc_count() + self.pending.doc_count()
    }

    pub fn committed_doc_count(&self) -> usize {
        self.segment_datas.iter().map(SegmentData::doc_count).sum()
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    pub fn live_segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn add_document(&mut self, fields: &[Field]) -> Result<u32, StoreError> {
        if self.closed {
            return Err(StoreError::WriterClosed);
        }
        for field in fields {
            validate_field(field)?;
            if field.mode == FieldMode::Neither {
                return Err(StoreError::UnsupportedFieldMode(field.name.clone()));
            }
        }
        let doc_id = self.next_doc_id;
        self.next_doc_id += 1;
        self.pending
            .add_document(doc_id, fields, self.options.analysis);
        Ok(doc_id)
    }

    /// Publish everything added since the previous commit as a durable
    /// segment, then apply the merge policy. Readers already open keep
    /// their snapshots; readers opened afterwards see the new state.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::WriterClosed);
        }
        if !self.pending.is_empty() {
            let data = std::mem::take(&mut self.pending);
            let meta = SegmentMeta {
                id: format!("seg-{:06}", self.next_segment_ord),
                doc_count: data.doc_count(),
                compound: self.options.use_compound_format,
            };
            self.next_segment_ord += 1;
            write_segment_files(self.storage, &meta, &data)?;
            self.segments.push(meta);
            self.segment_datas.push(data);
        }
        self.commits += 1;
        if self.options.merge_policy == MergePolicy::Default
            && self.segments.len() > MERGE_SEGMENT_THRESHOLD
        {
            self.merge_all_segments()?;
        }
        self.write_manifest()
    }

    pub fn close(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        self.commit()?;
        self.closed = true;
        Ok(())
    }

    /// Near-real-time reader: a frozen snapshot of every document added up
    /// to this call, committed or not.
    pub fn nrt_reader(&self) -> IndexReader {
        let mut segments = self.segment_datas.clone();
        if !self.pending.is_empty() {
            segments.push(self.pending.clone());
        }
        IndexReader::from_segments(segments)
    }

    fn merge_all_segments(&mut self) -> Result<(), StoreError> {
        let mut merged = SegmentData::default();
        for data in &self.segment_datas {
            merged.merge_from(data);
        }
        for meta in &self.segments {
            for name in segment_file_names(meta) {
                self.storage.delete_file(&name)?;
            }
        }
        let meta = SegmentMeta {
            id: format!("seg-{:06}", self.next_segment_ord),
            doc_count: merged.doc_count(),
            compound: self.options.use_compound_format,
        };
        self.next_segment_ord += 1;
        write_segment_files(self.storage, &meta, &merged)?;
        self.segments = vec![meta];
        self.segment_datas = vec![merged];
        Ok(())
    }

    fn write_manifest(&self) -> Result<(), StoreError> {
        write_manifest(
            self.storage,
            &ManifestState {
                next_doc_id: self.next_doc_id,
                next_segment_ord: self.next_segment_ord,
                segments: self.segments.clone(),
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Reader / searcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: u32,
    pub score: f32,
}

/// Frozen point-in-time view of an index. Later writes and commits never
/// alter an already-open reader.
pub struct IndexReader {
    segments: Vec<SegmentData>,
    doc_count: usize,
}

impl IndexReader {
    /// Committed-only view over a storage backend. Fails with
    /// `IndexNotFound` when no commit has ever happened there.
    pub fn open(storage: &Storage) -> Result<Self, StoreError> {
        let Some(state) = read_manifest(storage)? else {
            return Err(StoreError::IndexNotFound);
        };
        let mut segments = Vec::with_capacity(state.segments.len());
        for meta in &state.segments {
            segments.push(load_segment(storage, meta)?);
        }
        Ok(Self::from_segments(segments))
    }

    fn from_segments(segments: Vec<SegmentData>) -> Self {
        let doc_count = segments.iter().map(SegmentData::doc_count).sum();
        Self {
            segments,
            doc_count,
        }
    }

    pub fn doc_count(&self) -> usize {
        self.doc_count
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Ranked term query over one field. The term is matched exactly
    /// against the indexed tokens.
    pub fn search(&self, field: &str, term: &str, limit: usize) -> Vec<SearchHit> {
        let mut tf_by_doc: HashMap<u32, u32> = HashMap::new();
        let mut doc_lens: HashMap<u32, u32> = HashMap::new();
        let mut field_docs = 0usize;
        let mut field_len_total = 0u64;

        for segment in &self.segments {
            if let Some(lens) = segment.field_lens.get(field) {
                for (doc_id, len) in lens {
                    field_docs += 1;
                    field_len_total += u64::from(*len);
                    doc_lens.insert(*doc_id, *len);
                }
            }
            if let Some(posts) = segment.postings.get(field).and_then(|terms| terms.get(term)) {
                for (doc_id, tf) in posts {
                    *tf_by_doc.entry(*doc_id).or_insert(0) += tf;
                }
            }
        }

        if tf_by_doc.is_empty() || field_docs == 0 {
            return Vec::new();
        }

        let avg_doc_len = field_len_total as f32 / field_docs as f32;
        let doc_freq = tf_by_doc.len();
        let mut hits: Vec<SearchHit> = tf_by_doc
            .into_iter()
            .map(|(doc_id, tf)| SearchHit {
                doc_id,
                score: term_score(
                    tf as usize,
                    doc_lens.get(&doc_id).copied().unwrap_or(0) as usize,
                    avg_doc_len,
                    doc_freq,
                    self.doc_count,
                ),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(limit);
        hits
    }

    /// Stored values of one document, keyed by field name. Fields carried
    /// as indexed-only are absent.
    pub fn stored_fields(&self, doc_id: u32) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        let mut found = false;
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for segment in &self.segments {
            if segment.doc_ids.contains(&doc_id) {
                found = true;
            }
            if let Some(fields) = segment.stored.get(&doc_id) {
                for (field, values) in fields {
                    out.entry(field.clone())
                        .or_default()
                        .extend(values.iter().cloned());
                }
            }
        }
        if !found {
            return Err(StoreError::MissingDocument(doc_id));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::field;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_storage_root(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock should be valid")
            .as_nanos();
        std::env::temp_dir().join(format!("store-test-{tag}-{}-{nanos}", std::process::id()))
    }

    fn body(value: &str, mode: FieldMode) -> Vec<Field> {
        vec![field("body", value, mode)]
    }

    #[test]
    fn reader_before_any_commit_reports_index_not_found() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        assert_eq!(IndexReader::open(&storage).err(), Some(StoreError::IndexNotFound));

        writer
            .add_document(&body("hello world", FieldMode::IndexedOnly))
            .unwrap();
        assert_eq!(IndexReader::open(&storage).err(), Some(StoreError::IndexNotFound));
        writer.close().unwrap();
    }

    #[test]
    fn commit_makes_documents_visible_to_new_readers_only() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        writer
            .add_document(&body("hello world", FieldMode::IndexedOnly))
            .unwrap();
        writer.commit().unwrap();

        let reader = IndexReader::open(&storage).unwrap();
        assert_eq!(reader.doc_count(), 1);

        writer
            .add_document(&body("more text", FieldMode::IndexedOnly))
            .unwrap();
        // The open reader keeps its snapshot; a fresh one still sees only
        // the committed document.
        assert_eq!(reader.doc_count(), 1);
        assert_eq!(IndexReader::open(&storage).unwrap().doc_count(), 1);
        writer.close().unwrap();
        assert_eq!(IndexReader::open(&storage).unwrap().doc_count(), 2);
    }

    #[test]
    fn nrt_reader_is_frozen_at_open_time() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();

        let before_writes = writer.nrt_reader();
        assert_eq!(before_writes.doc_count(), 0);

        writer
            .add_document(&body("first", FieldMode::IndexedOnly))
            .unwrap();
        assert_eq!(before_writes.doc_count(), 0);

        let after_first = writer.nrt_reader();
        assert_eq!(after_first.doc_count(), 1);

        writer
            .add_document(&body("second", FieldMode::IndexedOnly))
            .unwrap();
        writer.commit().unwrap();
        assert_eq!(before_writes.doc_count(), 0);
        assert_eq!(after_first.doc_count(), 1);
        writer.close().unwrap();
    }

    #[test]
    fn search_ranks_matching_documents() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        writer
            .add_document(&body("hallo hallo welt", FieldMode::StoredAndIndexed))
            .unwrap();
        writer
            .add_document(&body("hallo world and more words here", FieldMode::StoredAndIndexed))
            .unwrap();
        writer
            .add_document(&body("unrelated text", FieldMode::StoredAndIndexed))
            .unwrap();
        writer.close().unwrap();

        let reader = IndexReader::open(&storage).unwrap();
        let hits = reader.search("body", "hallo", 10);
        assert_eq!(hits.len(), 2);
        // Doc 0 repeats the term in a shorter field and must rank first.
        assert_eq!(hits[0].doc_id, 0);
        assert!(hits[0].score > hits[1].score);
        assert!(hits.iter().all(|hit| hit.score > 0.0));

        assert_eq!(reader.search("body", "absent", 10), Vec::new());
        assert_eq!(reader.search("body", "hallo", 1).len(), 1);
    }

    #[test]
    fn stored_only_fields_are_retrievable_but_not_searchable() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        writer
            .add_document(&vec![
                field("kept", "hallo welt", FieldMode::StoredOnly),
                field("searched", "hallo welt", FieldMode::IndexedOnly),
            ])
            .unwrap();
        writer.close().unwrap();

        let reader = IndexReader::open(&storage).unwrap();
        assert!(reader.search("kept", "hallo", 10).is_empty());
        assert_eq!(reader.search("searched", "hallo", 10).len(), 1);

        let stored = reader.stored_fields(0).unwrap();
        assert_eq!(stored.get("kept"), Some(&vec!["hallo welt".to_string()]));
        // Indexed-only fields do not survive into stored form.
        assert_eq!(stored.get("searched"), None);
    }

    #[test]
    fn missing_document_is_reported() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        writer
            .add_document(&body("only one", FieldMode::StoredOnly))
            .unwrap();
        writer.close().unwrap();

        let reader = IndexReader::open(&storage).unwrap();
        assert_eq!(
            reader.stored_fields(7).err(),
            Some(StoreError::MissingDocument(7))
        );
    }

    #[test]
    fn neither_field_mode_is_rejected() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        let err = writer
            .add_document(&body("value", FieldMode::Neither))
            .err();
        assert_eq!(err, Some(StoreError::UnsupportedFieldMode("body".into())));
        writer.close().unwrap();
    }

    #[test]
    fn writer_rejects_use_after_close() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        writer.close().unwrap();
        assert_eq!(
            writer.add_document(&body("late", FieldMode::IndexedOnly)).err(),
            Some(StoreError::WriterClosed)
        );
        assert_eq!(writer.commit().err(), Some(StoreError::WriterClosed));
        // A second close is a no-op, not an error.
        assert_eq!(writer.close(), Ok(()));
    }

    #[test]
    fn default_merge_policy_folds_segments_past_threshold() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        for i in 0..=MERGE_SEGMENT_THRESHOLD {
            writer
                .add_document(&body(&format!("doc number {i}"), FieldMode::IndexedOnly))
                .unwrap();
            writer.commit().unwrap();
        }
        assert_eq!(writer.live_segment_count(), 1);
        writer.close().unwrap();

        let reader = IndexReader::open(&storage).unwrap();
        assert_eq!(reader.segment_count(), 1);
        assert_eq!(reader.doc_count(), MERGE_SEGMENT_THRESHOLD + 1);
        assert_eq!(reader.search("body", "number", 100).len(), MERGE_SEGMENT_THRESHOLD + 1);
    }

    #[test]
    fn no_merge_policy_preserves_every_segment() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let options = WriterOptions {
            merge_policy: MergePolicy::None,
            ..WriterOptions::default()
        };
        let mut writer = IndexWriter::open(&storage, options).unwrap();
        for i in 0..=MERGE_SEGMENT_THRESHOLD {
            writer
                .add_document(&body(&format!("doc number {i}"), FieldMode::IndexedOnly))
                .unwrap();
            writer.commit().unwrap();
        }
        assert_eq!(writer.live_segment_count(), MERGE_SEGMENT_THRESHOLD + 1);
        writer.close().unwrap();

        let reader = IndexReader::open(&storage).unwrap();
        assert_eq!(reader.segment_count(), MERGE_SEGMENT_THRESHOLD + 1);
        assert_eq!(reader.doc_count(), MERGE_SEGMENT_THRESHOLD + 1);
    }

    #[test]
    fn compound_format_writes_one_file_per_segment() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        writer
            .add_document(&body("compound", FieldMode::StoredAndIndexed))
            .unwrap();
        writer.close().unwrap();
        let files = storage.list_files().unwrap();
        assert!(files.contains(&MANIFEST_FILE_NAME.to_string()));
        assert_eq!(
            files.iter().filter(|name| name.ends_with(COMPOUND_SUFFIX)).count(),
            1
        );
        assert!(!files.iter().any(|name| name.ends_with(POSTINGS_SUFFIX)));
    }

    #[test]
    fn separate_format_splits_postings_and_stored_files() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let options = WriterOptions {
            use_compound_format: false,
            ..WriterOptions::default()
        };
        let mut writer = IndexWriter::open(&storage, options).unwrap();
        writer
            .add_document(&body("separate", FieldMode::StoredAndIndexed))
            .unwrap();
        writer.close().unwrap();
        let files = storage.list_files().unwrap();
        assert_eq!(files.iter().filter(|name| name.ends_with(POSTINGS_SUFFIX)).count(), 1);
        assert_eq!(files.iter().filter(|name| name.ends_with(STORED_SUFFIX)).count(), 1);
        assert!(!files.iter().any(|name| name.ends_with(COMPOUND_SUFFIX)));

        let reader = IndexReader::open(&storage).unwrap();
        assert_eq!(reader.search("body", "separate", 10).len(), 1);
        assert_eq!(
            reader.stored_fields(0).unwrap().get("body"),
            Some(&vec!["separate".to_string()])
        );
    }

    #[test]
    fn keyword_analysis_matches_whole_value_only() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let options = WriterOptions {
            analysis: AnalysisKind::Keyword,
            ..WriterOptions::default()
        };
        let mut writer = IndexWriter::open(&storage, options).unwrap();
        writer
            .add_document(&body("hallo welt", FieldMode::IndexedOnly))
            .unwrap();
        writer.close().unwrap();

        let reader = IndexReader::open(&storage).unwrap();
        assert!(reader.search("body", "hallo", 10).is_empty());
        assert_eq!(reader.search("body", "hallo welt", 10).len(), 1);
    }

    #[test]
    fn empty_index_has_a_baseline_size() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        writer.close().unwrap();
        let baseline = storage.total_size_bytes().unwrap();
        assert!(baseline > 0);
        assert_eq!(IndexReader::open(&storage).unwrap().doc_count(), 0);

        let storage2 = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer2 = IndexWriter::open(&storage2, WriterOptions::default()).unwrap();
        writer2.add_document(&[]).unwrap();
        writer2.close().unwrap();
        assert!(storage2.total_size_bytes().unwrap() >= baseline);
        assert_eq!(IndexReader::open(&storage2).unwrap().doc_count(), 1);
    }

    #[test]
    fn file_backed_storage_round_trips_and_cleans() {
        let root = temp_storage_root("roundtrip");
        let spec = StorageSpec::file_backed(&root);
        {
            let storage = spec.open_clean().unwrap();
            let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
            writer
                .add_document(&body("hallo from disk", FieldMode::StoredAndIndexed))
                .unwrap();
            writer.close().unwrap();
            assert!(storage.total_size_bytes().unwrap() > 0);
        }
        {
            // Reopen without cleaning: committed state is still there.
            let storage = spec.open().unwrap();
            let reader = IndexReader::open(&storage).unwrap();
            assert_eq!(reader.doc_count(), 1);
            assert_eq!(reader.search("body", "hallo", 10).len(), 1);
        }
        {
            let storage = spec.open_clean().unwrap();
            assert_eq!(IndexReader::open(&storage).err(), Some(StoreError::IndexNotFound));
            assert_eq!(storage.total_size_bytes().unwrap(), 0);
        }
        remove_single_level_dir(&root).unwrap();
    }

    #[test]
    fn writer_resumes_doc_ids_from_existing_index() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        writer
            .add_document(&body("first batch", FieldMode::IndexedOnly))
            .unwrap();
        writer.close().unwrap();

        let mut reopened = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        let doc_id = reopened
            .add_document(&body("second batch", FieldMode::IndexedOnly))
            .unwrap();
        assert_eq!(doc_id, 1);
        reopened.close().unwrap();
        assert_eq!(IndexReader::open(&storage).unwrap().doc_count(), 2);
    }

    #[test]
    fn stored_values_with_tabs_and_newlines_round_trip() {
        let storage = StorageSpec::InMemory.open_clean().unwrap();
        let mut writer = IndexWriter::open(&storage, WriterOptions::default()).unwrap();
        writer
            .add_document(&body("line one\nline\ttwo", FieldMode::StoredOnly))
            .unwrap();
        writer.close().unwrap();

        let reader = IndexReader::open(&storage).unwrap();
        assert_eq!(
            reader.stored_fields(0).unwrap().get("body"),
            Some(&vec!["line one\nline\ttwo".to_string()])
        );
    }
}
