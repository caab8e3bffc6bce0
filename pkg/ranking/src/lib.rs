/// Inverse document frequency with the usual +0.5 smoothing; never
/// negative.
pub fn term_idf(doc_freq: usize, total_docs: usize) -> f32 {
    if total_docs == 0 {
        return 0.0;
    }
    let df = doc_freq as f32;
    ((((total_docs as f32 - df + 0.5) / (df + 0.5)) + 1.0).ln()).max(0.0)
}

/// BM25-style score of a single term match within one document field.
/// `doc_len` is the token count of that field in the document,
/// `avg_doc_len` the mean token count across documents carrying the field.
pub fn term_score(
    term_freq: usize,
    doc_len: usize,
    avg_doc_len: f32,
    doc_freq: usize,
    total_docs: usize,
) -> f32 {
    if term_freq == 0 || total_docs == 0 || avg_doc_len <= f32::EPSILON {
        return 0.0;
    }

    let k1 = 1.2_f32;
    let b = 0.75_f32;
    let tf = term_freq as f32;
    let doc_len = doc_len as f32;

    let idf = term_idf(doc_freq, total_docs);
    let denom = tf + k1 * (1.0 - b + b * (doc_len / avg_doc_len));
    (idf * ((tf * (k1 + 1.0)) / denom.max(f32::EPSILON))).max(0.0)
}
