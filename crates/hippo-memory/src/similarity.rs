//! Lexical similarity scoring.
//!
//! Texts are segmented into words by a [`Tokenizer`], turned into
//! bag-of-words [`TermVector`]s, and compared with cosine similarity over the
//! union of their vocabularies (absent words count as zero).
//!
//! Two flavours are used by the engine:
//!
//! * [`SimilarityScorer::text_similarity`] – term-frequency cosine, used by
//!   the query path to match input topics against graph concepts.
//! * [`SimilarityScorer::overlap_similarity`] – cosine over *binary* word
//!   sets, used during consolidation to find existing concepts that look like
//!   a freshly extracted topic.
//!
//! # Example
//!
//! ```rust
//! use hippo_memory::similarity::SimilarityScorer;
//!
//! let scorer = SimilarityScorer::default();
//! assert!((scorer.text_similarity("black cat", "black cat") - 1.0).abs() < 1e-9);
//! assert_eq!(scorer.text_similarity("black cat", "green tea"), 0.0);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Word → occurrence count.
pub type TermVector = HashMap<String, usize>;

// ─────────────────────────────────────────────────────────────────────────────
// Tokenizer
// ─────────────────────────────────────────────────────────────────────────────

/// Language-specific word segmentation.
pub trait Tokenizer: Send + Sync {
    /// Split `text` into word tokens.  Must be deterministic.
    fn segment(&self, text: &str) -> Vec<String>;
}

/// Unicode-aware fallback tokenizer.
///
/// Runs of alphanumeric characters become one lower-cased token each; CJK
/// ideographs and kana, which are written without spaces, are emitted one
/// character per token.  Everything else separates tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTokenizer;

fn is_unspaced_script(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'   // hiragana, katakana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        | '\u{F900}'..='\u{FAFF}' // CJK compatibility ideographs
    )
}

impl Tokenizer for SimpleTokenizer {
    fn segment(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        for c in text.chars() {
            if is_unspaced_script(c) {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
                tokens.push(c.to_string());
            } else if c.is_alphanumeric() {
                word.extend(c.to_lowercase());
            } else if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
        }
        if !word.is_empty() {
            tokens.push(word);
        }
        tokens
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cosine similarity
// ─────────────────────────────────────────────────────────────────────────────

/// Cosine similarity between two equal-length dense vectors.
///
/// Returns `0.0` if either vector has zero norm (including empty vectors).
/// Trailing components of the longer slice are treated as paired with zero.
pub fn cosine_dense(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Cosine similarity between two sparse term vectors over the union of keys.
///
/// Returns `0.0` if either vector has zero norm.
pub fn cosine(v1: &TermVector, v2: &TermVector) -> f64 {
    let norm = |v: &TermVector| v.values().map(|&c| (c * c) as f64).sum::<f64>().sqrt();
    let (n1, n2) = (norm(v1), norm(v2));
    if n1 == 0.0 || n2 == 0.0 {
        return 0.0;
    }
    let dot: f64 = v1
        .iter()
        .filter_map(|(word, &c1)| v2.get(word).map(|&c2| (c1 * c2) as f64))
        .sum();
    dot / (n1 * n2)
}

// ─────────────────────────────────────────────────────────────────────────────
// SimilarityScorer
// ─────────────────────────────────────────────────────────────────────────────

/// Vectorizes text with a shared [`Tokenizer`] and scores pairs of texts.
#[derive(Clone)]
pub struct SimilarityScorer {
    tokenizer: Arc<dyn Tokenizer>,
}

impl SimilarityScorer {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    /// Word → count map for `text`.
    pub fn vectorize(&self, text: &str) -> TermVector {
        let mut vector = TermVector::new();
        for word in self.tokenizer.segment(text) {
            *vector.entry(word).or_insert(0) += 1;
        }
        vector
    }

    /// Term-frequency cosine similarity of two texts.
    pub fn text_similarity(&self, a: &str, b: &str) -> f64 {
        cosine(&self.vectorize(a), &self.vectorize(b))
    }

    /// Cosine similarity of the two texts' word *sets*, i.e.
    /// `|A ∩ B| / sqrt(|A| · |B|)`.
    pub fn overlap_similarity(&self, a: &str, b: &str) -> f64 {
        let set_a: HashSet<String> = self.tokenizer.segment(a).into_iter().collect();
        let set_b: HashSet<String> = self.tokenizer.segment(b).into_iter().collect();
        if set_a.is_empty() || set_b.is_empty() {
            return 0.0;
        }
        let shared = set_a.intersection(&set_b).count() as f64;
        shared / ((set_a.len() * set_b.len()) as f64).sqrt()
    }
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new(Arc::new(SimpleTokenizer))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
