//! TF-IDF vectorization of catalog item text.
//!
//! Items are represented as `name + " " + description` projected onto a
//! vocabulary learned once from the full catalog. The vocabulary is capped to
//! the most frequent terms so every feature vector stays small and dense
//! enough to score against the whole catalog per request.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stopwords::is_stop_word;

/// Vocabulary cap used by the catalog index and the offline trainer.
pub const DEFAULT_MAX_FEATURES: usize = 100;

/// Contract violations surfaced by the vectorizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorizerError {
    /// `transform` was called before a successful `fit`.
    NotFitted,
    /// The fit corpus produced no vocabulary terms (all empty or stop words).
    EmptyVocabulary,
    /// A persisted state did not describe a usable fitted vectorizer.
    InvalidState(String),
}

impl fmt::Display for VectorizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorizerError::NotFitted => {
                write!(f, "vectorizer has not been fitted; call fit first")
            }
            VectorizerError::EmptyVocabulary => {
                write!(f, "fit corpus produced an empty vocabulary")
            }
            VectorizerError::InvalidState(reason) => {
                write!(f, "invalid vectorizer state: {reason}")
            }
        }
    }
}

impl std::error::Error for VectorizerError {}

/// Serializable fitted state, persisted by the snapshot artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizerState {
    /// Vocabulary cap the state was fitted with.
    pub max_features: usize,
    /// Terms in column order.
    pub vocabulary: Vec<String>,
    /// Inverse document frequency per column, parallel to `vocabulary`.
    pub idf: Vec<f64>,
}

/// TF-IDF vectorizer with a frequency-capped vocabulary.
///
/// `fit` learns the vocabulary and document frequencies; `transform` then
/// projects any text onto the fitted columns. Terms outside the vocabulary
/// are dropped silently, so transforming unseen text never fails once the
/// vectorizer is fitted.
#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    max_features: usize,
    vocabulary: Vec<String>,
    idf: Vec<f64>,
    term_index: HashMap<String, usize>,
}

impl Default for TfidfVectorizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FEATURES)
    }
}

impl TfidfVectorizer {
    /// Creates an unfitted vectorizer. `max_features` of 0 disables the cap.
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features,
            vocabulary: Vec::new(),
            idf: Vec::new(),
            term_index: HashMap::new(),
        }
    }

    /// True once `fit` (or `from_state`) has produced a vocabulary.
    pub fn is_fitted(&self) -> bool {
        !self.vocabulary.is_empty()
    }

    /// Number of feature columns; 0 while unfitted.
    pub fn dimension(&self) -> usize {
        self.vocabulary.len()
    }

    /// Terms in column order.
    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    /// Learns the vocabulary and idf weights from `corpus`.
    ///
    /// Terms are ranked by total corpus frequency (ties lexicographic) and
    /// truncated to the cap, so refitting identical text yields identical
    /// columns. A previous fit is replaced wholesale.
    pub fn fit(&mut self, corpus: &[String]) -> Result<(), VectorizerError> {
        let mut term_totals: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for text in corpus {
            let tokens = tokenize(text);
            for token in &tokens {
                *term_totals.entry(token.clone()).or_insert(0) += 1;
            }
            let distinct: HashSet<&String> = tokens.iter().collect();
            for token in distinct {
                *doc_freq.entry(token.clone()).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = term_totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if self.max_features > 0 {
            ranked.truncate(self.max_features);
        }
        if ranked.is_empty() {
            return Err(VectorizerError::EmptyVocabulary);
        }

        let n_docs = corpus.len();
        self.vocabulary = ranked.into_iter().map(|(term, _)| term).collect();
        self.idf = self
            .vocabulary
            .iter()
            .map(|term| {
                let df = doc_freq.get(term).copied().unwrap_or(0);
                smooth_idf(n_docs, df)
            })
            .collect();
        self.term_index = self
            .vocabulary
            .iter()
            .enumerate()
            .map(|(column, term)| (term.clone(), column))
            .collect();
        Ok(())
    }

    /// Projects `text` onto the fitted vocabulary as an L2-normalized
    /// tf-idf vector. All-out-of-vocabulary text yields the zero vector.
    pub fn transform(&self, text: &str) -> Result<Vec<f64>, VectorizerError> {
        if !self.is_fitted() {
            return Err(VectorizerError::NotFitted);
        }
        let mut vector = vec![0.0; self.vocabulary.len()];
        for token in tokenize(text) {
            if let Some(&column) = self.term_index.get(&token) {
                vector[column] += 1.0;
            }
        }
        for (value, idf) in vector.iter_mut().zip(&self.idf) {
            *value *= idf;
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }

    /// Transforms a batch of texts; row i corresponds to `texts[i]`.
    pub fn transform_many(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, VectorizerError> {
        texts.iter().map(|text| self.transform(text)).collect()
    }

    /// Fits on `corpus` and returns its vector matrix in corpus order.
    pub fn fit_transform(&mut self, corpus: &[String]) -> Result<Vec<Vec<f64>>, VectorizerError> {
        self.fit(corpus)?;
        self.transform_many(corpus)
    }

    /// Extracts the persistable fitted state.
    pub fn state(&self) -> VectorizerState {
        VectorizerState {
            max_features: self.max_features,
            vocabulary: self.vocabulary.clone(),
            idf: self.idf.clone(),
        }
    }

    /// Restores a fitted vectorizer from persisted state.
    pub fn from_state(state: VectorizerState) -> Result<Self, VectorizerError> {
        if state.vocabulary.is_empty() {
            return Err(VectorizerError::InvalidState(
                "vocabulary is empty".to_string(),
            ));
        }
        if state.idf.len() != state.vocabulary.len() {
            return Err(VectorizerError::InvalidState(format!(
                "idf length {} does not match vocabulary length {}",
                state.idf.len(),
                state.vocabulary.len()
            )));
        }
        let term_index = state
            .vocabulary
            .iter()
            .enumerate()
            .map(|(column, term)| (term.clone(), column))
            .collect();
        Ok(Self {
            max_features: state.max_features,
            vocabulary: state.vocabulary,
            idf: state.idf,
            term_index,
        })
    }
}

/// Lowercases and splits on non-alphanumeric boundaries, keeping terms of at
/// least two characters that are not stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    lowered
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| token.len() >= 2 && !is_stop_word(token))
        .map(ToString::to_string)
        .collect()
}

fn smooth_idf(n_docs: usize, doc_freq: usize) -> f64 {
    ((1 + n_docs) as f64 / (1 + doc_freq) as f64).ln() + 1.0
}

fn l2_normalize(vector: &mut [f64]) {
    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn corpus(texts: &[&str]) -> Vec<String> {
        texts.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn tokenize_case_folds_and_drops_noise() {
        let tokens = tokenize("The Quick-Brake PADS, for sedans!");
        assert_eq!(tokens, vec!["quick", "brake", "pads", "sedans"]);
    }

    #[test]
    fn tokenize_drops_single_characters() {
        assert_eq!(tokenize("a b oil"), vec!["oil"]);
    }

    #[test]
    fn fit_caps_vocabulary_by_frequency_then_term() {
        let mut vectorizer = TfidfVectorizer::new(2);
        vectorizer
            .fit(&corpus(&[
                "engine oil engine",
                "engine filter",
                "brake filter",
            ]))
            .unwrap();
        // engine appears 3 times, filter twice; brake and oil lose the cap.
        assert_eq!(vectorizer.vocabulary(), ["engine", "filter"]);
    }

    #[test]
    fn fit_breaks_frequency_ties_lexicographically() {
        let mut vectorizer = TfidfVectorizer::new(1);
        vectorizer.fit(&corpus(&["oil brake"])).unwrap();
        assert_eq!(vectorizer.vocabulary(), ["brake"]);
    }

    #[test]
    fn transform_before_fit_fails() {
        let vectorizer = TfidfVectorizer::default();
        assert_eq!(
            vectorizer.transform("engine oil"),
            Err(VectorizerError::NotFitted)
        );
    }

    #[test]
    fn fit_on_stop_words_only_fails() {
        let mut vectorizer = TfidfVectorizer::default();
        assert_eq!(
            vectorizer.fit(&corpus(&["the and of", ""])),
            Err(VectorizerError::EmptyVocabulary)
        );
    }

    #[test]
    fn out_of_vocabulary_terms_are_dropped() {
        let mut vectorizer = TfidfVectorizer::default();
        vectorizer
            .fit(&corpus(&["engine oil", "brake pads"]))
            .unwrap();
        let vector = vectorizer.transform("banana smoothie").unwrap();
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn transformed_vectors_are_l2_normalized() {
        let mut vectorizer = TfidfVectorizer::default();
        vectorizer
            .fit(&corpus(&["engine oil", "engine filter"]))
            .unwrap();
        let vector = vectorizer.transform("engine oil filter").unwrap();
        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9, "norm was {norm}");
    }

    #[test]
    fn idf_downweights_ubiquitous_terms() {
        let mut vectorizer = TfidfVectorizer::default();
        vectorizer
            .fit(&corpus(&["engine oil", "engine filter", "engine coolant"]))
            .unwrap();
        let vector = vectorizer.transform("engine oil").unwrap();
        let column = |term: &str| {
            vectorizer
                .vocabulary()
                .iter()
                .position(|t| t == term)
                .unwrap()
        };
        // "engine" is in every document, so "oil" carries more weight here.
        assert!(vector[column("oil")] > vector[column("engine")]);
    }

    #[test]
    fn refit_replaces_the_vocabulary() {
        let mut vectorizer = TfidfVectorizer::default();
        vectorizer.fit(&corpus(&["engine oil"])).unwrap();
        vectorizer.fit(&corpus(&["ceramic coating"])).unwrap();
        assert_eq!(vectorizer.vocabulary(), ["ceramic", "coating"]);
    }

    #[test]
    fn state_round_trip_preserves_transforms() {
        let mut vectorizer = TfidfVectorizer::default();
        vectorizer
            .fit(&corpus(&["engine oil", "brake pads", "car wash"]))
            .unwrap();
        let restored = TfidfVectorizer::from_state(vectorizer.state()).unwrap();
        assert_eq!(
            vectorizer.transform("engine wash").unwrap(),
            restored.transform("engine wash").unwrap()
        );
    }

    #[test]
    fn from_state_rejects_mismatched_idf() {
        let state = VectorizerState {
            max_features: 100,
            vocabulary: vec!["engine".to_string(), "oil".to_string()],
            idf: vec![1.0],
        };
        assert!(matches!(
            TfidfVectorizer::from_state(state),
            Err(VectorizerError::InvalidState(_))
        ));
    }
}
