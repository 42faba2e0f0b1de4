//! Lexical helpers shared by scoring, embedding and merging

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// Lowercase alphanumeric tokens of length >= 2.
///
/// Apostrophes inside a word are kept so that contractions such as
/// "doesn't" stay one token.
pub fn tokenize(text: &str) -> Vec<String> {
    fn flush(current: &mut String, tokens: &mut Vec<String>) {
        let word = current.trim_matches('\'');
        if word.chars().count() >= 2 {
            tokens.push(word.to_string());
        }
        current.clear();
    }

    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if (c == '\'' || c == '\u{2019}') && !current.is_empty() {
            current.push('\'');
        } else {
            flush(&mut current, &mut tokens);
        }
    }
    flush(&mut current, &mut tokens);

    tokens
}

/// Distinct tokens of `text`.
pub fn token_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Crude suffix stemmer: enough to line up "improves"/"improve"/"improved".
pub fn stem(token: &str) -> String {
    let mut word = token.to_string();
    for suffix in ["ing", "ed", "es", "s"] {
        if word.len() > suffix.len() + 2 && word.ends_with(suffix) {
            word.truncate(word.len() - suffix.len());
            break;
        }
    }
    if word.len() > 3 && word.ends_with('e') {
        word.pop();
    }
    word
}

/// Intersection over union. Two empty sets score 0.
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Term-frequency vector of a token list.
pub fn term_frequencies<T: Hash + Eq + Clone>(tokens: &[T]) -> HashMap<T, f32> {
    let mut freqs = HashMap::new();
    for token in tokens {
        *freqs.entry(token.clone()).or_insert(0.0) += 1.0;
    }
    freqs
}

/// Cosine similarity between the word-frequency vectors of two texts.
pub fn word_frequency_cosine(a: &str, b: &str) -> f32 {
    let fa = term_frequencies(&tokenize(a));
    let fb = term_frequencies(&tokenize(b));
    if fa.is_empty() || fb.is_empty() {
        return 0.0;
    }
    let dot: f32 = fa
        .iter()
        .filter_map(|(t, x)| fb.get(t).map(|y| x * y))
        .sum();
    let norm_a: f32 = fa.values().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = fb.values().map(|x| x * x).sum::<f32>().sqrt();
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// The first `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
