//! Text normalization and tokenization shared by indexing and querying.

use std::collections::HashSet;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Lowercase, strip diacritics, and turn every non-alphanumeric run into one space.
///
/// `"Infarto Agudo do Miocárdio"` -> `"infarto agudo do miocardio"`.
pub fn normalize_text(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut pending_space = false;

  for c in text.nfd().filter(|c| !is_combining_mark(*c)) {
    if c.is_alphanumeric() {
      if pending_space && !out.is_empty() {
        out.push(' ');
      }
      pending_space = false;
      out.extend(c.to_lowercase());
    } else {
      pending_space = true;
    }
  }

  out
}

/// Unique tokens of `text`, in first-appearance order.
pub fn tokenize(text: &str) -> Vec<String> {
  let normalized = normalize_text(text);
  let mut seen: HashSet<&str> = HashSet::new();
  normalized
    .split_whitespace()
    .filter(|token| seen.insert(*token))
    .map(str::to_string)
    .collect()
}
