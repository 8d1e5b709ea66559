use crate::model::Answer;
use std::cmp::Ordering;
use std::collections::BTreeSet;

const QUALNAME_WEIGHT: f64 = 3.0;
const NAME_WEIGHT: f64 = 2.0;
const SUBSTRING_WEIGHT: f64 = 1.0;
const DOC_WEIGHT: f64 = 0.5;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "of", "on", "or", "the", "this", "to", "what", "when", "where",
    "which", "who", "why", "with",
];

/// Precomputed search terms of one symbol, as persisted at index time.
#[derive(Debug, Clone)]
pub struct SearchDoc {
    pub qualname: String,
    pub file: String,
    pub line: i64,
    pub name_terms: BTreeSet<String>,
    pub qual_terms: BTreeSet<String>,
    pub doc_terms: BTreeSet<String>,
    pub qualname_folded: String,
}

impl SearchDoc {
    pub fn new(
        qualname: &str,
        name: &str,
        docstring: Option<&str>,
        file: &str,
        line: i64,
    ) -> Self {
        Self {
            qualname: qualname.to_string(),
            file: file.to_string(),
            line,
            name_terms: tokenize(name),
            qual_terms: tokenize(qualname),
            doc_terms: docstring.map(tokenize).unwrap_or_default(),
            qualname_folded: qualname.to_lowercase(),
        }
    }
}

/// Case-folded tokens of free text or an identifier path: split on
/// punctuation, then on `snake_case`, `camelCase` and digit boundaries.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for word in text.split(|ch: char| !ch.is_alphanumeric() && ch != '_') {
        if word.is_empty() {
            continue;
        }
        for part in split_identifier(word) {
            if let Some(token) = normalize_token(&part) {
                tokens.insert(token);
            }
        }
    }
    tokens
}

/// Query tokens with stopwords removed.
pub fn query_terms(query: &str) -> BTreeSet<String> {
    tokenize(query)
        .into_iter()
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .collect()
}

pub fn score(query: &BTreeSet<String>, doc: &SearchDoc) -> f64 {
    let mut total = 0.0;
    for token in query {
        if doc.qual_terms.contains(token) {
            total += QUALNAME_WEIGHT;
        } else if doc.qualname_folded.contains(token.as_str()) {
            total += SUBSTRING_WEIGHT;
        }
        if doc.name_terms.contains(token) {
            total += NAME_WEIGHT;
        }
        if doc.doc_terms.contains(token) {
            total += DOC_WEIGHT;
        }
    }
    total
}

/// Positive-scoring documents, best first, ties by qualified name.
pub fn rank<I>(query: &str, docs: I, top_k: usize) -> Vec<Answer>
where
    I: IntoIterator<Item = SearchDoc>,
{
    let terms = query_terms(query);
    if terms.is_empty() || top_k == 0 {
        return Vec::new();
    }
    let mut answers: Vec<Answer> = docs
        .into_iter()
        .filter_map(|doc| {
            let score = score(&terms, &doc);
            (score > 0.0).then(|| Answer {
                qualified_name: doc.qualname,
                file: doc.file,
                line: doc.line,
                score,
            })
        })
        .collect();
    answers.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.qualified_name.cmp(&b.qualified_name))
    });
    answers.truncate(top_k);
    answers
}

fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    // category and byte offset of the previous character
    let mut prev: Option<(CharClass, usize)> = None;
    for (idx, ch) in word.char_indices() {
        if ch == '_' {
            if start < idx {
                parts.push(word[start..idx].to_string());
            }
            start = idx + ch.len_utf8();
            prev = None;
            continue;
        }
        let class = CharClass::of(ch);
        if let Some((prev_class, prev_idx)) = prev {
            if prev_class == CharClass::Lower && class == CharClass::Upper {
                if start < idx {
                    parts.push(word[start..idx].to_string());
                }
                start = idx;
            } else if (prev_class == CharClass::Digit) != (class == CharClass::Digit) {
                if start < idx {
                    parts.push(word[start..idx].to_string());
                }
                start = idx;
            } else if prev_class == CharClass::Upper
                && class == CharClass::Lower
                && prev_idx > start
            {
                // `HTTPServer` splits as `HTTP` + `Server`.
                parts.push(word[start..prev_idx].to_string());
                start = prev_idx;
            }
        }
        prev = Some((class, idx));
    }
    if start < word.len() {
        parts.push(word[start..].to_string());
    }
    parts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Lower,
    Upper,
    Digit,
    Other,
}

impl CharClass {
    fn of(ch: char) -> Self {
        if ch.is_lowercase() {
            CharClass::Lower
        } else if ch.is_uppercase() {
            CharClass::Upper
        } else if ch.is_numeric() {
            CharClass::Digit
        } else {
            CharClass::Other
        }
    }
}

fn normalize_token(raw: &str) -> Option<String> {
    let token = raw.to_lowercase();
    (!token.is_empty()).then_some(token)
}
