//! Token-overlap alignment checking between a response and its context.
//!
//! The score is a vocabulary-tracing heuristic, not semantic entailment:
//! it measures how much of the response's (lower-cased, stop-word-free)
//! vocabulary appears in the supplied context. Thresholds are configuration,
//! not a correctness guarantee, and below-threshold responses are flagged
//! rather than rewritten.

use std::collections::HashSet;

use regex::Regex;

use crate::config::RetrievalConfig;
use crate::types::{RagError, ValidationVerdict};

use super::QueryMode;

/// Words too common to signal grounding either way.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does", "did", "will",
    "would", "could", "should", "may", "might", "must", "can", "this", "that", "these", "those",
    "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them",
];

/// Uncertain-language patterns worth surfacing alongside the score.
const UNCERTAINTY_PATTERNS: &[&str] = &[
    r"\b(apparently|possibly|maybe|might be)\b",
    r"\b(according to my knowledge|as far as i know)\b",
    r"\b(i think|i believe)\b",
    r"\b(unknown|not specified|not mentioned)\b",
];

/// Lower-case, strip punctuation, drop stop words.
pub fn content_tokens(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .filter(|token| !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Scores response/context alignment with mode-specific thresholds.
pub struct AlignmentValidator {
    selected_text_threshold: f32,
    book_wide_threshold: f32,
    patterns: Vec<Regex>,
}

impl AlignmentValidator {
    pub fn new(config: &RetrievalConfig) -> Result<Self, RagError> {
        let patterns = UNCERTAINTY_PATTERNS
            .iter()
            .map(|raw| {
                Regex::new(raw).map_err(|err| RagError::Config(format!("bad pattern: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            selected_text_threshold: config.selected_text_threshold,
            book_wide_threshold: config.book_wide_threshold,
            patterns,
        })
    }

    pub fn threshold_for(&self, mode: QueryMode) -> f32 {
        match mode {
            QueryMode::SelectedText => self.selected_text_threshold,
            QueryMode::BookWide => self.book_wide_threshold,
        }
    }

    /// Compute the verdict for one (response, context) pair.
    ///
    /// `alignment = 1 − unmatched/total` over content tokens; an empty
    /// response token set counts as fully aligned.
    pub fn validate(&self, response: &str, context: &str, mode: QueryMode) -> ValidationVerdict {
        let response_tokens = content_tokens(response);
        let context_tokens = content_tokens(context);

        let unmatched: Vec<&String> = response_tokens
            .iter()
            .filter(|token| !context_tokens.contains(*token))
            .collect();

        let alignment_score = if response_tokens.is_empty() {
            1.0
        } else {
            1.0 - unmatched.len() as f32 / response_tokens.len() as f32
        };

        let mut flagged_tokens: Vec<String> = unmatched
            .iter()
            .filter(|token| token.chars().count() > 3)
            .map(|token| token.to_string())
            .collect();
        flagged_tokens.sort();

        let response_lower = response.to_lowercase();
        let uncertainty_flags: Vec<String> = self
            .patterns
            .iter()
            .filter_map(|pattern| {
                pattern
                    .find(&response_lower)
                    .map(|found| found.as_str().to_string())
            })
            .collect();

        let threshold = self.threshold_for(mode);
        let verdict = ValidationVerdict {
            alignment_score,
            is_aligned: alignment_score > threshold,
            flagged_tokens,
            uncertainty_flags,
        };

        if !verdict.is_aligned {
            tracing::warn!(
                alignment_score,
                threshold,
                flagged = verdict.flagged_tokens.len(),
                "response fell below alignment threshold"
            );
        }
        verdict
    }
}
