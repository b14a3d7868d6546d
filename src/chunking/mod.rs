//! Splitting extracted text into bounded, overlapping, deterministically
//! identified chunks.
//!
//! One [`Chunker`] replaces the assorted size/paragraph/heading splitters
//! that tend to accumulate in ingestion codebases: every strategy funnels
//! through the same packing core, re-numbers `chunk_order` contiguously from
//! zero, and derives ids with the same pure function, so re-chunking
//! identical input always yields identical chunks.
//!
//! Token counts are whitespace-word approximations throughout; no model
//! tokenizer is involved.

pub mod splitter;

use serde::{Deserialize, Serialize};

use crate::config::ChunkingConfig;
use crate::types::{Chunk, SourceRef};

use splitter::{is_heading_line, split_paragraphs, split_sentences};

/// Selectable splitting strategy, applied per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Sentence-aware greedy packing with a trailing overlap window.
    #[default]
    Sentence,
    /// One chunk per paragraph, falling back to sentence packing for
    /// oversized paragraphs.
    Paragraph,
    /// Split at heading lines, keeping each heading with its content.
    Heading,
}

/// Aggregate statistics over one chunking run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingStats {
    pub total_chunks: usize,
    pub total_tokens: usize,
    pub avg_tokens: f64,
    pub min_tokens: usize,
    pub max_tokens: usize,
}

impl ChunkingStats {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        if chunks.is_empty() {
            return Self {
                total_chunks: 0,
                total_tokens: 0,
                avg_tokens: 0.0,
                min_tokens: 0,
                max_tokens: 0,
            };
        }
        let counts: Vec<usize> = chunks.iter().map(Chunk::token_count).collect();
        let total: usize = counts.iter().sum();
        Self {
            total_chunks: chunks.len(),
            total_tokens: total,
            avg_tokens: total as f64 / counts.len() as f64,
            min_tokens: counts.iter().copied().min().unwrap_or(0),
            max_tokens: counts.iter().copied().max().unwrap_or(0),
        }
    }
}

/// Splits document text into ordered [`Chunk`]s.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk `text` with the default sentence strategy.
    pub fn chunk(&self, text: &str, source: &SourceRef) -> Vec<Chunk> {
        self.chunk_with(text, source, ChunkStrategy::Sentence)
    }

    /// Chunk `text` with an explicit strategy.
    ///
    /// The result is a finite, restartable, idempotent sequence:
    /// `chunk_order` runs contiguously from 0 and every id is a pure
    /// function of `(source, order)`. Empty input yields zero chunks.
    pub fn chunk_with(
        &self,
        text: &str,
        source: &SourceRef,
        strategy: ChunkStrategy,
    ) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let pieces = match strategy {
            ChunkStrategy::Sentence => self.pack_sentences(&split_sentences(text)),
            ChunkStrategy::Paragraph => self.split_by_paragraph(text),
            ChunkStrategy::Heading => self.split_by_heading(text),
        };

        let chunks = finalize(pieces, source, strategy);
        tracing::debug!(
            strategy = ?strategy,
            chunks = chunks.len(),
            source = %source.chunk_id(0),
            "chunked document"
        );
        chunks
    }

    /// Greedily pack sentences into chunks below `max_tokens`, seeding each
    /// new chunk with a trailing window of prior sentences no larger than
    /// `overlap_tokens`.
    ///
    /// A chunk closes as soon as the next sentence would make it reach the
    /// maximum. A single sentence at or over the maximum is still emitted
    /// whole, never dropped or split mid-sentence.
    fn pack_sentences(&self, sentences: &[String]) -> Vec<String> {
        let max = self.config.max_tokens.max(1);
        let mut pieces = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = 0usize;

        let mut i = 0usize;
        while i < sentences.len() {
            let sentence = sentences[i].as_str();
            let tokens = approx_tokens(sentence);

            if current_tokens + tokens >= max && !current.is_empty() {
                pieces.push(current.join(" "));

                let (overlap, overlap_tokens) = self.overlap_window(&current);
                // An overlap that cannot even admit the pending sentence
                // would only re-emit old content; start clean instead.
                if overlap_tokens + tokens >= max {
                    current = Vec::new();
                    current_tokens = 0;
                } else {
                    current = overlap;
                    current_tokens = overlap_tokens;
                }
                continue;
            }

            current.push(sentence);
            current_tokens += tokens;
            i += 1;
        }

        if !current.is_empty() {
            pieces.push(current.join(" "));
        }

        pieces
    }

    /// Trailing sentences of `chunk` whose combined size fits the overlap
    /// budget. Never includes the whole chunk.
    fn overlap_window<'a>(&self, chunk: &[&'a str]) -> (Vec<&'a str>, usize) {
        if self.config.overlap_tokens == 0 || chunk.len() < 2 {
            return (Vec::new(), 0);
        }
        let mut window = Vec::new();
        let mut total = 0usize;
        for sentence in chunk.iter().rev().take(chunk.len() - 1) {
            let tokens = approx_tokens(sentence);
            if total + tokens > self.config.overlap_tokens {
                break;
            }
            window.push(*sentence);
            total += tokens;
        }
        window.reverse();
        (window, total)
    }

    fn split_by_paragraph(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        for paragraph in split_paragraphs(text) {
            if approx_tokens(&paragraph) >= self.config.max_tokens {
                pieces.extend(self.pack_sentences(&split_sentences(&paragraph)));
            } else {
                pieces.push(paragraph);
            }
        }
        pieces
    }

    fn split_by_heading(&self, text: &str) -> Vec<String> {
        // Group lines into (heading, body) sections; content before the
        // first heading forms a headingless section.
        let mut sections: Vec<(Option<String>, Vec<&str>)> = Vec::new();
        for line in text.lines() {
            if is_heading_line(line) {
                sections.push((Some(line.trim().to_string()), Vec::new()));
            } else {
                match sections.last_mut() {
                    Some((_, body)) => body.push(line),
                    None => sections.push((None, vec![line])),
                }
            }
        }

        let mut pieces = Vec::new();
        for (heading, body_lines) in sections {
            let body = body_lines.join("\n").trim().to_string();
            match heading {
                Some(heading) => {
                    let combined = if body.is_empty() {
                        heading.clone()
                    } else {
                        format!("{heading}\n\n{body}")
                    };
                    if approx_tokens(&combined) >= self.config.max_tokens && !body.is_empty() {
                        let packed = self.pack_sentences(&split_sentences(&body));
                        for (index, piece) in packed.into_iter().enumerate() {
                            if index == 0 {
                                pieces.push(format!("{heading}\n\n{piece}"));
                            } else {
                                pieces.push(piece);
                            }
                        }
                    } else {
                        pieces.push(combined);
                    }
                }
                None => {
                    if body.is_empty() {
                        continue;
                    }
                    if approx_tokens(&body) >= self.config.max_tokens {
                        pieces.extend(self.pack_sentences(&split_sentences(&body)));
                    } else {
                        pieces.push(body);
                    }
                }
            }
        }
        pieces
    }

    /// Merge adjacent undersized chunks without exceeding the maximum, then
    /// re-number and re-derive ids so the usual invariants keep holding.
    pub fn merge_undersized(&self, chunks: Vec<Chunk>, source: &SourceRef) -> Vec<Chunk> {
        if chunks.len() <= 1 {
            return chunks;
        }
        let small = self.config.min_tokens * 2;

        let mut merged: Vec<String> = Vec::new();
        let mut i = 0usize;
        while i < chunks.len() {
            let current = &chunks[i];
            if current.token_count() >= small {
                merged.push(current.content.clone());
                i += 1;
                continue;
            }

            let mut combined = current.content.clone();
            let mut j = i + 1;
            while j < chunks.len() {
                let next = &chunks[j];
                let would_be = approx_tokens(&combined) + next.token_count();
                if would_be <= self.config.max_tokens && next.token_count() < small {
                    combined.push_str("\n\n");
                    combined.push_str(&next.content);
                    j += 1;
                } else {
                    break;
                }
            }
            merged.push(combined);
            i = j;
        }

        merged
            .into_iter()
            .enumerate()
            .map(|(order, content)| Chunk::new(content, source.clone(), order))
            .collect()
    }
}

/// Whitespace-word token approximation.
pub fn approx_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

fn finalize(pieces: Vec<String>, source: &SourceRef, strategy: ChunkStrategy) -> Vec<Chunk> {
    pieces
        .into_iter()
        .enumerate()
        .map(|(order, content)| {
            let tokens = approx_tokens(&content);
            Chunk::new(content, source.clone(), order).with_metadata(serde_json::json!({
                "strategy": strategy,
                "token_count": tokens,
            }))
        })
        .collect()
}
