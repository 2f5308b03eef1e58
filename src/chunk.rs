//! Token- and sentence-based chunking for the embedding collaborator.
//!
//! Sizes are measured in tokenizer tokens (`tiktoken-rs`, `cl100k_base` by
//! default) so chunks line up with the embedding model's context budget.

use crate::{backend::PageTextMap, config::ChunkingConfig, util::sha256_hex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{cl100k_base, get_bpe_from_model, o200k_base, p50k_base, r50k_base, CoreBPE};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid chunk window: size={size} overlap={overlap} (need size > 0 and overlap < size)")]
    InvalidWindow { size: usize, overlap: usize },
    #[error("failed to load tokenizer '{encoding}': {source}")]
    Tokenizer {
        encoding: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("could not decode token window {start}..{end} into text")]
    Decode { start: usize, end: usize },
    #[error("unknown chunking strategy: {0}")]
    UnknownStrategy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    Tokens,
    Sentences,
}

impl ChunkStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStrategy::Tokens => "tokens",
            ChunkStrategy::Sentences => "sentences",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ChunkError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tokens" => Ok(Self::Tokens),
            "sentences" => Ok(Self::Sentences),
            other => Err(ChunkError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub chunk_index: usize,
    pub source_file: String,
    pub page_number: Option<u32>,
    pub token_count: usize,
    pub character_count: usize,
    pub word_count: usize,
    pub strategy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkStatistics {
    pub total_chunks: usize,
    pub total_tokens: usize,
    pub total_characters: usize,
    pub total_words: usize,
    pub avg_tokens_per_chunk: f64,
    pub avg_chars_per_chunk: f64,
    pub avg_words_per_chunk: f64,
    pub min_tokens: usize,
    pub max_tokens: usize,
}

pub struct Chunker {
    bpe: Arc<CoreBPE>,
    cfg: ChunkingConfig,
}

impl Chunker {
    pub fn new(cfg: &ChunkingConfig) -> Result<Self, ChunkError> {
        let bpe = resolve_encoding(&cfg.encoding)?;
        Ok(Self {
            bpe: Arc::new(bpe),
            cfg: cfg.clone(),
        })
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len()
    }

    /// Fixed windows of `size` tokens, each starting `size - overlap` tokens
    /// after the previous one. A window may run a few tokens long when it
    /// would otherwise end inside a multi-byte character.
    pub fn chunk_by_tokens(
        &self,
        text: &str,
        size: usize,
        overlap: usize,
    ) -> Result<Vec<String>, ChunkError> {
        if size == 0 || overlap >= size {
            return Err(ChunkError::InvalidWindow { size, overlap });
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tokens = self.bpe.encode_ordinary(text);
        let total = tokens.len();
        debug!("chunking {total} tokens size={size} overlap={overlap}");

        // A token boundary can split a UTF-8 sequence: drop leading
        // continuation tokens and extend the tail until the window decodes.
        let decode_window = |start: usize, end: usize| -> Result<String, ChunkError> {
            for skip in 0..4 {
                for extra in 0..4 {
                    let s = start + skip;
                    let e = (end + extra).min(total);
                    if s >= e {
                        break;
                    }
                    if let Ok(text) = self.bpe.decode(tokens[s..e].to_vec()) {
                        return Ok(text);
                    }
                }
            }
            Err(ChunkError::Decode { start, end })
        };

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < total {
            let end = (start + size).min(total);
            chunks.push(decode_window(start, end)?);
            if end >= total {
                break;
            }
            start += size - overlap;
        }
        Ok(chunks)
    }

    /// Pack whole sentences into chunks of at most `max_tokens`; a single
    /// sentence over the budget is split by tokens.
    pub fn chunk_by_sentences(&self, text: &str, max_tokens: usize) -> Result<Vec<String>, ChunkError> {
        if max_tokens == 0 {
            return Err(ChunkError::InvalidWindow {
                size: max_tokens,
                overlap: 0,
            });
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let sentences = split_sentences(text);
        debug!("found {} sentences", sentences.len());

        let overlap = self.cfg.chunk_overlap.min(max_tokens / 5);
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0;

        for sentence in sentences {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            let n = self.count_tokens(sentence);

            if n > max_tokens {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                    current.clear();
                    current_tokens = 0;
                }
                chunks.extend(self.chunk_by_tokens(sentence, max_tokens, overlap)?);
                continue;
            }

            if current_tokens + n > max_tokens && !current.is_empty() {
                chunks.push(current.trim().to_string());
                current.clear();
                current_tokens = 0;
            }
            current.push_str(sentence);
            current.push(' ');
            current_tokens += n;
        }

        if !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
        }
        Ok(chunks)
    }

    /// Chunk `text` with `strategy` and attach per-chunk metadata.
    pub fn create_chunks(
        &self,
        text: &str,
        source_file: &str,
        page_number: Option<u32>,
        strategy: ChunkStrategy,
        size: usize,
    ) -> Result<Vec<Chunk>, ChunkError> {
        if text.trim().is_empty() {
            warn!("empty text from {source_file} page {page_number:?}");
            return Ok(Vec::new());
        }

        let raw = match strategy {
            ChunkStrategy::Tokens => {
                self.chunk_by_tokens(text, size, self.cfg.chunk_overlap.min(size.saturating_sub(1)))?
            }
            ChunkStrategy::Sentences => self.chunk_by_sentences(text, size)?,
        };

        Ok(raw
            .into_iter()
            .enumerate()
            .map(|(idx, t)| self.make_chunk(t, idx, source_file, page_number, strategy.as_str()))
            .collect())
    }

    fn make_chunk(
        &self,
        text: String,
        chunk_index: usize,
        source_file: &str,
        page_number: Option<u32>,
        strategy: &str,
    ) -> Chunk {
        let id_src = format!("{source_file}:{page_number:?}:{chunk_index}:{text}");
        Chunk {
            chunk_id: sha256_hex(id_src.as_bytes())[..32].to_string(),
            token_count: self.count_tokens(&text),
            character_count: text.chars().count(),
            word_count: text.split_whitespace().count(),
            text,
            chunk_index,
            source_file: source_file.to_string(),
            page_number,
            strategy: strategy.to_string(),
        }
    }

    /// Merge each chunk under `min_tokens` into its successor. A small final
    /// chunk has no successor and is kept as is.
    pub fn merge_small_chunks(&self, chunks: Vec<Chunk>, min_tokens: usize) -> Vec<Chunk> {
        let before = chunks.len();
        let mut merged = Vec::with_capacity(before);
        let mut iter = chunks.into_iter().peekable();

        while let Some(current) = iter.next() {
            if current.token_count >= min_tokens {
                merged.push(current);
                continue;
            }
            match iter.next() {
                Some(next) => {
                    let text = format!("{} {}", current.text, next.text);
                    let strategy = format!("{}_merged", current.strategy);
                    merged.push(self.make_chunk(
                        text,
                        current.chunk_index,
                        &current.source_file,
                        current.page_number,
                        &strategy,
                    ));
                }
                None => merged.push(current),
            }
        }

        debug!("merged {before} chunks into {}", merged.len());
        merged
    }

    /// Chunk one document (or page). With `auto_optimize` the size follows
    /// [`optimal_chunk_size`], sentences are kept whole and small chunks are
    /// merged; otherwise the configured strategy and size apply.
    pub fn chunk_document(
        &self,
        text: &str,
        source_file: &str,
        page_number: Option<u32>,
    ) -> Result<Vec<Chunk>, ChunkError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        if !self.cfg.auto_optimize {
            let strategy = ChunkStrategy::parse(&self.cfg.strategy)?;
            return self.create_chunks(text, source_file, page_number, strategy, self.cfg.chunk_size);
        }

        let size = optimal_chunk_size(self.count_tokens(text));
        let chunks = self.create_chunks(text, source_file, page_number, ChunkStrategy::Sentences, size)?;
        if chunks.is_empty() {
            return Ok(chunks);
        }
        Ok(self.merge_small_chunks(chunks, (size / 10).max(100)))
    }

    /// Chunk every non-empty page, tagging chunks with their page number.
    pub fn chunk_pages(&self, pages: &PageTextMap, source_file: &str) -> Result<Vec<Chunk>, ChunkError> {
        let mut all = Vec::new();
        for (&page, text) in pages {
            if text.trim().is_empty() {
                debug!("skipping empty page {page} in {source_file}");
                continue;
            }
            all.extend(self.chunk_document(text, source_file, Some(page))?);
        }
        info!("chunked {} pages of {source_file} into {} chunks", pages.len(), all.len());
        Ok(all)
    }
}

/// Chunk budget by document length: short documents get smaller chunks for
/// precision, long ones larger chunks.
pub fn optimal_chunk_size(document_tokens: usize) -> usize {
    match document_tokens {
        0..=2_000 => 500,
        2_001..=10_000 => 1000,
        10_001..=50_000 => 1500,
        _ => 2000,
    }
}

pub fn statistics(chunks: &[Chunk]) -> ChunkStatistics {
    if chunks.is_empty() {
        return ChunkStatistics::default();
    }
    let n = chunks.len() as f64;
    let total_tokens: usize = chunks.iter().map(|c| c.token_count).sum();
    let total_characters: usize = chunks.iter().map(|c| c.character_count).sum();
    let total_words: usize = chunks.iter().map(|c| c.word_count).sum();
    let round2 = |v: f64| (v * 100.0).round() / 100.0;

    ChunkStatistics {
        total_chunks: chunks.len(),
        total_tokens,
        total_characters,
        total_words,
        avg_tokens_per_chunk: round2(total_tokens as f64 / n),
        avg_chars_per_chunk: round2(total_characters as f64 / n),
        avg_words_per_chunk: round2(total_words as f64 / n),
        min_tokens: chunks.iter().map(|c| c.token_count).min().unwrap_or(0),
        max_tokens: chunks.iter().map(|c| c.token_count).max().unwrap_or(0),
    }
}

/// Split after `.`, `!` or `?` followed by whitespace, when the next
/// character starts a sentence. In case-folded text (no uppercase at all)
/// any letter or digit counts as a sentence start.
fn split_sentences(text: &str) -> Vec<&str> {
    let folded = !text.chars().any(char::is_uppercase);
    let starts_sentence = |c: char| c.is_uppercase() || (folded && c.is_alphanumeric());

    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let end = i + c.len_utf8();
        let mut ws_end = end;
        while let Some(&(j, w)) = chars.peek() {
            if !w.is_whitespace() {
                break;
            }
            ws_end = j + w.len_utf8();
            chars.next();
        }
        if ws_end == end {
            continue;
        }
        if let Some(&(_, next)) = chars.peek() {
            if starts_sentence(next) {
                out.push(&text[start..end]);
                start = ws_end;
            }
        }
    }

    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn resolve_encoding(name: &str) -> Result<CoreBPE, ChunkError> {
    let target = match name.trim() {
        "" => "cl100k_base",
        other => other,
    };
    let loaded = match target {
        "cl100k_base" => cl100k_base(),
        "o200k_base" => o200k_base(),
        "p50k_base" => p50k_base(),
        "r50k_base" | "gpt2" => r50k_base(),
        model => get_bpe_from_model(model).or_else(|err| {
            warn!("unknown encoding '{model}' ({err}); falling back to cl100k_base");
            cl100k_base()
        }),
    };
    loaded.map_err(|source| ChunkError::Tokenizer {
        encoding: target.to_string(),
        source,
    })
}
