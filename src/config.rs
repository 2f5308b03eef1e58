use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub hashing: Hashing,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub extraction: Extraction,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub job_name: String,
    pub resume: bool,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            job_name: "default".into(),
            resume: true,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Hashing {
    pub mode: String,
    pub fast_window_bytes: u64,
}
impl Default for Hashing {
    fn default() -> Self {
        Self {
            mode: "fast_2x16mb".into(),
            fast_window_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_input_file_bytes: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_file_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Extraction {
    /// Backend tried first: "lopdf" or "pdf-extract".
    pub primary: String,
    /// Backend tried when the primary fails outright.
    pub secondary: String,
    pub fallback_on_partial: bool,
}
impl Default for Extraction {
    fn default() -> Self {
        Self {
            primary: "lopdf".into(),
            secondary: "pdf-extract".into(),
            fallback_on_partial: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Punctuation kept by special-character removal, on top of letters,
    /// digits and whitespace.
    pub allowed_punctuation: String,
    /// Regexes for lines that are only a page number or marker. Matched
    /// against the trimmed line.
    pub page_marker_patterns: Vec<String>,
    pub remove_repeated_lines: bool,
    pub repeated_line_min_occurrences: u32,
    pub repeated_line_max_length: u32,
}
impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            allowed_punctuation: ".,!?;:'\"()-_".into(),
            page_marker_patterns: vec![
                "^\\d+$".into(),
                "(?i)^page\\s+\\d+(\\s*(of|/)\\s*\\d+)?$".into(),
                "^\\d+\\s*/\\s*\\d+$".into(),
                "^[-\u{2013}\u{2014}]\\s*\\d+\\s*[-\u{2013}\u{2014}]$".into(),
            ],
            remove_repeated_lines: true,
            repeated_line_min_occurrences: 3,
            repeated_line_max_length: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// "tokens" or "sentences"; used when `auto_optimize` is off.
    pub strategy: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub encoding: String,
    pub auto_optimize: bool,
}
impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: "tokens".into(),
            chunk_size: 1000,
            chunk_overlap: 200,
            encoding: "cl100k_base".into(),
            auto_optimize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
    /// Environment variable holding the API key. The key itself never goes
    /// in the config file.
    pub api_key_env: String,
    pub system_message: String,
    /// Token budget for document context packed into an `ask` prompt.
    pub max_context_tokens: usize,
}
impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-3.5-turbo".into(),
            max_tokens: 500,
            temperature: 0.7,
            timeout_seconds: 60,
            api_key_env: "OPENAI_API_KEY".into(),
            system_message: "Answer using only the provided document excerpts. \
                             Say so when the excerpts do not contain the answer."
                .into(),
            max_context_tokens: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub write_document_json: bool,
    pub write_cleaned_text: bool,
    pub write_chunks_json: bool,
    pub write_report_json: bool,
    pub write_index_json: bool,
    pub document_filename: String,
    pub cleaned_filename: String,
    pub chunks_filename: String,
    pub report_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_document_json: true,
            write_cleaned_text: true,
            write_chunks_json: true,
            write_report_json: true,
            write_index_json: true,
            document_filename: "document.json".into(),
            cleaned_filename: "cleaned.txt".into(),
            chunks_filename: "chunks.json".into(),
            report_filename: "report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub reject_url_inputs: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            reject_url_inputs: true,
        }
    }
}
