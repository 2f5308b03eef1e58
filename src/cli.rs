use crate::{
    config::Config,
    document::DocumentHandle,
    llm::{self, ApiKey, CompletionRequest, LlmClient},
    pipeline::{ExtractMode, Pipeline},
    util::{ensure_dir, hash_source, now_rfc3339, sha256_hex, write_json},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "docsift")]
#[command(about = "PDF ingestion front end (two-backend extraction, cleaning, chunking, LLM hand-off)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./docsift.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check configuration, backends, tokenizer and the LLM credential.
    Doctor {
        /// Also send a short test prompt to the LLM endpoint.
        #[arg(long)]
        ping: bool,
    },
    /// Extract page text (and metadata in fallback mode) as JSON.
    Extract {
        #[arg(long)]
        input: PathBuf,
        /// fallback | lopdf | pdf-extract | all
        #[arg(long, default_value = "fallback")]
        method: ExtractMode,
    },
    /// Extract and print cleaned text.
    Clean {
        #[arg(long)]
        input: PathBuf,
    },
    /// Extract, clean and print chunks as JSON.
    Chunk {
        #[arg(long)]
        input: PathBuf,
    },
    /// Full job: outputs land in <out_dir>/<job_id>/.
    Run {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Answer a question from a document's text.
    Ask {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        question: String,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    // The key is read once here and passed down explicitly.
    let _ = dotenvy::dotenv();
    let api_key = ApiKey::from_env(&cfg.llm.api_key_env);

    match &args.cmd {
        Command::Doctor { ping } => {
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            doctor(&cfg, api_key, *ping)
        }
        Command::Extract { input, method } => {
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            extract(&cfg, input, *method)
        }
        Command::Clean { input } => {
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            clean(&cfg, input)
        }
        Command::Chunk { input } => {
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            chunk(&cfg, input)
        }
        Command::Ask { input, question } => {
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            ask(&cfg, api_key?, input, question)
        }
        Command::Run { input, out_dir } => run(&args, &cfg, input, out_dir.as_deref()),
    }
}

/// An explicit `--config` always wins; otherwise `./docsift.toml`, then the
/// shipped example, then built-in defaults.
fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["docsift.toml", "docsift.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Commands print their results on stdout; logs go to stderr.
    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn doctor(cfg: &Config, api_key: Result<ApiKey, llm::LlmError>, ping: bool) -> Result<()> {
    let pipeline = Pipeline::new(cfg);
    let tokenizer = pipeline
        .as_ref()
        .map(|p| p.chunker().count_tokens("docsift doctor") > 0);

    let credential = match &api_key {
        Ok(_) => serde_json::json!({ "ok": true, "env": cfg.llm.api_key_env }),
        Err(e) => serde_json::json!({ "ok": false, "env": cfg.llm.api_key_env, "error": e.to_string() }),
    };

    let connection = match (ping, api_key) {
        (false, _) => serde_json::Value::Null,
        (true, Err(_)) => serde_json::json!({ "ok": false, "error": "no usable credential" }),
        (true, Ok(key)) => match LlmClient::new(&cfg.llm, key).and_then(|c| c.test_connection()) {
            Ok(c) => serde_json::json!({ "ok": true, "model": c.model, "usage": c.usage }),
            Err(e) => serde_json::json!({ "ok": false, "error_type": e.kind(), "error": e.to_string() }),
        },
    };

    let pipeline_status = match &pipeline {
        Ok(_) => serde_json::json!({ "ok": true }),
        Err(e) => serde_json::json!({ "ok": false, "error": format!("{e:#}") }),
    };

    let diag = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "backends": {
            "primary": cfg.extraction.primary,
            "secondary": cfg.extraction.secondary,
        },
        "pipeline": pipeline_status,
        "tokenizer": {
            "encoding": cfg.chunking.encoding,
            "ok": tokenizer.unwrap_or(false),
        },
        "llm": {
            "base_url": cfg.llm.base_url,
            "model": cfg.llm.model,
            "credential": credential,
            "connection": connection,
        },
    });
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

fn open_input(cfg: &Config, pipeline: &Pipeline, input: &Path) -> Result<DocumentHandle> {
    validate_input(cfg, input)?;
    pipeline
        .open(input)
        .with_context(|| format!("opening input: {}", input.display()))
}

fn extract(cfg: &Config, input: &Path, mode: ExtractMode) -> Result<()> {
    let pipeline = Pipeline::new(cfg)?;
    let doc = open_input(cfg, &pipeline, input)?;
    let out = if mode == ExtractMode::Fallback {
        serde_json::to_value(pipeline.extract_all(&doc)?)?
    } else {
        serde_json::to_value(pipeline.extract(&doc, mode)?)?
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn clean(cfg: &Config, input: &Path) -> Result<()> {
    let pipeline = Pipeline::new(cfg)?;
    let doc = open_input(cfg, &pipeline, input)?;
    let processed = pipeline.extract_all(&doc)?;
    let cleaned = pipeline.cleaner().clean_pages(&processed.text_by_page);
    println!("{}", crate::pipeline::join_pages(&cleaned));
    Ok(())
}

fn chunk(cfg: &Config, input: &Path) -> Result<()> {
    let pipeline = Pipeline::new(cfg)?;
    let doc = open_input(cfg, &pipeline, input)?;
    let processed = pipeline.extract_all(&doc)?;
    let cleaned = pipeline.cleaner().clean_pages(&processed.text_by_page);
    let chunks = pipeline.chunker().chunk_pages(&cleaned, &processed.file_name)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "statistics": crate::chunk::statistics(&chunks),
            "chunks": chunks,
        }))?
    );
    Ok(())
}

fn ask(cfg: &Config, api_key: ApiKey, input: &Path, question: &str) -> Result<()> {
    let pipeline = Pipeline::new(cfg)?;
    let doc = open_input(cfg, &pipeline, input)?;
    let processed = pipeline.extract_all(&doc)?;
    let cleaned = pipeline.cleaner().clean_pages(&processed.text_by_page);
    let chunks = pipeline.chunker().chunk_pages(&cleaned, &processed.file_name)?;
    if chunks.is_empty() {
        return Err(anyhow!("no text to answer from in {}", input.display()));
    }

    let passages = llm::select_passages(&chunks, cfg.llm.max_context_tokens);
    info!("asking with {} of {} chunks", passages.len(), chunks.len());

    let client = LlmClient::new(&cfg.llm, api_key)?;
    let req = CompletionRequest::new(llm::build_prompt(question, &passages))
        .with_system(cfg.llm.system_message.clone());
    let completion = client.complete(&req)?;
    println!("{}", serde_json::to_string_pretty(&completion)?);
    Ok(())
}

fn run(args: &Args, cfg: &Config, input: &Path, out_override: Option<&Path>) -> Result<()> {
    validate_input(cfg, input)?;

    let cfg_norm = cfg.normalized_for_hash();
    let cfg_hash = sha256_hex(cfg_norm.as_bytes());
    let input_hash = {
        let file = std::fs::File::open(input)
            .with_context(|| format!("opening input: {}", input.display()))?;
        let size = file.metadata()?.len();
        hash_source(&cfg.hashing, file, size)
            .with_context(|| format!("hashing input: {}", input.display()))?
    };
    let job_id = sha256_hex(format!("{}:{}", cfg_hash, input_hash).as_bytes());

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let job_dir = out_root.join(&job_id);

    if job_dir.exists() && !cfg.global.resume {
        return Err(anyhow!(
            "job_dir already exists and resume=false: {}",
            job_dir.display()
        ));
    }

    ensure_dir(&job_dir)?;
    ensure_dir(&job_dir.join("logs"))?;

    let log_path = resolve_log_path(cfg, Some(&job_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    info!("job_id={job_id} out={}", job_dir.display());

    let pipeline = Pipeline::new(cfg)?;
    let doc = pipeline
        .open(input)
        .with_context(|| format!("opening input: {}", input.display()))?;

    let started = now_rfc3339();
    let result = pipeline.run_job(&doc)?;
    let out = &cfg.output;

    if out.write_document_json {
        write_json(&job_dir.join(&out.document_filename), &result.document)?;
    }
    if out.write_cleaned_text {
        std::fs::write(job_dir.join(&out.cleaned_filename), &result.cleaned_text)?;
    }
    if out.write_chunks_json {
        write_json(&job_dir.join(&out.chunks_filename), &result.chunks)?;
    }
    if out.write_report_json {
        write_json(&job_dir.join(&out.report_filename), &result.report)?;
    }

    if out.write_index_json {
        let index = serde_json::json!({
            "job_id": job_id,
            "job_name": cfg.global.job_name,
            "started": started,
            "finished": now_rfc3339(),
            "document": out.document_filename,
            "cleaned_text": out.cleaned_filename,
            "chunks": out.chunks_filename,
            "report": out.report_filename,
        });
        write_json(&job_dir.join("index.json"), &index)?;
    }

    for w in &result.document.warnings {
        warn!("{w}");
    }

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "job_id": job_id,
                "job_dir": job_dir,
                "status": result.document.status,
                "extraction_method": result.document.extraction_method,
                "pages": result.document.total_pages,
                "chunks": result.chunks.len(),
            }))?
        );
    }

    Ok(())
}

fn validate_input(cfg: &Config, input: &Path) -> Result<()> {
    let input_str = input.display().to_string();

    if cfg.security.reject_url_inputs && looks_like_url(&input_str) {
        return Err(anyhow!("URL inputs are disabled: {input_str}"));
    }

    Ok(())
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}

fn resolve_log_path(cfg: &Config, job_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(job_dir) = job_dir {
        return Some(job_dir.join("logs").join("docsift.log"));
    }

    Some(PathBuf::from("logs").join("docsift.log"))
}
