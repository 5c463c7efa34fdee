//! # SPIRAL CLI
//!
//! Run and validate SPIRAL documents (AIR, CIR, EIR, LIR, PIR layers).
//!
//! ## Usage
//!
//! ```bash
//! spiral demos/arithmetic.air.json
//! spiral demos/factorial.cir.json --verbose
//! spiral demos/prompt-upper.eir.json --inputs "hello"
//! spiral demos/while-cfg.lir.json --trace
//! spiral demos/rendezvous.pir.json --validate
//! ```
//!
//! Exit code 0 on success, 1 on validation or evaluation error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use spiral::effects::{create_default_effect_registry, create_queued_effect_registry};
use spiral::registry::create_standard_registry;
use spiral::session::evaluate_document;
use spiral::validator::validate_document;
use spiral::{Config, Layer};

/// Run and validate SPIRAL documents.
#[derive(Parser, Debug)]
#[command(name = "spiral", version, about)]
struct Cli {
    /// Document to evaluate; the layer is inferred from the file extension
    /// (.air/.cir/.eir/.lir/.pir[.json]), then from path segments, then
    /// defaults to AIR
    path: PathBuf,

    /// Validate only, do not evaluate
    #[arg(long)]
    validate: bool,

    /// Enable per-step trace output
    #[arg(long)]
    trace: bool,

    /// Comma-separated or JSON-array inputs for the input-queue effect
    /// registry
    #[arg(long)]
    inputs: Option<String>,

    /// JSON-array input file for the input-queue effect registry
    #[arg(long)]
    inputs_file: Option<PathBuf>,

    /// Print document metadata and the ordered effect log
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(cli: &Cli, config: &Config) {
    let directive = if cli.trace {
        "spiral=trace".to_string()
    } else if cli.verbose {
        "spiral=debug".to_string()
    } else {
        format!("spiral={}", config.logging.level)
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Parse `--inputs`: a JSON array or comma-separated scalars.
fn parse_inputs(raw: &str) -> Vec<String> {
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(raw) {
        return items
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
    }
    raw.split(',').map(|s| s.trim().to_string()).collect()
}

fn read_inputs_file(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read inputs file {}", path.display()))?;
    let items: Vec<serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array", path.display()))?;
    Ok(items
        .iter()
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect())
}

/// The sibling `<stem>.inputs.json` consulted for interactive layers when
/// no inputs flag is given.
fn sibling_inputs_path(path: &Path, layer: Layer) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".json")
        .unwrap_or(&name)
        .strip_suffix(&format!(".{}", layer.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| {
            name.strip_suffix(".json")
                .unwrap_or(&name)
                .to_string()
        });
    path.with_file_name(format!("{stem}.inputs.json"))
}

fn resolve_inputs(cli: &Cli, layer: Layer) -> Result<Option<Vec<String>>> {
    if let Some(raw) = &cli.inputs {
        return Ok(Some(parse_inputs(raw)));
    }
    if let Some(path) = &cli.inputs_file {
        return Ok(Some(read_inputs_file(path)?));
    }
    // Interactive layers consult the sibling inputs file
    if layer >= Layer::Eir {
        let sibling = sibling_inputs_path(&cli.path, layer);
        if sibling.is_file() {
            return Ok(Some(read_inputs_file(&sibling)?));
        }
    }
    Ok(None)
}

fn run(cli: &Cli, config: &Config) -> Result<ExitCode> {
    let layer = Layer::infer_from_path(&cli.path.to_string_lossy());
    let raw = std::fs::read_to_string(&cli.path)
        .with_context(|| format!("cannot read {}", cli.path.display()))?;
    let tree: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", cli.path.display()))?;

    let doc = match validate_document(layer, &tree) {
        Ok(doc) => doc,
        Err(diags) => {
            eprintln!("{} validation error(s):", diags.len());
            for d in &diags {
                eprintln!("  {d}");
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    if cli.validate {
        println!("{}: valid {} document", cli.path.display(), layer);
        return Ok(ExitCode::SUCCESS);
    }

    if cli.verbose {
        println!(
            "layer={layer} version={} nodes={} result={}",
            doc.version,
            doc.nodes.len(),
            doc.result
        );
    }

    let effects = match resolve_inputs(cli, layer)? {
        Some(inputs) => create_queued_effect_registry(inputs),
        None => create_default_effect_registry(),
    };
    let opts = config.session_options(cli.trace);
    let outcome = evaluate_document(doc, create_standard_registry(), effects, &opts);

    if cli.verbose && !outcome.effects.is_empty() {
        println!("effects:");
        for record in &outcome.effects {
            println!("  [{}] {} {}", record.seq, record.task, record.effect);
        }
    }

    match &outcome.value {
        spiral::Value::Error(e) => {
            match &e.message {
                Some(msg) => eprintln!("error: {} ({msg})", e.code),
                None => eprintln!("error: {}", e.code),
            }
            Ok(ExitCode::FAILURE)
        }
        value => {
            println!("{value}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::load().unwrap_or_default();
    init_logging(&cli, &config);

    match run(&cli, &config) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
