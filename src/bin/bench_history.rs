use bench_history::codec;
use bench_history::gobench;
use bench_history::render;
use bench_history::scan::{self, DEFAULT_FILE_NAME};
use bench_history::{CommitRecord, Entry, Error, FileBackend, HistoryStore, StoreConfig};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Subcommand, Debug)]
enum Command {
    /// Append one benchmark run to a suite of a history file.
    ///
    /// The entry comes either from `--entry` (a JSON entry) or from
    /// `--bench-output` plus `--commit` (Go benchmark text and commit JSON).
    Ingest {
        /// History file (`data.js`). Created if missing.
        #[arg(long, value_name = "FILE")]
        data: PathBuf,

        /// Suite name, e.g. "Benchmark for fluentd".
        #[arg(long)]
        suite: String,

        /// Fully populated entry as JSON.
        #[arg(long, value_name = "FILE", conflicts_with_all = ["bench_output", "commit"])]
        entry: Option<PathBuf>,

        /// `go test -bench` output; `-` reads stdin.
        #[arg(long, value_name = "FILE", requires = "commit")]
        bench_output: Option<PathBuf>,

        /// Commit metadata as JSON (same shape as the stored `commit` object).
        #[arg(long, value_name = "FILE")]
        commit: Option<PathBuf>,

        /// Harness identifier stored on the entry.
        #[arg(long, default_value = "go")]
        tool: String,

        /// Ingest time in epoch milliseconds. Defaults to now.
        #[arg(long)]
        date: Option<u64>,

        /// Repository the history belongs to. Required for a new file.
        #[arg(long)]
        repo_url: Option<String>,
    },

    /// Project a suite into chart points.
    Render {
        #[arg(long, value_name = "FILE")]
        data: PathBuf,

        /// Suite to render. Renders every suite when omitted.
        #[arg(long)]
        suite: Option<String>,

        /// Group points per metric instead of one flat list.
        #[arg(long, default_value_t = false)]
        series: bool,
    },

    /// Print suites, entry counts and last update of a history file.
    Show {
        #[arg(value_name = "FILE")]
        data: PathBuf,
    },

    /// Summarize every history file under a directory.
    Scan {
        #[arg(value_name = "DIR")]
        root: PathBuf,

        #[arg(long, default_value = DEFAULT_FILE_NAME)]
        file_name: String,
    },
}

#[derive(Parser, Debug)]
#[command(name = "bench-history")]
#[command(about = "Append-only benchmark history store (data.js for the dashboard)")]
struct Args {
    /// TOML store configuration.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override `max_attempts` from the configuration.
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Override `timeout_ms` from the configuration.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Override the global variable name in the persisted script.
    #[arg(long, global = true)]
    variable: Option<String>,

    /// Where to write the JSON report. If omitted, prints to stdout.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    /// Log filter, e.g. `info` or `bench_history=debug`. `RUST_LOG` wins when set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    cmd: Command,
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn input_error(what: &Path, reason: impl ToString) -> Error {
    Error::Input {
        what: what.display().to_string(),
        reason: reason.to_string(),
    }
}

fn read_input(path: &Path) -> Result<String, Error> {
    if path.as_os_str() == "-" {
        let mut s = String::new();
        io::stdin()
            .read_to_string(&mut s)
            .map_err(|e| input_error(path, e))?;
        return Ok(s);
    }
    fs::read_to_string(path).map_err(|e| input_error(path, e))
}

fn load_config(args: &Args) -> Result<StoreConfig, Error> {
    let mut cfg = match &args.config {
        Some(path) => StoreConfig::from_toml_file(path)?,
        None => StoreConfig::default(),
    };
    if let Some(n) = args.max_attempts {
        cfg.max_attempts = n;
    }
    if let Some(ms) = args.timeout_ms {
        cfg.timeout_ms = ms;
    }
    if let Some(v) = &args.variable {
        cfg.variable_name = v.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn build_entry(
    entry: Option<&Path>,
    bench_output: Option<&Path>,
    commit: Option<&Path>,
    tool: &str,
    date: Option<u64>,
) -> Result<Entry, Error> {
    if let Some(path) = entry {
        let mut entry: Entry =
            serde_json::from_str(&read_input(path)?).map_err(|e| input_error(path, e))?;
        if let Some(date) = date {
            entry.date = date;
        }
        return Ok(entry);
    }

    let (Some(bench_path), Some(commit_path)) = (bench_output, commit) else {
        return Err(Error::InvalidInput(
            "either --entry or both --bench-output and --commit are required".to_string(),
        ));
    };

    let benches = gobench::parse(&read_input(bench_path)?);
    if benches.is_empty() {
        return Err(input_error(bench_path, "no benchmark results found"));
    }
    let commit: CommitRecord =
        serde_json::from_str(&read_input(commit_path)?).map_err(|e| input_error(commit_path, e))?;

    Ok(Entry::new(commit, date.unwrap_or_else(now_millis), tool, benches))
}

fn run(args: &Args) -> Result<serde_json::Value, Error> {
    let cfg = load_config(args)?;

    match &args.cmd {
        Command::Ingest {
            data,
            suite,
            entry,
            bench_output,
            commit,
            tool,
            date,
            repo_url,
        } => {
            let entry = build_entry(
                entry.as_deref(),
                bench_output.as_deref(),
                commit.as_deref(),
                tool,
                *date,
            )?;
            let backend = FileBackend::new(data);
            let mut store = HistoryStore::new(backend, cfg)?;
            if let Some(url) = repo_url {
                store = store.with_repo_url(url.clone());
            }

            let ingested = match store.ingest(suite, entry) {
                Ok(ingested) => ingested,
                Err(Error::Storage {
                    source,
                    pending: Some(pending),
                }) => {
                    tracing::warn!(error = %source, "persist failed, retrying once");
                    store.retry_persist(*pending)?
                }
                Err(err) => return Err(err),
            };

            let doc = &ingested.document;
            Ok(json!({
                "data": data,
                "suite": suite,
                "version": ingested.version.to_string(),
                "attempts": ingested.attempts,
                "suite_entries": doc.suite(suite).map_or(0, <[Entry]>::len),
                "last_update": doc.last_update,
            }))
        }
        Command::Render {
            data,
            suite,
            series,
        } => {
            let doc = codec::read_file(data, &cfg.variable_name)?;
            let rendered: BTreeMap<String, Vec<render::Point>> = match suite {
                Some(name) => [(name.clone(), render::render(&doc, name))].into_iter().collect(),
                None => render::render_all(&doc),
            };

            if *series {
                let grouped: serde_json::Map<String, serde_json::Value> = rendered
                    .iter()
                    .map(|(name, points)| (name.clone(), json!(render::series(points))))
                    .collect();
                Ok(serde_json::Value::Object(grouped))
            } else {
                Ok(json!(rendered))
            }
        }
        Command::Show { data } => {
            let doc = codec::read_file(data, &cfg.variable_name)?;
            Ok(json!(scan::summarize_document(data, &doc)))
        }
        Command::Scan { root, file_name } => {
            let paths = scan::discover(root, file_name)?;
            tracing::info!(root = %root.display(), files = paths.len(), "scanning histories");
            Ok(json!(scan::summarize_all(&paths, &cfg.variable_name)))
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let report = match run(&args) {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(error = %err, "bench-history failed");
            return ExitCode::FAILURE;
        }
    };

    let json = match serde_json::to_string_pretty(&report) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(error = %err, "failed to encode report");
            return ExitCode::FAILURE;
        }
    };
    if let Some(out) = args.out {
        if let Err(err) = fs::write(&out, json) {
            tracing::error!(path = %out.display(), error = %err, "failed to write report");
            return ExitCode::FAILURE;
        }
    } else {
        println!("{json}");
    }

    ExitCode::SUCCESS
}
