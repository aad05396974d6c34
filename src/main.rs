use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use rust_flat_db::{
    config::{EngineConfig, OutputFormat, PredicatePolicy},
    engine::Engine,
    shell,
    sql::Session,
};
use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Entry point for the rust_flat_db shell.
///
/// 1. Parses command-line arguments and merges them over the config file
/// 2. Initializes structured logging on stderr
/// 3. Opens the engine on the data directory
/// 4. Runs the statement loop over a script file or stdin
///
/// # Example Usage
/// ```bash
/// cargo run -- --data ./dbdata < PA3_test.sql
/// RUST_LOG=debug cargo run -- --data ./dbdata --strict --script setup.sql
/// ```
fn main() -> Result<()> {
    let matches = Command::new("rust_flat_db")
        .about("Teaching-scale relational database over flat text table files")
        .arg(Arg::new("data")
            .long("data")
            .value_name("DIR")
            .help("Data directory holding one sub-directory per database"))
        .arg(Arg::new("config")
            .long("config")
            .value_name("FILE")
            .help("JSON config file; command-line flags override it"))
        .arg(Arg::new("strict")
            .long("strict")
            .action(ArgAction::SetTrue)
            .help("Report unknown WHERE columns and bad literals instead of matching nothing"))
        .arg(Arg::new("format")
            .long("format")
            .value_name("FORMAT")
            .value_parser(["table", "json"])
            .help("Rendering of query results"))
        .arg(Arg::new("script")
            .long("script")
            .value_name("FILE")
            .help("Read statements from FILE instead of stdin"))
        .get_matches();

    // Logs go to stderr so stdout carries only statement responses
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => EngineConfig::load(Path::new(path))
            .with_context(|| format!("loading config {path}"))?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = matches.get_one::<String>("data") {
        config.data_dir = PathBuf::from(dir);
    }
    if matches.get_flag("strict") {
        config.predicate_policy = PredicatePolicy::Strict;
    }
    match matches.get_one::<String>("format").map(String::as_str) {
        Some("json") => config.output_format = OutputFormat::Json,
        Some("table") => config.output_format = OutputFormat::Table,
        _ => {}
    }

    let engine = Arc::new(Engine::open(config)?);
    let mut session = Session::new(engine);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match matches.get_one::<String>("script") {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening script {path}"))?;
            info!(script = %path, "running script");
            shell::run(&mut session, BufReader::new(file), &mut out)
        }
        None => shell::run(&mut session, io::stdin().lock(), &mut out),
    }
}
