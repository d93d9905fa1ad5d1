use typoscan_core::aggregator::{SearchOutcome, StopSignal};
use typoscan_core::config::TyposcanConfig;
use typoscan_core::coordinator::{SearchCoordinator, SearchProgress, SearchReport};
use typoscan_core::executor::CommandOracle;
use typoscan_core::input::{load_base_candidates, load_base_secret, load_targets};
use typoscan_core::sink::AttemptSink;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

const DEFAULT_CONFIG_FILE: &str = "typoscan.toml";

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Recover a mistyped passphrase by searching its typo variants",
    long_about = None
)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    #[clap(long, value_parser)]
    seed_file: Option<PathBuf>,
    #[clap(long, value_parser)]
    pass_file: Option<PathBuf>,
    #[clap(long, value_parser)]
    address_file: Option<PathBuf>,
    #[clap(short, long)]
    workers: Option<usize>,
    /// Maximum number of typos per variant.
    #[clap(short, long)]
    typos: Option<usize>,
    #[clap(long)]
    typos_capslock: bool,
    #[clap(long)]
    typos_swap: bool,
    #[clap(long)]
    typos_repeat: bool,
    #[clap(long)]
    typos_delete: bool,
    #[clap(long)]
    typos_case: bool,
    /// Substitution map, one `chars alternatives` rule per line.
    #[clap(long, value_parser)]
    typos_map: Option<PathBuf>,
    #[clap(long)]
    log_attempts: bool,
    #[clap(long, value_parser)]
    attempt_log: Option<PathBuf>,
    /// Do not try the empty passphrase.
    #[clap(long)]
    skip_no_passphrase: bool,
    /// Program that derives identifiers from a variant.
    #[clap(long)]
    oracle_command: Option<String>,
    #[clap(long = "oracle-arg", allow_hyphen_values = true)]
    oracle_args: Vec<String>,
    #[clap(long)]
    oracle_timeout_ms: Option<u64>,
    #[clap(long, value_parser)]
    report_json: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<TyposcanConfig, anyhow::Error> {
    match &cli.config_file {
        Some(config_path) => {
            info!("Loading configuration from {config_path:?}");
            TyposcanConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                info!("Loading default configuration from {default_config_path:?}");
                TyposcanConfig::load_from_file(default_config_path)
            } else {
                debug!("No {DEFAULT_CONFIG_FILE} found, using built-in defaults");
                Ok(TyposcanConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut TyposcanConfig, cli: Cli) {
    let search = &mut config.search;
    if let Some(typos) = cli.typos {
        search.typos = typos;
    }
    search.typos_capslock |= cli.typos_capslock;
    search.typos_swap |= cli.typos_swap;
    search.typos_repeat |= cli.typos_repeat;
    search.typos_delete |= cli.typos_delete;
    search.typos_case |= cli.typos_case;
    if cli.typos_map.is_some() {
        search.typos_map = cli.typos_map;
    }
    if let Some(workers) = cli.workers {
        search.workers = workers;
    }
    search.log_attempts |= cli.log_attempts;
    if let Some(attempt_log) = cli.attempt_log {
        search.attempt_log = attempt_log;
    }
    search.skip_no_passphrase |= cli.skip_no_passphrase;

    let inputs = &mut config.inputs;
    if let Some(seed_file) = cli.seed_file {
        inputs.seed_file = seed_file;
    }
    if let Some(pass_file) = cli.pass_file {
        inputs.pass_file = pass_file;
    }
    if let Some(address_file) = cli.address_file {
        inputs.address_file = address_file;
    }

    let oracle = &mut config.oracle;
    if let Some(command) = cli.oracle_command {
        oracle.command = std::iter::once(command).chain(cli.oracle_args).collect();
    } else if !cli.oracle_args.is_empty() {
        oracle.command.extend(cli.oracle_args);
    }
    if let Some(timeout_ms) = cli.oracle_timeout_ms {
        oracle.timeout_ms = timeout_ms;
    }
}

/// First three words of the secret, so the console never shows all of it.
fn abbreviate_secret(secret: &str) -> String {
    let mut words = secret.split_whitespace();
    let shown: Vec<&str> = words.by_ref().take(3).collect();
    if words.next().is_some() {
        format!("{} ...", shown.join(" "))
    } else {
        shown.join(" ")
    }
}

fn progress_bar(total: usize) -> Result<ProgressBar, anyhow::Error> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} bases {msg}",
            )?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn print_report(report: &SearchReport, secret: &str) {
    match &report.outcome {
        SearchOutcome::Found(result) => {
            println!("\n!!! MATCH FOUND !!!");
            println!("  Secret:     {}", abbreviate_secret(secret));
            println!("  Passphrase: '{}'", result.variant);
            println!("  Base:       '{}'", result.base);
            println!("  Context:    {}", result.context);
            println!("  Identifier: {}", result.identifier);
        }
        SearchOutcome::Exhausted => println!("\nNo variant matched any target."),
        SearchOutcome::Interrupted => println!("\nSearch interrupted."),
    }
    let stats = &report.stats;
    println!(
        "Bases: {}/{} ({} cancelled), Variants tested: {}, Oracle failures: {}, Elapsed: {:.2?}",
        stats.bases_completed,
        stats.bases_total,
        stats.bases_cancelled,
        stats.variants_tested,
        stats.oracle_failures,
        stats.elapsed
    );
}

fn write_report(path: &Path, report: &SearchReport) -> Result<(), anyhow::Error> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .map_err(|e| anyhow::anyhow!("Failed to write report to {:?}: {}", path, e))
}

fn run(cli: Cli) -> Result<SearchOutcome, anyhow::Error> {
    let report_json = cli.report_json.clone();
    let mut config = load_config(&cli)?;
    apply_overrides(&mut config, cli);
    config.validate()?;
    debug!("Effective configuration: {config:#?}");

    let secret = load_base_secret(&config.inputs.seed_file)?;
    let targets = load_targets(&config.inputs.address_file)?;
    let bases = load_base_candidates(&config.inputs.pass_file, config.search.skip_no_passphrase)?;
    let engine = config.search.mutation_engine()?;
    info!(
        "Loaded {} target(s) and {} base candidate(s); typo budget {}",
        targets.len(),
        bases.len(),
        engine.budget()
    );

    let oracle = CommandOracle::new(config.oracle.command_config()?, secret.clone())?;

    let interrupt = StopSignal::new();
    let handler_signal = interrupt.clone();
    ctrlc::set_handler(move || handler_signal.trigger())?;

    let sink = if config.search.log_attempts {
        info!("Logging attempts to {:?}", config.search.attempt_log);
        Some(AttemptSink::open(
            &config.search.attempt_log,
            config.search.attempt_buffer,
        )?)
    } else {
        None
    };

    let mut coordinator = SearchCoordinator::new(engine, Arc::new(oracle), targets)
        .with_concurrency(config.search.workers)
        .with_interrupt(interrupt);
    if let Some(sink) = &sink {
        coordinator = coordinator.with_attempt_recorder(sink.recorder());
    }

    let pb = progress_bar(bases.len())?;
    let report = coordinator.search_with_progress(&bases, |progress: &SearchProgress| {
        pb.set_position(progress.bases_done as u64);
        pb.set_message(format!("{} variants", progress.variants_tested));
    })?;
    pb.finish_and_clear();
    drop(coordinator);

    if let Some(sink) = sink {
        match sink.finish() {
            Ok(summary) => debug!(
                "Attempt log: {} written, {} dropped",
                summary.written, summary.dropped
            ),
            Err(e) => warn!("Attempt log was not closed cleanly: {e}"),
        }
    }

    print_report(&report, &secret);

    // Report failures do not change the exit status.
    if let Some(path) = report_json {
        match write_report(&path, &report) {
            Ok(()) => info!("Report written to {path:?}"),
            Err(e) => warn!("{e:#}"),
        }
    }

    Ok(report.outcome)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(SearchOutcome::Found(_)) => ExitCode::SUCCESS,
        Ok(SearchOutcome::Exhausted) => ExitCode::from(1),
        Ok(SearchOutcome::Interrupted) => ExitCode::from(130),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_abbreviated_to_three_words() {
        assert_eq!(
            abbreviate_secret("abandon ability able about above absent"),
            "abandon ability able ..."
        );
        assert_eq!(abbreviate_secret("one two"), "one two");
    }

    #[test]
    fn write_report_writes_json_and_reports_bad_paths() {
        let report = SearchReport {
            outcome: SearchOutcome::Exhausted,
            stats: Default::default(),
        };
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("report.json");
        write_report(&path, &report).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["outcome"], "exhausted");

        let unwritable = dir.path().join("missing-dir").join("report.json");
        assert!(write_report(&unwritable, &report).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let mut config = TyposcanConfig::from_toml_str(
            "[search]\ntypos = 1\nworkers = 2\n[oracle]\ncommand = [\"derive\", \"--btc\"]\n",
            Path::new("typoscan.toml"),
        )
        .unwrap();
        let cli = Cli::parse_from([
            "typoscan",
            "--typos",
            "3",
            "--typos-swap",
            "--oracle-command",
            "other",
            "--oracle-arg",
            "--eth",
        ]);
        apply_overrides(&mut config, cli);

        assert_eq!(config.search.typos, 3);
        assert_eq!(config.search.workers, 2);
        assert!(config.search.typos_swap);
        assert!(!config.search.typos_case);
        assert_eq!(config.oracle.command, vec!["other", "--eth"]);
    }
}
