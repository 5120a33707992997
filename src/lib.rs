use anyhow::bail;
use colored::Colorize;
use tracing::level_filters::LevelFilter;

use config::{default_output_path, CheckConfig, Cli};
use error::CheckError;
use executor::ExecutionChecker;
use report::{ConsoleSink, MemorySink, SpreadsheetSink, Tee};
use runner::Runner;

pub mod config;
pub mod error;
pub mod executor;
pub mod grader;
pub mod normalizer;
pub mod report;
pub mod runner;
pub mod runner_file_utils;
pub mod similarity;

/// Exit status for a failed run: 1 when the inputs were rejected before
/// any submission was checked, 2 for anything else.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CheckError>() {
        Some(e) if e.is_fatal() => 1,
        _ => 2,
    }
}

fn init_logging(cli: &Cli) {
    let level = match i16::from(cli.verbose) - i16::from(cli.quiet) {
        i16::MIN..=-3 => LevelFilter::OFF,
        -2 => LevelFilter::ERROR,
        -1 => LevelFilter::WARN,
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    match cli.color.as_deref() {
        Some("on") => colored::control::set_override(true),
        Some("off") => colored::control::set_override(false),
        _ => {}
    }
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    init_logging(&cli);

    if !cli.reference.is_file() {
        bail!(CheckError::precondition(format!(
            "reference file not found: {}",
            cli.reference.display()
        )));
    }
    if !cli.submissions.is_dir() {
        bail!(CheckError::precondition(format!(
            "submission directory not found: {}",
            cli.submissions.display()
        )));
    }

    let config = CheckConfig::from_cli(&cli)?;
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.submissions));
    let executor = ExecutionChecker::new(&config.interpreter, config.timeout);

    let mut rows = MemorySink::default();
    let mut sink = Tee(
        Tee(ConsoleSink::new(config.grades.clone()), SpreadsheetSink::new(&output)),
        &mut rows,
    );
    let summary =
        Runner::new(&config, &config.strategy, &executor).run(&cli.reference, &cli.submissions, &mut sink)?;

    println!();
    if let Some(path) = &summary.artifact {
        println!("Results saved to '{}'", path.display());
    }
    if let Some(e) = &summary.save_error {
        println!("{}", format!("Error: {e}").red());
    }
    println!("{summary}");

    if cli.json {
        let dump = serde_json::json!({ "rows": rows.rows, "summary": summary });
        println!("{}", serde_json::to_string(&dump)?);
    }

    Ok(())
}
