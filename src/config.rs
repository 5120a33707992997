use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use regex::Regex;

use crate::error::CheckError;
use crate::executor::DEFAULT_INTERPRETER;
use crate::grader::{GradeTable, Thresholds};
use crate::normalizer::Strategy;

/// Student id is the leading alphanumeric run, an optional `_` or space
/// separates it from the name.
pub const DEFAULT_NAME_PATTERN: &str = r"^([A-Za-z0-9]+)[_ ]?([\w-]+)?";

#[derive(Parser, Debug)]
#[command(author, version, about = "Compare submissions against a reference solution", long_about = None)]
pub struct Cli {
    /// Terminal coloring
    #[arg(short = 'c', long, value_parser = ["on", "off"])]
    pub color: Option<String>,

    /// Quieter logging (use -q through -qqq)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// More verbose logging (use -v or -vv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Execution time limit (5 seconds)
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..), default_value = "5")]
    pub timeout: u64,

    /// How sources are normalized before comparison
    #[arg(short = 's', long, value_enum, default_value_t = Strategy::Tree)]
    pub strategy: Strategy,

    /// Only check files with this extension
    #[arg(short = 'x', long, default_value = ".py")]
    pub extension: String,

    /// Interpreter used to run submissions
    #[arg(long, default_value = DEFAULT_INTERPRETER)]
    pub interpreter: String,

    /// Grade thresholds in any order (A=0.95,B=0.80,C=0.50)
    #[arg(long)]
    pub thresholds: Option<Thresholds>,

    /// Grade given below every threshold
    #[arg(long, default_value = "D")]
    pub lowest_grade: String,

    /// Regex extracting (id, name) from a file stem
    #[arg(long, default_value = DEFAULT_NAME_PATTERN)]
    pub name_pattern: String,

    /// Ignore elements that are too common in long inputs when matching
    #[arg(long)]
    pub autojunk: bool,

    /// Don't run submissions, only compare them
    #[arg(long)]
    pub no_exec: bool,

    /// Where to write the spreadsheet (default: results_<dir>.xlsx)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Print every row and the summary as JSON at the end
    #[arg(long)]
    pub json: bool,

    /// Path to the reference solution
    pub reference: PathBuf,

    /// Directory containing the submissions
    pub submissions: PathBuf,
}

/// Everything the runner needs, validated once and never mutated.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub strategy: Strategy,
    pub grades: GradeTable,
    pub timeout: Duration,
    pub extension: String,
    pub interpreter: String,
    pub name_pattern: Regex,
    pub autojunk: bool,
    pub execute: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Tree,
            grades: GradeTable::default(),
            timeout: Duration::from_secs(5),
            extension: ".py".to_string(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            // the default pattern is a compile-time constant
            name_pattern: Regex::new(DEFAULT_NAME_PATTERN).expect("default name pattern is valid"),
            autojunk: false,
            execute: true,
        }
    }
}

impl CheckConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, CheckError> {
        let grades = match &cli.thresholds {
            Some(Thresholds(bands)) => GradeTable::new(bands.clone(), cli.lowest_grade.clone())?,
            None => GradeTable::new(GradeTable::default().bands().to_vec(), cli.lowest_grade.clone())?,
        };

        let name_pattern = Regex::new(&cli.name_pattern)
            .map_err(|e| CheckError::precondition(format!("invalid --name-pattern: {e}")))?;

        if cli.extension.is_empty() {
            return Err(CheckError::precondition("--extension must not be empty"));
        }

        Ok(Self {
            strategy: cli.strategy,
            grades,
            timeout: Duration::from_secs(cli.timeout),
            extension: cli.extension.clone(),
            interpreter: cli.interpreter.clone(),
            name_pattern,
            autojunk: cli.autojunk,
            execute: !cli.no_exec,
        })
    }
}

/// Default spreadsheet name, derived from the submission directory.
pub fn default_output_path(submissions: &Path) -> PathBuf {
    let dir_name = submissions
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .or_else(|| {
            submissions
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "submissions".to_string());
    PathBuf::from(format!("results_{dir_name}.xlsx"))
}
