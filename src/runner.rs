use anyhow::Result;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::{
    config::CheckConfig,
    error::CheckError,
    executor::{Execute, ExecutionOutcome},
    grader::{Grade, GradeTable},
    normalizer::{Normalize, Normalized},
    report::{ReportSink, ResultRow},
    runner_file_utils::{collect_submissions, identify},
    similarity::score,
};

pub const SYNTAX_ERROR_STATUS: &str = "syntax error";
pub const ENCODING_ERROR_STATUS: &str = "character-encoding error";
pub const SKIPPED_STATUS: &str = "skipped";

#[derive(Debug, Serialize)]
pub struct GradeCount {
    pub label: String,
    pub count: usize,
}

/// Tally of a finished run.
#[derive(Debug, Serialize)]
pub struct Summary {
    pub total: usize,
    pub grades: Vec<GradeCount>,
    pub errors: usize,
    pub timeouts: usize,
    pub execution_failures: usize,
    pub artifact: Option<PathBuf>,
    pub save_error: Option<String>,
}

impl Summary {
    fn new(table: &GradeTable) -> Self {
        Self {
            total: 0,
            grades: table
                .labels()
                .map(|label| GradeCount {
                    label: label.to_string(),
                    count: 0,
                })
                .collect(),
            errors: 0,
            timeouts: 0,
            execution_failures: 0,
            artifact: None,
            save_error: None,
        }
    }

    fn record(&mut self, row: &ResultRow) {
        self.total += 1;
        match &row.grade {
            Grade::Error => self.errors += 1,
            Grade::Label(label) => {
                if let Some(slot) = self.grades.iter_mut().find(|g| g.label == *label) {
                    slot.count += 1;
                }
            }
        }
        match &row.execution {
            Some(ExecutionOutcome::Timeout { .. }) => self.timeouts += 1,
            Some(ExecutionOutcome::NonZeroExit { .. } | ExecutionOutcome::UnexpectedFailure { .. }) => {
                self.execution_failures += 1
            }
            _ => {}
        }
    }

    pub fn count(&self, label: &str) -> usize {
        self.grades
            .iter()
            .find(|g| g.label == label)
            .map_or(0, |g| g.count)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checked {} submissions:", self.total)?;
        for g in &self.grades {
            write!(f, " {}={}", g.label, g.count)?;
        }
        write!(
            f,
            " ERROR={} ({} timed out, {} failed at runtime)",
            self.errors, self.timeouts, self.execution_failures
        )
    }
}

/// What grading a single file produced before it becomes a row.
struct Checked {
    status: String,
    similarity: f64,
    grade: Grade,
    execution: Option<ExecutionOutcome>,
}

/// Grades every submission in a directory against one reference.
pub struct Runner<'a> {
    config: &'a CheckConfig,
    normalizer: &'a dyn Normalize,
    executor: &'a dyn Execute,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a CheckConfig, normalizer: &'a dyn Normalize, executor: &'a dyn Execute) -> Self {
        Self {
            config,
            normalizer,
            executor,
        }
    }

    /// Fails only when the reference or the submission directory is unusable.
    /// Every submission found produces exactly one row in `sink`.
    pub fn run(&self, reference: &Path, submission_dir: &Path, sink: &mut dyn ReportSink) -> Result<Summary> {
        let reference_norm = self.load_reference(reference)?;

        let files = collect_submissions(submission_dir, &self.config.extension)
            .map_err(|e| CheckError::precondition(format!("{e:#}")))?;
        tracing::info!(
            "checking {} submissions in {} against {}",
            files.len(),
            submission_dir.display(),
            reference.display()
        );

        let mut summary = Summary::new(&self.config.grades);
        for path in &files {
            let row = self.check_file(path, &reference_norm);
            summary.record(&row);
            sink.append(&row);
        }

        match sink.persist() {
            Ok(artifact) => summary.artifact = artifact,
            Err(e) => {
                tracing::error!("{e}");
                summary.save_error = Some(e.to_string());
            }
        }

        Ok(summary)
    }

    fn load_reference(&self, reference: &Path) -> Result<Normalized, CheckError> {
        let bytes = fs::read(reference).map_err(|e| {
            CheckError::precondition(format!("cannot read reference {}: {e}", reference.display()))
        })?;
        let text = String::from_utf8(bytes).map_err(|_| {
            CheckError::precondition(format!("reference {} is not valid UTF-8", reference.display()))
        })?;

        let normalized = self.normalizer.normalize(&text);
        if normalized.is_unparseable() {
            return Err(CheckError::precondition(format!(
                "reference {} has a syntax error",
                reference.display()
            )));
        }
        Ok(normalized)
    }

    fn check_file(&self, path: &Path, reference: &Normalized) -> ResultRow {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let identity = identify(path, &self.config.name_pattern);

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.grade_file(path, reference)))
            .unwrap_or_else(|payload| Err(CheckError::Unexpected(panic_message(payload))));

        let checked = result.unwrap_or_else(|e| {
            let status = match &e {
                CheckError::Parse(_) => {
                    tracing::debug!("{e}");
                    SYNTAX_ERROR_STATUS.to_string()
                }
                CheckError::Encoding(_) => {
                    tracing::warn!("{e}");
                    ENCODING_ERROR_STATUS.to_string()
                }
                _ => {
                    tracing::warn!("{file}: {e}");
                    format!("unexpected error: {e}")
                }
            };
            Checked {
                status,
                similarity: 0.0,
                grade: Grade::Error,
                execution: None,
            }
        });

        ResultRow {
            file,
            id: identity.id,
            name: identity.name,
            status: checked.status,
            similarity: checked.similarity,
            grade: checked.grade,
            execution: checked.execution,
        }
    }

    fn grade_file(&self, path: &Path, reference: &Normalized) -> Result<Checked, CheckError> {
        let bytes = fs::read(path).map_err(|e| CheckError::Unexpected(e.to_string()))?;
        let text = String::from_utf8(bytes).map_err(|_| CheckError::Encoding(path.to_path_buf()))?;

        let normalized = self.normalizer.normalize(&text);
        if normalized.is_unparseable() {
            return Err(CheckError::Parse(path.to_path_buf()));
        }

        // Running and scoring are independent checks on the same file.
        let execution = self.config.execute.then(|| self.executor.execute(path));
        let similarity = score(reference, &normalized, self.config.autojunk);
        let grade = self.config.grades.grade(similarity);
        tracing::debug!("{}: similarity {similarity}, grade {grade}", path.display());

        Ok(Checked {
            status: execution
                .as_ref()
                .map_or_else(|| SKIPPED_STATUS.to_string(), |o| o.to_string()),
            similarity,
            grade,
            execution,
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic while checking submission".to_string()
    }
}
