use std::path::PathBuf;

use colored::Colorize;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde::Serialize;

use crate::error::CheckError;
use crate::executor::ExecutionOutcome;
use crate::grader::{Grade, GradeTable};

pub const SHEET_NAME: &str = "Results";
pub const HEADER: [&str; 5] = ["ID", "Name", "Execution", "Similarity", "Grade"];

/// One line of the report, produced once per submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub file: String,
    pub id: String,
    pub name: String,
    pub status: String,
    pub similarity: f64,
    pub grade: Grade,
    /// `None` when the submission was never run.
    pub execution: Option<ExecutionOutcome>,
}

/// Destination for result rows. Rows arrive in final order; `persist` is
/// called once after the last row.
pub trait ReportSink {
    fn append(&mut self, row: &ResultRow);

    /// Returns the artifact written, if this sink writes one.
    fn persist(&mut self) -> Result<Option<PathBuf>, CheckError>;
}

impl<S: ReportSink + ?Sized> ReportSink for &mut S {
    fn append(&mut self, row: &ResultRow) {
        (**self).append(row)
    }

    fn persist(&mut self) -> Result<Option<PathBuf>, CheckError> {
        (**self).persist()
    }
}

/// Feeds every row to two sinks.
pub struct Tee<A, B>(pub A, pub B);

impl<A: ReportSink, B: ReportSink> ReportSink for Tee<A, B> {
    fn append(&mut self, row: &ResultRow) {
        self.0.append(row);
        self.1.append(row);
    }

    fn persist(&mut self) -> Result<Option<PathBuf>, CheckError> {
        let first = self.0.persist();
        let second = self.1.persist();
        Ok(first?.or(second?))
    }
}

/// Prints each row as soon as it arrives.
pub struct ConsoleSink {
    grades: GradeTable,
}

impl ConsoleSink {
    pub fn new(grades: GradeTable) -> Self {
        Self { grades }
    }

    pub fn render(&self, row: &ResultRow) -> String {
        let grade = row.grade.as_str();
        let grade = if matches!(row.grade, Grade::Error) || self.grades.is_lowest(&row.grade) {
            grade.red()
        } else if self.grades.is_top(&row.grade) {
            grade.green()
        } else {
            grade.yellow()
        };

        format!(
            "{:<10} | {:<25} | exec: {:<15} | similarity: {:>7.2}% | grade: {}",
            row.id,
            row.file,
            row.status,
            row.similarity * 100.0,
            grade
        )
    }
}

impl ReportSink for ConsoleSink {
    fn append(&mut self, row: &ResultRow) {
        println!("{}", self.render(row));
    }

    fn persist(&mut self) -> Result<Option<PathBuf>, CheckError> {
        Ok(None)
    }
}

/// Collects rows and writes them to an `.xlsx` workbook on `persist`.
pub struct SpreadsheetSink {
    path: PathBuf,
    rows: Vec<ResultRow>,
}

impl SpreadsheetSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: Vec::new(),
        }
    }

    fn write_workbook(&self) -> Result<(), XlsxError> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let percent = Format::new().set_num_format("0.00%");

        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME)?;
        for (col, title) in HEADER.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *title, &bold)?;
        }
        sheet.set_column_width(1, 20)?;
        sheet.set_column_width(2, 40)?;

        for (i, row) in self.rows.iter().enumerate() {
            let r = i as u32 + 1;
            sheet.write_string(r, 0, &row.id)?;
            sheet.write_string(r, 1, &row.name)?;
            sheet.write_string(r, 2, &row.status)?;
            sheet.write_number_with_format(r, 3, row.similarity, &percent)?;
            sheet.write_string(r, 4, row.grade.as_str())?;
        }

        workbook.save(&self.path)
    }
}

impl ReportSink for SpreadsheetSink {
    fn append(&mut self, row: &ResultRow) {
        self.rows.push(row.clone());
    }

    fn persist(&mut self) -> Result<Option<PathBuf>, CheckError> {
        self.write_workbook()
            .map_err(|e| CheckError::Persistence {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Some(self.path.clone()))
    }
}

/// Keeps rows in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<ResultRow>,
    pub persisted: bool,
}

impl ReportSink for MemorySink {
    fn append(&mut self, row: &ResultRow) {
        self.rows.push(row.clone());
    }

    fn persist(&mut self) -> Result<Option<PathBuf>, CheckError> {
        self.persisted = true;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    fn row(file: &str, similarity: f64, grade: Grade) -> ResultRow {
        ResultRow {
            file: file.to_string(),
            id: "12345".to_string(),
            name: "Tanaka".to_string(),
            status: "success".to_string(),
            similarity,
            grade,
            execution: Some(ExecutionOutcome::Success),
        }
    }

    #[test]
    fn console_line_leads_with_the_id() {
        colored::control::set_override(false);
        let sink = ConsoleSink::new(GradeTable::default());
        let line = sink.render(&row("12345_Tanaka.py", 0.9876, Grade::Label("A".into())));
        assert!(line.starts_with("12345      | 12345_Tanaka.py"));
        assert!(line.contains("exec: success"));
        assert!(line.contains("similarity:   98.76%"));
        assert!(line.ends_with("grade: A"));
    }

    #[test]
    fn spreadsheet_is_written_on_persist() {
        let dir = TempDir::new("report").unwrap();
        let path = dir.path().join("results_week1.xlsx");
        let mut sink = SpreadsheetSink::new(&path);
        sink.append(&row("a.py", 1.0, Grade::Label("A".into())));
        sink.append(&row("b.py", 0.0, Grade::Error));
        assert!(!path.exists());

        let written = sink.persist().unwrap();
        assert_eq!(written.as_deref(), Some(path.as_path()));
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn unwritable_location_is_a_persistence_error() {
        let mut sink = SpreadsheetSink::new("/no/such/dir/results.xlsx");
        sink.append(&row("a.py", 1.0, Grade::Label("A".into())));
        let err = sink.persist().unwrap_err();
        assert!(matches!(err, CheckError::Persistence { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn tee_feeds_both_sides_and_reports_the_artifact() {
        let dir = TempDir::new("report").unwrap();
        let path = dir.path().join("out.xlsx");
        let mut memory = MemorySink::default();
        {
            let mut tee = Tee(&mut memory, SpreadsheetSink::new(&path));
            tee.append(&row("a.py", 0.5, Grade::Label("C".into())));
            assert_eq!(tee.persist().unwrap(), Some(path.clone()));
        }
        assert_eq!(memory.rows.len(), 1);
        assert!(memory.persisted);
    }

    #[test]
    fn rows_serialize_with_plain_grades() {
        let json = serde_json::to_value(row("a.py", 0.8, Grade::Error)).unwrap();
        assert_eq!(json["grade"], "ERROR");
        assert_eq!(json["execution"]["kind"], "success");
    }
}
