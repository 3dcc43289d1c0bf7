//! Output of a finished run.

use crate::app::error::Result;
use crate::app::report::{Status, SuiteReport};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

/// Writes the report document as pretty JSON, creating parent directories.
pub fn write_json(report: &SuiteReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, &report.document())?;
    info!("Report written to {}", path.display());
    Ok(())
}

/// Logs every case and step that did not pass.
pub fn log_problems(report: &SuiteReport) {
    if let Some(err) = &report.error {
        error!("Suite setup: {}", err);
    }
    for err in &report.teardown_errors {
        error!("Suite teardown: {}", err);
    }
    for case in report.cases.iter().filter(|case| case.status.is_bad()) {
        warn!("Case '{}' {}", case.name, case.status);
        for message in case.failures.iter().chain(&case.hook_errors).chain(&case.error) {
            warn!("  {}", message);
        }
        for step in case.steps.iter().filter(|step| step.status != Status::Passed) {
            if step.status == Status::Skipped {
                debug!("  Step '{}' SKIPPED", step.name);
                continue;
            }
            warn!("  Step '{}' {}", step.name, step.status);
            for message in step
                .failures
                .iter()
                .chain(&step.errors)
                .chain(&step.teardown_errors)
            {
                warn!("    {}", message);
            }
        }
    }
    let steps = report.steps();
    info!(
        "Steps: {} total, {} passed, {} failed, {} error, {} skipped",
        steps.total, steps.passed, steps.failed, steps.error, steps.skipped
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app::report::{Aggregator, CaseRecord, StepRecord};
    use serde_json::Value;

    fn report() -> SuiteReport {
        let aggregator = Aggregator::new("orders", 2);
        let mut case = CaseRecord::new("create");
        case.push(StepRecord {
            failures: vec!["201 equal 500 does not hold".to_owned()],
            ..StepRecord::new("post", Status::Failed)
        });
        case.close();
        aggregator.record(0, case);
        aggregator.record(1, CaseRecord::skipped("list"));
        aggregator.finish()
    }

    #[test]
    fn test_write_json_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/report.json");
        let report = report();
        write_json(&report, &path).unwrap();
        log_problems(&report);

        let written: Value = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(written["name"], "orders");
        assert_eq!(written["status"], "failed");
        assert_eq!(written["cases"][0]["steps"][0]["failures"][0], "201 equal 500 does not hold");
        assert_eq!(written["cases_summary"]["total"], 2);
        assert_eq!(written["steps_summary"]["failed"], 1);
    }
}
