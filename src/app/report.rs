use serde_derive::Serialize;
use std::fmt;
use std::sync::Mutex;

macro_rules! lock {
    ($name: expr) => {
        match $name.lock() {
            Ok(locked) => locked,
            Err(poisoned) => poisoned.into_inner(),
        }
    };
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl Status {
    fn weight(self) -> u8 {
        match self {
            Status::Skipped => 0,
            Status::Passed => 1,
            Status::Failed => 2,
            Status::Error => 3,
        }
    }

    /// Worst status of the lot; nothing at all counts as passed.
    pub fn aggregate<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
        statuses
            .into_iter()
            .max_by_key(|status| status.weight())
            .unwrap_or(Status::Passed)
    }

    pub fn is_bad(self) -> bool {
        matches!(self, Status::Failed | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Status::Passed => "PASSED",
            Status::Failed => "FAILED",
            Status::Error => "ERROR",
            Status::Skipped => "SKIPPED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct StepRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub status: Status,
    /// Milliseconds since the epoch.
    pub started: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
    /// Every non-assertion error raised by the step, in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub teardown_errors: Vec<String>,
}

impl StepRecord {
    pub fn new<S: Into<String>>(name: S, status: Status) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            status,
            started: now!() as u64,
            duration_ms: 0,
            failures: vec![],
            errors: vec![],
            teardown_errors: vec![],
        }
    }

    pub fn skipped<S: Into<String>>(name: S) -> Self {
        Self::new(name, Status::Skipped)
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct CaseRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub status: Status,
    pub started: u64,
    pub duration_ms: u64,
    /// Assertions raised by case hooks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hook_errors: Vec<String>,
    pub steps: Vec<StepRecord>,
}

impl CaseRecord {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            status: Status::Passed,
            started: now!() as u64,
            duration_ms: 0,
            failures: vec![],
            error: None,
            hook_errors: vec![],
            steps: vec![],
        }
    }

    /// A case that never ran, e.g. because the suite setup failed.
    pub fn skipped<S: Into<String>>(name: S) -> Self {
        Self {
            status: Status::Skipped,
            ..Self::new(name)
        }
    }

    pub fn push(&mut self, step: StepRecord) {
        self.steps.push(step);
    }

    /// Settles the status from the steps and the case's own errors.
    pub fn close(&mut self) {
        let own = if self.error.is_some() || !self.hook_errors.is_empty() {
            Some(Status::Error)
        } else if !self.failures.is_empty() {
            Some(Status::Failed)
        } else {
            None
        };
        let steps = self.steps.iter().map(|step| step.status);
        self.status = if self.steps.is_empty() {
            own.unwrap_or(Status::Passed)
        } else {
            Status::aggregate(steps.chain(own))
        };
        self.duration_ms = (now!() as u64).saturating_sub(self.started);
    }
}

#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub error: usize,
    pub skipped: usize,
}

impl Summary {
    fn count<I: IntoIterator<Item = Status>>(statuses: I) -> Self {
        statuses.into_iter().fold(Summary::default(), |mut summary, status| {
            summary.total += 1;
            match status {
                Status::Passed => summary.passed += 1,
                Status::Failed => summary.failed += 1,
                Status::Error => summary.error += 1,
                Status::Skipped => summary.skipped += 1,
            }
            summary
        })
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct SuiteReport {
    pub id: uuid::Uuid,
    pub name: String,
    pub status: Status,
    pub started: u64,
    pub duration_ms: u64,
    /// Suite setup failure; every case is skipped then.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub teardown_errors: Vec<String>,
    pub cases: Vec<CaseRecord>,
}

impl SuiteReport {
    pub fn cases(&self) -> Summary {
        Summary::count(self.cases.iter().map(|case| case.status))
    }

    pub fn steps(&self) -> Summary {
        Summary::count(
            self.cases
                .iter()
                .flat_map(|case| case.steps.iter().map(|step| step.status)),
        )
    }

    pub fn succeeded(&self) -> bool {
        !self.status.is_bad()
    }

    pub fn document(&self) -> Document<'_> {
        Document {
            report: self,
            cases_summary: self.cases(),
            steps_summary: self.steps(),
        }
    }
}

/// Serialized form of a report, counts included.
#[derive(Debug, Serialize)]
pub struct Document<'r> {
    #[serde(flatten)]
    report: &'r SuiteReport,
    cases_summary: Summary,
    steps_summary: Summary,
}

/// Collects case records from concurrent workers in suite order.
#[derive(Debug)]
pub struct Aggregator {
    name: String,
    started: u64,
    slots: Mutex<Vec<Option<CaseRecord>>>,
    error: Option<String>,
    teardown_errors: Vec<String>,
}

impl Aggregator {
    pub fn new<S: Into<String>>(name: S, cases: usize) -> Self {
        Self {
            name: name.into(),
            started: now!() as u64,
            slots: Mutex::new(vec![None; cases]),
            error: None,
            teardown_errors: vec![],
        }
    }

    pub fn record(&self, index: usize, case: CaseRecord) {
        let mut slots = lock!(self.slots);
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(case),
            Some(_) => warn!("Case #{} already recorded, ignoring '{}'", index, case.name),
            None => warn!("Case #{} out of range, ignoring '{}'", index, case.name),
        }
    }

    pub fn fail_setup(&mut self, error: String) {
        self.error = Some(error);
    }

    pub fn teardown_error(&mut self, error: String) {
        self.teardown_errors.push(error);
    }

    pub fn finish(self) -> SuiteReport {
        let slots = match self.slots.into_inner() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cases: Vec<CaseRecord> = slots.into_iter().flatten().collect();
        let own = if self.error.is_some() || !self.teardown_errors.is_empty() {
            Some(Status::Error)
        } else {
            None
        };
        let status = Status::aggregate(cases.iter().map(|case| case.status).chain(own));
        SuiteReport {
            id: uuid::Uuid::new_v4(),
            name: self.name,
            status,
            started: self.started,
            duration_ms: (now!() as u64).saturating_sub(self.started),
            error: self.error,
            teardown_errors: self.teardown_errors,
            cases,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn step(name: &str, status: Status) -> StepRecord {
        StepRecord::new(name, status)
    }

    #[test]
    fn test_status_aggregation() {
        assert_eq!(Status::aggregate(vec![]), Status::Passed);
        assert_eq!(
            Status::aggregate(vec![Status::Passed, Status::Skipped]),
            Status::Passed
        );
        assert_eq!(
            Status::aggregate(vec![Status::Failed, Status::Error, Status::Passed]),
            Status::Error
        );
        assert_eq!(
            Status::aggregate(vec![Status::Skipped, Status::Skipped]),
            Status::Skipped
        );
    }

    #[test]
    fn test_case_close() {
        let mut case = CaseRecord::new("c");
        case.push(step("a", Status::Passed));
        case.push(step("b", Status::Failed));
        case.push(StepRecord::skipped("c"));
        case.close();
        assert_eq!(case.status, Status::Failed);

        let mut case = CaseRecord::new("assertive hook");
        case.failures.push("precondition".to_owned());
        case.close();
        assert_eq!(case.status, Status::Failed);

        let mut case = CaseRecord::new("hooks");
        case.hook_errors.push("teardown broke".to_owned());
        case.push(step("a", Status::Passed));
        case.close();
        assert_eq!(case.status, Status::Error);
    }

    #[test]
    fn test_aggregator_keeps_suite_order() {
        let aggregator = Aggregator::new("suite", 3);
        for (index, status) in [(2, Status::Passed), (0, Status::Failed), (1, Status::Passed)].iter() {
            let mut case = CaseRecord::new(format!("case {}", index));
            case.push(step("s", *status));
            case.close();
            aggregator.record(*index, case);
        }
        let report = aggregator.finish();
        let names: Vec<&str> = report.cases.iter().map(|case| case.name.as_str()).collect();
        assert_eq!(names, vec!["case 0", "case 1", "case 2"]);
        assert_eq!(report.status, Status::Failed);
        assert!(!report.succeeded());
        assert_eq!(
            report.cases(),
            Summary {
                total: 3,
                passed: 2,
                failed: 1,
                error: 0,
                skipped: 0
            }
        );
    }

    #[test]
    fn test_document_serialization() {
        let mut aggregator = Aggregator::new("suite", 1);
        aggregator.record(0, CaseRecord::skipped("never ran"));
        aggregator.fail_setup("Function 'suite_setup' failed".to_owned());
        let report = aggregator.finish();
        assert_eq!(report.status, Status::Error);

        let document = serde_json::to_value(report.document()).unwrap();
        assert_eq!(document["name"], json!("suite"));
        assert_eq!(document["status"], json!("error"));
        assert_eq!(document["cases"][0]["status"], json!("skipped"));
        assert_eq!(document["cases_summary"]["skipped"], json!(1));
        assert!(document.get("teardown_errors").is_none());
    }
}
