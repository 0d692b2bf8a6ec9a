use serde::{Deserialize, Serialize};

use crate::orchestrator::{AnalysisOutcome, Orchestrator};

/// One row from the external spreadsheet collaborator. Iteration,
/// checkpointing, and column mapping stay on their side of the contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompanyRow {
    pub company_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl Orchestrator {
    /// Row-oriented analysis entry point. Takes `&self` only, so the batch
    /// driver may invoke it from any number of concurrent callers; the rate
    /// limiter is the only cross-row coupling.
    pub async fn analyze_row(&self, row: &CompanyRow) -> AnalysisOutcome {
        self.analyze(&row.company_name, row.website.as_deref()).await
    }
}

/// Exit code for a batch run: 0 on success, 1 when the failed-row share
/// exceeds the configured threshold.
pub fn batch_exit_code(outcomes: &[AnalysisOutcome], failure_threshold_pct: f64) -> i32 {
    if outcomes.is_empty() {
        return 0;
    }

    let failures = outcomes.iter().filter(|o| o.is_failure()).count();
    let pct = failures as f64 / outcomes.len() as f64 * 100.0;

    if pct > failure_threshold_pct {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use theodore_common::types::CompanyRecord;
    use theodore_common::ErrorKind;

    fn success() -> AnalysisOutcome {
        AnalysisOutcome::Success(CompanyRecord::new("Acme"))
    }

    fn failure() -> AnalysisOutcome {
        AnalysisOutcome::Failure {
            kind: ErrorKind::NoContent,
            message: "nothing crawled".into(),
        }
    }

    #[test]
    fn test_exit_code_thresholds() {
        assert_eq!(batch_exit_code(&[], 50.0), 0);
        assert_eq!(batch_exit_code(&[success(), success()], 50.0), 0);
        assert_eq!(batch_exit_code(&[success(), failure()], 50.0), 0);
        assert_eq!(batch_exit_code(&[failure(), failure(), success()], 50.0), 1);
        assert_eq!(batch_exit_code(&[failure()], 0.0), 1);
    }
}
