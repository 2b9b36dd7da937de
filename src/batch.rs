//! Sequential processing of the names given on the command line.

use std::fmt;
use std::future::Future;

use anyhow::Result;
use tracing::{error, info, warn};

/// Outcome of one name in a batch.
#[derive(Debug)]
pub struct BatchEntry {
    pub name: String,
    pub result: Result<String, String>,
}

/// Per-name results of a batch run, in processing order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
    /// Names not attempted after a fail-fast abort.
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_err()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped.is_empty()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            match &entry.result {
                Ok(outcome) => writeln!(f, "{:<40} {}", entry.name, outcome)?,
                Err(e) => writeln!(f, "{:<40} FAILED: {}", entry.name, e)?,
            }
        }
        for name in &self.skipped {
            writeln!(f, "{name:<40} SKIPPED")?;
        }
        write!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.entries.len() - self.failed(),
            self.failed(),
            self.skipped.len()
        )
    }
}

/// Run `op` for every name in order.
///
/// A failed name does not stop the batch unless `fail_fast` is set, in which
/// case the remaining names are reported as skipped.
pub async fn run<F, Fut>(names: &[String], fail_fast: bool, mut op: F) -> BatchReport
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut report = BatchReport::default();
    let mut pending = names.iter();

    for name in pending.by_ref() {
        info!("Processing {}", name);
        let result = op(name.clone()).await.map_err(|e| format!("{e:#}"));
        let failed = result.is_err();
        if let Err(e) = &result {
            error!("Failed to process {}: {}", name, e);
        }
        report.entries.push(BatchEntry {
            name: name.clone(),
            result,
        });
        if failed && fail_fast {
            break;
        }
    }

    report.skipped = pending.cloned().collect();
    if !report.skipped.is_empty() {
        warn!("Skipping {} remaining names after failure", report.skipped.len());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    async fn op(name: String) -> Result<String> {
        if name.starts_with("bad") {
            anyhow::bail!("{name} is broken")
        }
        Ok("migrated".to_string())
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_batch() {
        let report = run(&names(&["pool-a", "bad-b", "pool-c"]), false, op).await;

        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.failed(), 1);
        assert!(report.skipped.is_empty());
        assert!(!report.is_success());
        assert_eq!(report.entries[2].result.as_deref(), Ok("migrated"));
    }

    #[tokio::test]
    async fn test_fail_fast_skips_rest() {
        let report = run(&names(&["pool-a", "bad-b", "pool-c"]), true, op).await;

        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.skipped, ["pool-c"]);
        assert!(!report.is_success());

        let text = report.to_string();
        assert!(text.contains("FAILED: bad-b is broken"));
        assert!(text.contains("pool-c"));
        assert!(text.ends_with("1 succeeded, 1 failed, 1 skipped"));
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let report = run(&names(&["pool-a"]), true, op).await;
        assert!(report.is_success());
    }
}
