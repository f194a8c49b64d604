//! Human and JSON renderings of a run.
//!
//! Text output keeps cleanup warnings in their own section, apart from
//! backup failures.

use std::fmt;

use serde::Serialize;

use crate::core::models::{Action, JobDescriptor, JobSummary, Outcome};
use crate::core::retention::{RepositoryRole, RetentionReport};
use crate::error::CleanupWarning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ok,
    Degraded,
    Aborted,
}

impl JobStatus {
    pub fn of(summary: &JobSummary) -> Self {
        if summary.fatal.is_some() {
            Self::Aborted
        } else if summary.is_success() {
            Self::Ok
        } else {
            Self::Degraded
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Serialize)]
struct ResultView<'a> {
    repository: &'a str,
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct JobView<'a> {
    job: String,
    status: JobStatus,
    destinations: usize,
    successes: usize,
    failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    results: Vec<ResultView<'a>>,
    warnings: &'a [CleanupWarning],
}

#[derive(Debug, Serialize)]
struct BackupView<'a> {
    success: bool,
    jobs: Vec<JobView<'a>>,
}

fn outcome_parts(outcome: &Outcome) -> (bool, Option<&str>) {
    match outcome {
        Outcome::Success => (true, None),
        Outcome::Failure(msg) => (false, Some(msg.as_str())),
    }
}

/// Outcome of a `backup` run.
pub struct BackupReport<'a> {
    summaries: &'a [JobSummary],
}

impl<'a> BackupReport<'a> {
    pub fn new(summaries: &'a [JobSummary]) -> Self {
        Self { summaries }
    }

    pub fn is_success(&self) -> bool {
        self.summaries.iter().all(JobSummary::is_success)
    }

    fn view(&self) -> BackupView<'a> {
        let jobs = self
            .summaries
            .iter()
            .map(|s| JobView {
                job: s.job.to_string(),
                status: JobStatus::of(s),
                destinations: s.destination_count,
                successes: s.successes(),
                failures: s.failures(),
                error: s.fatal.as_ref().map(ToString::to_string),
                results: s
                    .results
                    .iter()
                    .map(|r| {
                        let (ok, error) = outcome_parts(&r.outcome);
                        let (action, from) = match &r.action {
                            Action::Backup => ("backup", None),
                            Action::Copy { from } => ("copy", Some(from.as_str())),
                        };
                        ResultView {
                            repository: &r.repository_location,
                            action,
                            from,
                            ok,
                            error,
                        }
                    })
                    .collect(),
                warnings: &s.warnings,
            })
            .collect();

        BackupView {
            success: self.is_success(),
            jobs,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.view())
    }
}

impl fmt::Display for BackupReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let view = self.view();

        for job in &view.jobs {
            match &job.error {
                Some(err) => writeln!(f, "[{}] {}: {}", job.job, job.status.as_str(), err)?,
                None => writeln!(
                    f,
                    "[{}] {} ({}/{} destinations)",
                    job.job,
                    job.status.as_str(),
                    job.successes,
                    job.destinations
                )?,
            }
            for r in &job.results {
                let mark = if r.ok { "ok" } else { "FAILED" };
                write!(f, "  {:<7} {:<6} {}", mark, r.action, r.repository)?;
                if let Some(from) = r.from {
                    write!(f, " (from {})", from)?;
                }
                if let Some(err) = r.error {
                    write!(f, ": {}", err)?;
                }
                writeln!(f)?;
            }
        }

        let warnings: Vec<_> = view
            .jobs
            .iter()
            .flat_map(|j| j.warnings.iter().map(move |w| (&j.job, w)))
            .collect();
        if !warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Cleanup warnings (host state may need manual attention):")?;
            for (job, warning) in warnings {
                writeln!(f, "  [{}] {}", job, warning)?;
            }
        }

        let count = |status: JobStatus| view.jobs.iter().filter(|j| j.status == status).count();
        writeln!(f)?;
        write!(
            f,
            "{} job(s): {} ok, {} degraded, {} aborted",
            view.jobs.len(),
            count(JobStatus::Ok),
            count(JobStatus::Degraded),
            count(JobStatus::Aborted)
        )
    }
}

#[derive(Debug, Serialize)]
struct PruneView<'a> {
    job: String,
    repository: &'a str,
    copy_target: bool,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Outcome of a `prune` run.
pub struct PruneReport<'a> {
    report: &'a RetentionReport,
}

impl<'a> PruneReport<'a> {
    pub fn new(report: &'a RetentionReport) -> Self {
        Self { report }
    }

    fn views(&self) -> Vec<PruneView<'a>> {
        self.report
            .results
            .iter()
            .map(|r| {
                let (ok, error) = outcome_parts(&r.outcome);
                PruneView {
                    job: r.job.to_string(),
                    repository: &r.repository_location,
                    copy_target: r.role == RepositoryRole::CopyTarget,
                    ok,
                    error,
                }
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&serde_json::json!({
            "success": self.report.is_success(),
            "repositories": self.views(),
        }))
    }
}

impl fmt::Display for PruneReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for view in self.views() {
            let mark = if view.ok { "ok" } else { "FAILED" };
            write!(f, "  {:<7} [{}] {}", mark, view.job, view.repository)?;
            if view.copy_target {
                write!(f, " (copy target)")?;
            }
            if let Some(err) = view.error {
                write!(f, ": {}", err)?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "{} repositories pruned, {} failed",
            self.report.results.len(),
            self.report.failures()
        )
    }
}

/// Resolved jobs in execution order.
pub struct PlanReport<'a> {
    jobs: &'a [JobDescriptor],
}

impl<'a> PlanReport<'a> {
    pub fn new(jobs: &'a [JobDescriptor]) -> Self {
        Self { jobs }
    }
}

impl fmt::Display for PlanReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, job) in self.jobs.iter().enumerate() {
            writeln!(f, "{}. [{}] {}", i + 1, job.id, job.source.describe())?;
            for pattern in job.source.exclude_patterns() {
                writeln!(f, "     exclude {}", pattern)?;
            }
            for repo in &job.destinations {
                let p = &repo.retention;
                writeln!(
                    f,
                    "     -> {} (keep last={} daily={} weekly={} monthly={} yearly={})",
                    repo.location,
                    p.keep_last,
                    p.keep_daily,
                    p.keep_weekly,
                    p.keep_monthly,
                    p.keep_yearly
                )?;
            }
            for repo in &job.copy_to {
                writeln!(f, "     => copy to {}", repo.location)?;
            }
        }
        write!(f, "{} job(s)", self.jobs.len())
    }
}
