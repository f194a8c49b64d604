//! Applies each repository's keep policy, once per job that declares it.

use std::collections::HashSet;

use tracing::{error, info};

use crate::core::command::CommandRunner;
use crate::core::models::{JobCategory, JobDescriptor, JobId, Outcome};
use crate::core::restic::Restic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryRole {
    Destination,
    CopyTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneResult {
    pub job: JobId,
    pub repository_location: String,
    pub role: RepositoryRole,
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct RetentionReport {
    pub results: Vec<PruneResult>,
}

impl RetentionReport {
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.outcome.is_success()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }
}

pub struct RetentionRunner<'a> {
    runner: &'a dyn CommandRunner,
    restic: Restic,
    dry_run: bool,
}

impl<'a> RetentionRunner<'a> {
    /// With `dry_run`, restic reports what it would forget without removing anything.
    pub fn new(runner: &'a dyn CommandRunner, restic: Restic, dry_run: bool) -> Self {
        Self {
            runner,
            restic,
            dry_run,
        }
    }

    /// Prune every repository of every job passing the filters.
    ///
    /// A location shared by several jobs is pruned once per job, each time
    /// with that job's policy. A failed prune is recorded and the run goes on.
    pub fn run(
        &self,
        jobs: &[JobDescriptor],
        category: Option<JobCategory>,
        name: Option<&str>,
    ) -> RetentionReport {
        let mut report = RetentionReport::default();

        for job in jobs.iter().filter(|j| j.matches(category, name)) {
            let mut seen = HashSet::new();
            let repositories = job
                .destinations
                .iter()
                .map(|r| (r, RepositoryRole::Destination))
                .chain(job.copy_to.iter().map(|r| (r, RepositoryRole::CopyTarget)));

            for (repo, role) in repositories {
                if !seen.insert(repo.location.as_str()) {
                    continue;
                }

                info!(job = %job.id, repo = %repo.location, dry_run = self.dry_run, "Pruning repository");
                let outcome = match repo.prune(self.runner, &self.restic, self.dry_run) {
                    Ok(()) => Outcome::Success,
                    Err(e) => {
                        error!(job = %job.id, repo = %repo.location, error = %e, "Prune failed");
                        Outcome::Failure(e.to_string())
                    }
                };

                report.results.push(PruneResult {
                    job: job.id.clone(),
                    repository_location: repo.location.clone(),
                    role,
                    outcome,
                });
            }
        }

        info!(
            pruned = report.results.len(),
            failures = report.failures(),
            "Retention run finished"
        );
        report
    }
}
