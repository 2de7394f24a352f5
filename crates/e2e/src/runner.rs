//! Suite runner: expands devices × iterations into rounds and runs them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

use crate::device::Device;
use crate::error::{E2eError, E2eResult};
use crate::orchestrator::{Orchestrator, RoundParams, RoundReport};
use crate::portal::VersionUpload;
use crate::status::RunStatus;

/// What a suite run covers
#[derive(Debug, Clone)]
pub struct SuitePlan {
    pub devices: Vec<Device>,
    /// Repetitions per device
    pub times: u32,
    pub upload: VersionUpload,
    /// Group to use instead of the one derived from each serial number
    pub group_override: Option<String>,
    /// Devices processed concurrently
    pub jobs: usize,
}

impl SuitePlan {
    /// Rounds of one device, in execution order
    pub fn rounds_for(&self, device: &Device) -> Vec<RoundParams> {
        let group = self
            .group_override
            .clone()
            .unwrap_or_else(|| device.group_name());

        (0..self.times)
            .map(|times| RoundParams {
                device: device.clone(),
                group: group.clone(),
                upload: self.upload.clone(),
                times,
            })
            .collect()
    }

    pub fn total_rounds(&self) -> usize {
        self.devices.len() * self.times as usize
    }
}

/// Result of a suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errored: usize,
    pub duration_ms: u64,
    pub rounds: Vec<RoundReport>,
}

impl SuiteResult {
    fn from_rounds(run_id: Uuid, started_at: DateTime<Utc>, duration_ms: u64, rounds: Vec<RoundReport>) -> Self {
        let count = |pred: fn(&RunStatus) -> bool| rounds.iter().filter(|r| pred(&r.status)).count();
        let passed = count(|s| matches!(s, RunStatus::Success));
        let timed_out = count(|s| matches!(s, RunStatus::Timeout));
        let errored = count(|s| matches!(s, RunStatus::Error(_)));

        Self {
            run_id,
            started_at,
            total: rounds.len(),
            passed,
            failed: rounds.len() - passed,
            timed_out,
            errored,
            duration_ms,
            rounds,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Runs a [`SuitePlan`] on an [`Orchestrator`]
pub struct SuiteRunner {
    orchestrator: Arc<Orchestrator>,
    output_dir: PathBuf,
}

impl SuiteRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            orchestrator,
            output_dir: output_dir.into(),
        }
    }

    /// Run every round. Rounds of one device are sequential; up to
    /// `plan.jobs` devices run at once.
    pub async fn run(&self, plan: &SuitePlan) -> E2eResult<SuiteResult> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            "Running {} round(s) over {} device(s), {} job(s) [run {}]",
            plan.total_rounds(),
            plan.devices.len(),
            plan.jobs.max(1),
            run_id
        );

        let permits = Arc::new(Semaphore::new(plan.jobs.max(1)));
        let mut workers = JoinSet::new();

        for device in &plan.devices {
            let rounds = plan.rounds_for(device);
            let orchestrator = self.orchestrator.clone();
            let permits = permits.clone();

            workers.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| E2eError::Task(e.to_string()))?;

                let mut reports = Vec::with_capacity(rounds.len());
                for round in &rounds {
                    reports.push(orchestrator.run_round(round).await);
                }
                Ok::<_, E2eError>(reports)
            });
        }

        let mut rounds = Vec::with_capacity(plan.total_rounds());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(reports) => rounds.extend(reports?),
                Err(e) => {
                    error!("Device worker panicked: {}", e);
                    return Err(E2eError::Task(e.to_string()));
                }
            }
        }
        rounds.sort_by(|a, b| {
            a.serial_number
                .cmp(&b.serial_number)
                .then(a.iteration.cmp(&b.iteration))
        });

        let result = SuiteResult::from_rounds(run_id, started_at, start.elapsed().as_millis() as u64, rounds);

        info!("");
        info!(
            "Suite results: {} passed, {} failed ({} timed out, {} errors) ({} ms)",
            result.passed, result.failed, result.timed_out, result.errored, result.duration_ms
        );
        Ok(result)
    }

    /// Write suite results to `{output_dir}/suite-results.json`
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        write_results(&self.output_dir, results)
    }
}

pub fn write_results(output_dir: &Path, results: &SuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("suite-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}
