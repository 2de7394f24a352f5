//! Report Command

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use fota_e2e::recorder::{OutcomeLine, OutcomeRecorder, OutcomeSummary};
use fota_e2e::FotaConfig;

use crate::output::{print_item, print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Group whose log to read, e.g. autotests_TEST-SWFOTA-C
    #[arg(long)]
    pub group: String,

    /// Directory holding the outcome logs
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Print only the summary
    #[arg(long)]
    pub summary_only: bool,
}

impl TableDisplay for OutcomeLine {
    fn headers() -> Vec<&'static str> {
        vec!["Iteration", "Ticks", "Status"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.iteration.to_string(),
            self.elapsed.to_string(),
            self.status.clone(),
        ]
    }
}

impl TableDisplay for OutcomeSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Total", "Succeeded", "Failed", "Timed out", "Mean ticks"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.total.to_string(),
            self.succeeded.to_string(),
            self.failed.to_string(),
            self.timed_out.to_string(),
            self.mean_elapsed
                .map(|m| format!("{:.1}", m))
                .unwrap_or_else(|| "-".into()),
        ]
    }
}

pub fn execute(args: ReportArgs, config: FotaConfig, format: OutputFormat) -> Result<()> {
    let dir = args.results_dir.unwrap_or(config.results.dir);
    let recorder = OutcomeRecorder::new(dir);
    let lines = recorder
        .read(&args.group)
        .with_context(|| format!("reading {}", recorder.log_path(&args.group).display()))?;

    if !args.summary_only {
        print_list(&lines, format);
    }
    print_item(&OutcomeSummary::from_lines(&lines), format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fota_e2e::RunStatus;

    #[test]
    fn test_summary_row() {
        let lines = vec![
            OutcomeLine::new(1, 12, &RunStatus::Success),
            OutcomeLine::new(2, 601, &RunStatus::Timeout),
            OutcomeLine::new(3, 30, &RunStatus::Failed("Failed".into())),
        ];
        let row = OutcomeSummary::from_lines(&lines).row();
        assert_eq!(row, ["3", "1", "1", "1", "21.0"]);
    }

    #[test]
    fn test_missing_log_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = ReportArgs {
            group: "autotests_NONE".into(),
            results_dir: Some(dir.path().to_path_buf()),
            summary_only: true,
        };
        assert!(execute(args, FotaConfig::default(), OutputFormat::Plain).is_err());
    }
}
