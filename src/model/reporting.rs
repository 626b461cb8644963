//! Reproduction run summaries and their renderers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{CrashSignature, ReproducerKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Reproduced,
    NotReproduced,
    Error,
    MissingTool,
    Cancelled,
}

/// One reproduction attempt as seen by the convergence loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    #[serde(rename = "timedOut")]
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<CrashSignature>,
    pub score: usize,
    pub required: usize,
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproSummary {
    pub status: ExitStatus,
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "testcaseId")]
    pub testcase_id: String,
    #[serde(rename = "jobType")]
    pub job_type: String,
    pub reproducer: ReproducerKind,
    pub sanitizer: String,
    #[serde(rename = "testcaseDigest", skip_serializing_if = "Option::is_none")]
    pub testcase_digest: Option<String>,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "finishedAt")]
    pub finished_at: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    pub original: CrashSignature,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(rename = "summaryPath", skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<String>,
}

impl ReproSummary {
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "status={:?} testcase={} job={} reproducer={:?} sanitizer={} runId={}\n",
            self.status, self.testcase_id, self.job_type, self.reproducer, self.sanitizer, self.run_id
        ));
        out.push_str(&format!(
            "original: {} / {}\n",
            self.original.crash_type,
            self.original.crash_state.join(" | ")
        ));
        for a in &self.attempts {
            let sig = match &a.signature {
                Some(s) => format!("{} / {}", s.crash_type, s.crash_state.join(" | ")),
                None => "<no signature>".to_string(),
            };
            out.push_str(&format!(
                "- attempt {}: exit={} timedOut={} score={}/{} matched={} {sig}\n",
                a.attempt, a.exit_code, a.timed_out, a.score, a.required, a.matched
            ));
            for w in &a.warnings {
                out.push_str(&format!("    warning: {w}\n"));
            }
        }
        for w in &self.warnings {
            out.push_str(&format!("warning: {w}\n"));
        }
        if let Some(path) = &self.summary_path {
            out.push_str(&format!("summary={path}\n"));
        }
        out.trim_end().to_string()
    }
}

pub fn write_summary(summary: &ReproSummary, run_dir: &Path) -> crate::ReproResult<PathBuf> {
    std::fs::create_dir_all(run_dir)?;
    let out = run_dir.join("summary.json");
    std::fs::write(&out, serde_json::to_vec_pretty(summary)?)?;
    Ok(out)
}
