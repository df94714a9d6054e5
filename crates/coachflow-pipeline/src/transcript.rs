//! Run transcripts: the raw output and extracted answers of one run, saved
//! as JSON.

use std::path::Path;

use chrono::{DateTime, Utc};
use coachflow_types::{AnswerRecord, DriverState, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub pipeline: String,
    pub run_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub final_state: DriverState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps_completed: usize,
    pub step_count: usize,
    pub raw_output: Vec<String>,
    pub answers: Vec<AnswerRecord>,
}

impl Transcript {
    /// Capture the session's current run. Call after the run has finished.
    pub async fn capture(session: &Session, pipeline: &str, started_at: DateTime<Utc>) -> Self {
        let snapshot = session.snapshot().await;
        if snapshot.state.is_active() {
            tracing::warn!(
                state = ?snapshot.state,
                "Capturing a transcript of a run still in progress"
            );
        }
        Self {
            pipeline: pipeline.to_string(),
            run_id: snapshot.run_id,
            started_at,
            finished_at: Utc::now(),
            final_state: snapshot.state,
            error: snapshot.error,
            steps_completed: snapshot.cursor,
            step_count: snapshot.step_count,
            raw_output: session.raw_output().await,
            answers: snapshot.answers,
        }
    }

    /// The whole session output as one string.
    pub fn output_text(&self) -> String {
        self.raw_output.concat()
    }

    /// Write as pretty JSON, creating parent directories.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        tracing::debug!(path = %path.display(), "Transcript saved");
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }
}
