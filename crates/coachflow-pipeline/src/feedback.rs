//! Feedback providers: who answers a Critic step.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use coachflow_types::{AnswerRecord, CoachflowError, DriverState, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast;
use tracing::warn;

use crate::events::RunEvent;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRequest {
    pub node_id: String,
    pub edge_id: String,
    /// The most recent answer extracted before the request, if any.
    pub latest_answer: Option<AnswerRecord>,
}

#[async_trait]
pub trait FeedbackProvider: Send + Sync {
    async fn feedback(&self, request: &FeedbackRequest) -> Result<String>;
}

// ---------------------------------------------------------------------------
// ConsoleFeedback
// ---------------------------------------------------------------------------

/// Reads feedback from stdin. Text ends at the first empty line or EOF.
pub struct ConsoleFeedback {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleFeedback {
    pub fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for ConsoleFeedback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedbackProvider for ConsoleFeedback {
    async fn feedback(&self, request: &FeedbackRequest) -> Result<String> {
        println!(
            "\n[{}] Provide critic/feedback/request (finish with an empty line):",
            request.node_id
        );
        let mut lines = self.lines.lock().await;
        let mut collected = Vec::new();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }
            collected.push(line.to_string());
        }
        Ok(collected.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// ScriptedFeedback
// ---------------------------------------------------------------------------

/// Replies with queued texts in order and records every request. Once the
/// queue is empty it replies with an empty string.
pub struct ScriptedFeedback {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<FeedbackRequest>>,
}

impl ScriptedFeedback {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<FeedbackRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl FeedbackProvider for ScriptedFeedback {
    async fn feedback(&self, request: &FeedbackRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default();
        Ok(reply)
    }
}

// ---------------------------------------------------------------------------
// attend
// ---------------------------------------------------------------------------

/// Answer every feedback request with `provider` until the run finishes.
///
/// `events` must be subscribed before the run starts so no request is missed.
pub async fn attend(
    session: &Session,
    mut events: broadcast::Receiver<RunEvent>,
    provider: &dyn FeedbackProvider,
) -> Result<DriverState> {
    let mut latest_answer: Option<AnswerRecord> = None;
    loop {
        match events.recv().await {
            Ok(RunEvent::AnswersExtracted { answers, .. }) => {
                if let Some(last) = answers.last() {
                    latest_answer = Some(last.clone());
                }
            }
            Ok(RunEvent::FeedbackRequested { node_id, edge_id }) => {
                let request = FeedbackRequest {
                    node_id,
                    edge_id,
                    latest_answer: latest_answer.clone(),
                };
                let text = provider.feedback(&request).await?;
                session.submit_feedback(text).await?;
            }
            Ok(RunEvent::RunFinished { state, .. }) => return Ok(state),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Feedback attendant lagged behind run events");
                let snapshot = session.snapshot().await;
                if snapshot.state.is_terminal() {
                    return Ok(snapshot.state);
                }
                if snapshot.state == DriverState::AwaitingFeedback {
                    let request = FeedbackRequest {
                        node_id: snapshot.highlighted_node_id.unwrap_or_default(),
                        edge_id: String::new(),
                        latest_answer: snapshot.answers.last().cloned(),
                    };
                    let text = provider.feedback(&request).await?;
                    session.submit_feedback(text).await?;
                }
            }
            Err(broadcast::error::RecvError::Closed) => return Err(CoachflowError::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(node: &str) -> FeedbackRequest {
        FeedbackRequest {
            node_id: node.into(),
            edge_id: "e1".into(),
            latest_answer: None,
        }
    }

    #[tokio::test]
    async fn scripted_replies_in_order_then_empty() {
        let provider = ScriptedFeedback::new(["tighten the loop", "ok"]);
        assert_eq!(provider.feedback(&request("k1")).await.unwrap(), "tighten the loop");
        assert_eq!(provider.feedback(&request("k2")).await.unwrap(), "ok");
        assert_eq!(provider.feedback(&request("k3")).await.unwrap(), "");

        let seen: Vec<_> = provider.requests().into_iter().map(|r| r.node_id).collect();
        assert_eq!(seen, vec!["k1", "k2", "k3"]);
    }
}
