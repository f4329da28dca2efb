//! §4.G step 4 — briefing sub-fetches (weather/traffic/news/events/
//! school-closures), fired detached with their own deadlines. The
//! orchestrator never awaits them directly; the briefer stage consumes
//! whatever has landed by the time it runs, falling back to an empty
//! slot per field otherwise.
//!
//! Grounded in the §9 design note: "implement as detached tasks owned by
//! the orchestrator's scope; orchestrator may move on without joining,
//! but scope exit must cancel them to avoid leaks" — modeled here as a
//! `CancellationToken` child of the run's own token, held by the
//! [`PrewarmHandle`] so dropping/cancelling the run also stops the
//! sub-fetches.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub type SubFetchFuture = Pin<Box<dyn Future<Output = Option<String>> + Send>>;

#[derive(Debug, Clone, Default)]
pub struct PrewarmedBriefingInputs {
    pub weather: Option<String>,
    pub traffic: Option<String>,
    pub news: Option<String>,
    pub events: Option<String>,
    pub school_closures: Option<String>,
}

/// One named sub-fetch with its own per-call deadline.
pub struct SubFetch {
    pub field: &'static str,
    pub deadline: Duration,
    pub fetch: Box<dyn FnOnce(CancellationToken) -> SubFetchFuture + Send>,
}

pub struct PrewarmHandle {
    rx: watch::Receiver<PrewarmedBriefingInputs>,
    scope: CancellationToken,
}

impl PrewarmHandle {
    /// Non-blocking read of whatever sub-fetches have completed so far.
    pub fn snapshot(&self) -> PrewarmedBriefingInputs {
        self.rx.borrow().clone()
    }

    /// Cancels any sub-fetches still in flight; called when the
    /// orchestrator's run scope exits (success, failure, or cancellation)
    /// so detached tasks never outlive the run.
    pub fn cancel_remaining(&self) {
        self.scope.cancel();
    }
}

/// Spawns every sub-fetch as a detached task under a child of
/// `parent_cancel`. Each task races its own fetch against its own
/// deadline and, on success, writes its field into the shared slot.
pub fn spawn_prewarm(fetches: Vec<SubFetch>, parent_cancel: &CancellationToken) -> PrewarmHandle {
    let scope = parent_cancel.child_token();
    let (tx, rx) = watch::channel(PrewarmedBriefingInputs::default());
    let tx = Arc::new(tx);

    for sub_fetch in fetches {
        let token = scope.child_token();
        let tx = tx.clone();
        let field = sub_fetch.field;
        let deadline = sub_fetch.deadline;
        let fetch = sub_fetch.fetch;
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                _ = tokio::time::sleep(deadline) => {
                    tracing::debug!(field, "briefing sub-fetch exceeded its own deadline");
                    None
                }
                value = fetch(token.clone()) => value,
            };
            if let Some(value) = result {
                tx.send_modify(|inputs| set_field(inputs, field, value));
            }
        });
    }

    PrewarmHandle { rx, scope }
}

fn set_field(inputs: &mut PrewarmedBriefingInputs, field: &str, value: String) {
    match field {
        "weather" => inputs.weather = Some(value),
        "traffic" => inputs.traffic = Some(value),
        "news" => inputs.news = Some(value),
        "events" => inputs.events = Some(value),
        "school_closures" => inputs.school_closures = Some(value),
        other => tracing::warn!(field = other, "unknown briefing sub-fetch field"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_fetches_populate_their_field() {
        let parent = CancellationToken::new();
        let fetches = vec![SubFetch {
            field: "weather",
            deadline: Duration::from_secs(1),
            fetch: Box::new(|_token| Box::pin(async { Some("sunny".to_string()) })),
        }];
        let handle = spawn_prewarm(fetches, &parent);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.snapshot().weather.as_deref(), Some("sunny"));
    }

    #[tokio::test]
    async fn a_fetch_exceeding_its_deadline_leaves_the_field_empty() {
        let parent = CancellationToken::new();
        let fetches = vec![SubFetch {
            field: "traffic",
            deadline: Duration::from_millis(10),
            fetch: Box::new(|_token| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Some("congested".to_string())
                })
            }),
        }];
        let handle = spawn_prewarm(fetches, &parent);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.snapshot().traffic.is_none());
    }

    #[tokio::test]
    async fn cancelling_the_scope_stops_a_pending_fetch_from_writing() {
        let parent = CancellationToken::new();
        let fetches = vec![SubFetch {
            field: "news",
            deadline: Duration::from_secs(5),
            fetch: Box::new(|token| {
                Box::pin(async move {
                    token.cancelled().await;
                    None
                })
            }),
        }];
        let handle = spawn_prewarm(fetches, &parent);
        handle.cancel_remaining();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.snapshot().news.is_none());
    }
}
