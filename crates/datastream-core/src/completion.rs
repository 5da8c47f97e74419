//! Exactly-once completion signals for stream endpoints.
//!
//! Every endpoint owns a [`CompletionCell`]; the first `complete` call wins and
//! later calls are ignored. [`Completion`] handles can be taken any number of
//! times and awaited after the fact.

use std::future::IntoFuture;

use futures::future::{try_join_all, LocalBoxFuture};
use tokio::sync::watch;

use crate::error::{Result, StreamError};

/// Write side of a completion signal.
pub struct CompletionCell {
    tx: watch::Sender<Option<Result<()>>>,
}

impl CompletionCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Resolve the signal. Returns `false` if it was already resolved.
    pub fn complete(&self, outcome: Result<()>) -> bool {
        self.tx.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    pub fn is_complete(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn completion(&self) -> Completion {
        Completion {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CompletionCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaitable outcome of an endpoint: `Ok(())` on end-of-stream, the close
/// error otherwise.
#[derive(Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<Result<()>>>,
}

impl Completion {
    /// Outcome if already resolved.
    pub fn peek(&self) -> Option<Result<()>> {
        self.rx.borrow().clone()
    }
}

impl IntoFuture for Completion {
    type Output = Result<()>;
    type IntoFuture = LocalBoxFuture<'static, Result<()>>;

    fn into_future(self) -> Self::IntoFuture {
        let mut rx = self.rx;
        Box::pin(async move {
            let outcome = match rx.wait_for(Option::is_some).await {
                Ok(state) => (*state).clone().unwrap_or(Ok(())),
                // The endpoint was dropped without ever reaching a terminal state.
                Err(_) => Err(StreamError::ProtocolViolation(
                    "endpoint dropped before completing".into(),
                )),
            };
            outcome
        })
    }
}

/// Wait for all completions; resolves with the first error to occur.
pub async fn wait_all<I>(completions: I) -> Result<()>
where
    I: IntoIterator<Item = Completion>,
{
    try_join_all(completions.into_iter().map(IntoFuture::into_future))
        .await
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_outcome_wins() {
        let cell = CompletionCell::new();
        assert!(!cell.is_complete());
        assert!(cell.complete(Err(StreamError::upstream("boom"))));
        assert!(!cell.complete(Ok(())));
        assert_eq!(
            cell.completion().peek(),
            Some(Err(StreamError::upstream("boom")))
        );
    }

    #[tokio::test]
    async fn completion_taken_after_resolution_still_resolves() {
        let cell = CompletionCell::new();
        cell.complete(Ok(()));
        assert_eq!(cell.completion().await, Ok(()));
    }

    #[tokio::test]
    async fn wait_all_reports_error() {
        let a = CompletionCell::new();
        let b = CompletionCell::new();
        a.complete(Ok(()));
        b.complete(Err(StreamError::downstream("sink failed")));
        let res = wait_all([a.completion(), b.completion()]).await;
        assert_eq!(res, Err(StreamError::downstream("sink failed")));
    }

    #[tokio::test]
    async fn dropped_cell_is_a_violation() {
        let cell = CompletionCell::new();
        let c = cell.completion();
        drop(cell);
        assert!(matches!(c.await, Err(StreamError::ProtocolViolation(_))));
    }
}
