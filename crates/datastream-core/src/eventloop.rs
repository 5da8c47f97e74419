//! Helpers over the single-threaded event loop.
//!
//! Pipelines run on a tokio current-thread runtime inside a `LocalSet`. All
//! scheduling helpers here must be called from within that `LocalSet`.

use std::future::Future;

use crate::error::{Result, StreamError};

/// Run `f` on a later turn of the event loop.
pub fn post<F>(f: F)
where
    F: FnOnce() + 'static,
{
    tokio::task::spawn_local(async move { f() });
}

/// Spawn a detached local future.
pub fn post_future<F>(fut: F)
where
    F: Future<Output = ()> + 'static,
{
    tokio::task::spawn_local(fut);
}

/// Build a current-thread runtime and drive `fut` to completion inside a
/// fresh `LocalSet`.
pub fn run_local<F: Future>(fut: F) -> std::io::Result<F::Output> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    Ok(local.block_on(&rt, fut))
}

/// Run blocking work on the runtime's blocking pool and re-join the event loop.
pub async fn blocking<R, F>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StreamError::storage(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn posted_work_runs_later() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        run_local(async move {
            let inner = Rc::clone(&l);
            post(move || inner.borrow_mut().push("posted"));
            l.borrow_mut().push("inline");
            tokio::task::yield_now().await;
        })
        .unwrap();
        assert_eq!(*log.borrow(), vec!["inline", "posted"]);
    }

    #[test]
    fn blocking_propagates_errors() {
        let res = run_local(async {
            blocking(|| -> Result<u32> { Err(StreamError::storage("disk full")) }).await
        })
        .unwrap();
        assert_eq!(res, Err(StreamError::storage("disk full")));
    }
}
