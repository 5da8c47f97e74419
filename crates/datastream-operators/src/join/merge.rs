//! Left outer sort-merge join.
//!
//! Both inputs are sorted ascending by a shared key. A left item is joined
//! with the right head of equal key, or left-joined when there is none; the
//! right head stays in place so several left items can match it. Right items
//! below the current left key are skipped.

use std::cell::Cell;
use std::cmp::Ordering;
use std::rc::Rc;

use datastream_core::error::StreamError;
use datastream_core::eventloop::post;
use datastream_core::port::{InputHooks, InputPort, OutputHooks, OutputPort};
use datastream_core::protocol::{StreamConsumer, StreamProducer};
use tracing::debug;

use crate::fanin::BufferedInput;
use crate::traits::{key_fn, natural_order, Comparator, KeyFn};

/// Builds output items from matched or unmatched left items.
pub trait ValueJoiner<K, L, R, O> {
    fn inner_join(&self, key: &K, left: L, right: &R) -> O;

    fn left_join(&self, key: &K, left: L) -> O;
}

/// A [`ValueJoiner`] made of two closures.
pub struct FnJoiner<F, G> {
    inner: F,
    left: G,
}

pub fn joiner<K, L, R, O, F, G>(inner: F, left: G) -> FnJoiner<F, G>
where
    F: Fn(&K, L, &R) -> O,
    G: Fn(&K, L) -> O,
{
    FnJoiner { inner, left }
}

impl<K, L, R, O, F, G> ValueJoiner<K, L, R, O> for FnJoiner<F, G>
where
    F: Fn(&K, L, &R) -> O,
    G: Fn(&K, L) -> O,
{
    fn inner_join(&self, key: &K, left: L, right: &R) -> O {
        (self.inner)(key, left, right)
    }

    fn left_join(&self, key: &K, left: L) -> O {
        (self.left)(key, left)
    }
}

pub struct Join<K: 'static, L: 'static, R: 'static, O: 'static> {
    state: Rc<JoinState<K, L, R, O>>,
}

struct JoinState<K: 'static, L: 'static, R: 'static, O: 'static> {
    left: BufferedInput<L>,
    right: BufferedInput<R>,
    output: Rc<OutputPort<O>>,
    left_key: KeyFn<L, K>,
    right_key: KeyFn<R, K>,
    cmp: Comparator<K>,
    joiner: Box<dyn ValueJoiner<K, L, R, O>>,
    scheduled: Cell<bool>,
    closed: Cell<bool>,
}

impl<K: 'static, L: 'static, R: 'static, O: 'static> Join<K, L, R, O> {
    pub fn with_comparator(
        left_key: KeyFn<L, K>,
        right_key: KeyFn<R, K>,
        cmp: Comparator<K>,
        joiner: impl ValueJoiner<K, L, R, O> + 'static,
    ) -> Self {
        let left = InputPort::new("join.left");
        let right = InputPort::new("join.right");
        let output = OutputPort::new("join.out");
        let state = Rc::new(JoinState {
            left: BufferedInput::new(Rc::clone(&left), 1),
            right: BufferedInput::new(Rc::clone(&right), 1),
            output: Rc::clone(&output),
            left_key,
            right_key,
            cmp,
            joiner: Box::new(joiner),
            scheduled: Cell::new(false),
            closed: Cell::new(false),
        });

        let (on_item, on_end, on_error) = (Rc::clone(&state), Rc::clone(&state), Rc::clone(&state));
        left.install(
            InputHooks::new(move |item: L| {
                if on_item.left.push(item) {
                    on_item.schedule();
                }
            })
            .on_end_of_stream(move || {
                on_end.left.mark_ended();
                on_end.schedule();
            })
            .on_error(move |e| on_error.abort(e)),
        );

        let (on_item, on_end, on_error) = (Rc::clone(&state), Rc::clone(&state), Rc::clone(&state));
        right.install(
            InputHooks::new(move |item: R| {
                if on_item.right.push(item) {
                    on_item.schedule();
                }
            })
            .on_end_of_stream(move || {
                on_end.right.mark_ended();
                on_end.schedule();
            })
            .on_error(move |e| on_error.abort(e)),
        );

        let (on_bound, on_resume, on_error) =
            (Rc::clone(&state), Rc::clone(&state), Rc::clone(&state));
        output.install(
            OutputHooks::new()
                .on_bound(move || on_bound.produce())
                .on_resume(move || on_resume.produce())
                .on_error(move |e| on_error.abort(e)),
        );
        Self { state }
    }

    /// Items queued per input before that input is suspended.
    pub fn with_buffer_size(self, buffer_size: usize) -> Self {
        self.state.left.set_capacity(buffer_size);
        self.state.right.set_capacity(buffer_size);
        self
    }

    pub fn left(&self) -> Rc<InputPort<L>> {
        Rc::clone(&self.state.left.port)
    }

    pub fn right(&self) -> Rc<InputPort<R>> {
        Rc::clone(&self.state.right.port)
    }

    pub fn output(&self) -> Rc<OutputPort<O>> {
        Rc::clone(&self.state.output)
    }
}

impl<K: Ord + 'static, L: 'static, R: 'static, O: 'static> Join<K, L, R, O> {
    /// Join on keys in their natural order.
    pub fn new(
        left_key: impl Fn(&L) -> K + 'static,
        right_key: impl Fn(&R) -> K + 'static,
        joiner: impl ValueJoiner<K, L, R, O> + 'static,
    ) -> Self {
        Self::with_comparator(key_fn(left_key), key_fn(right_key), natural_order(), joiner)
    }
}

impl<K: 'static, L: 'static, R: 'static, O: 'static> JoinState<K, L, R, O> {
    fn schedule(self: &Rc<Self>) {
        if self.scheduled.replace(true) {
            return;
        }
        let this = Rc::clone(self);
        post(move || {
            this.scheduled.set(false);
            this.produce();
        });
    }

    fn produce(&self) {
        if self.closed.get() || self.output.status().is_terminal() {
            return;
        }
        loop {
            let Some(left_key) = self.left.head_key(&self.left_key) else {
                if self.left.is_ended() {
                    self.finish();
                }
                return;
            };
            if self.right.is_empty() && !self.right.is_ended() {
                return;
            }
            let order = self
                .right
                .head_key(&self.right_key)
                .map(|right_key| (self.cmp)(&left_key, &right_key));
            if order == Some(Ordering::Greater) {
                self.right.pop();
                continue;
            }
            if !self.output.is_ready() {
                return;
            }
            let Some(left) = self.left.pop() else {
                return;
            };
            let item = match order {
                Some(Ordering::Equal) => self
                    .right
                    .with_head(|right| self.joiner.inner_join(&left_key, left, right)),
                _ => Some(self.joiner.left_join(&left_key, left)),
            };
            if let Some(item) = item {
                self.output.send(item);
            }
        }
    }

    /// Left is drained: end the output and let the right side run out.
    fn finish(&self) {
        debug!("join drained");
        self.output.end_of_stream();
        let right = &self.right;
        right.clear();
        right.port.redirect(Rc::new(|_: R| {}));
        right.port.resume();
    }

    fn abort(&self, error: &StreamError) {
        if self.closed.replace(true) {
            return;
        }
        debug!(%error, "join aborted");
        self.left.clear();
        self.right.clear();
        self.output.close_with_error(error.clone());
        self.left.port.close_with_error(error.clone());
        self.right.port.close_with_error(error.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastream_core::eventloop::run_local;
    use datastream_core::protocol::connect;
    use datastream_core::sink::{SuspendPolicy, ToList};
    use datastream_core::status::StreamStatus;
    use datastream_core::supplier::{of_iter, of_iter_then_error};

    #[derive(Debug, Clone, PartialEq)]
    struct Master {
        id: u32,
        detail_id: u32,
        master: &'static str,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Detail {
        id: u32,
        detail: &'static str,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct MasterDetail {
        id: u32,
        master: &'static str,
        detail: Option<&'static str>,
    }

    fn master(id: u32, detail_id: u32, master: &'static str) -> Master {
        Master {
            id,
            detail_id,
            master,
        }
    }

    fn detail(id: u32, detail: &'static str) -> Detail {
        Detail { id, detail }
    }

    fn master_detail_join() -> Join<u32, Master, Detail, MasterDetail> {
        Join::new(
            |m: &Master| m.detail_id,
            |d: &Detail| d.id,
            joiner(
                |_: &u32, m: Master, d: &Detail| MasterDetail {
                    id: m.id,
                    master: m.master,
                    detail: Some(d.detail),
                },
                |_: &u32, m: Master| MasterDetail {
                    id: m.id,
                    master: m.master,
                    detail: None,
                },
            ),
        )
    }

    fn masters() -> Vec<Master> {
        vec![
            master(10, 10, "masterA"),
            master(20, 10, "masterB"),
            master(25, 15, "masterB+"),
            master(30, 20, "masterC"),
            master(40, 20, "masterD"),
        ]
    }

    #[test]
    fn joins_master_with_detail() {
        run_local(async {
            let join = master_detail_join();
            let left = of_iter(masters());
            let right = of_iter(vec![detail(10, "detailX"), detail(20, "detailY")]);
            connect(&left, &join.left());
            connect(&right, &join.right());
            let sink = ToList::with_policy(SuspendPolicy::EveryItem);
            connect(&join.output(), &sink.input());
            sink.completion().await.unwrap();

            let pairs: Vec<_> = sink.items().into_iter().map(|r| (r.master, r.detail)).collect();
            assert_eq!(
                pairs,
                vec![
                    ("masterA", Some("detailX")),
                    ("masterB", Some("detailX")),
                    ("masterB+", None),
                    ("masterC", Some("detailY")),
                    ("masterD", Some("detailY")),
                ]
            );
            assert_eq!(left.completion().await, Ok(()));
            assert_eq!(right.completion().await, Ok(()));
        })
        .unwrap();
    }

    #[test]
    fn right_leftovers_are_drained() {
        run_local(async {
            let join = master_detail_join();
            let right = of_iter((0..50).map(|i| detail(i, "unused")));
            connect(&of_iter(vec![master(1, 3, "only")]), &join.left());
            connect(&right, &join.right());
            let sink = ToList::new();
            connect(&join.output(), &sink.input());
            sink.completion().await.unwrap();

            assert_eq!(sink.items()[0].detail, Some("unused"));
            assert_eq!(right.completion().await, Ok(()));
            assert_eq!(join.right().status(), StreamStatus::EndOfStream);
        })
        .unwrap();
    }

    #[test]
    fn empty_right_left_joins_everything() {
        run_local(async {
            let join = master_detail_join();
            connect(&of_iter(masters()), &join.left());
            connect(&of_iter(Vec::new()), &join.right());
            let sink = ToList::new();
            connect(&join.output(), &sink.input());
            sink.completion().await.unwrap();

            let items = sink.take();
            assert_eq!(items.len(), 5);
            assert!(items.iter().all(|r| r.detail.is_none()));
        })
        .unwrap();
    }

    #[test]
    fn right_error_closes_left_and_output() {
        run_local(async {
            let join = master_detail_join().with_buffer_size(2);
            let left = of_iter(masters());
            connect(&left, &join.left());
            connect(
                &of_iter_then_error(
                    vec![detail(10, "detailX")],
                    StreamError::upstream("detail feed dropped"),
                ),
                &join.right(),
            );
            let sink = ToList::new();
            connect(&join.output(), &sink.input());

            let err = Err(StreamError::upstream("detail feed dropped"));
            assert_eq!(sink.completion().await, err);
            assert_eq!(left.completion().await, err);
        })
        .unwrap();
    }

    #[test]
    fn output_error_closes_both_inputs() {
        run_local(async {
            let join = master_detail_join();
            let left = of_iter(masters());
            let right = of_iter(vec![detail(10, "detailX")]);
            connect(&left, &join.left());
            connect(&right, &join.right());
            let sink = ToList::new();
            connect(&join.output(), &sink.input());
            sink.input().close_with_error(StreamError::downstream("rejected"));

            let err = Err(StreamError::downstream("rejected"));
            assert_eq!(left.completion().await, err);
            assert_eq!(right.completion().await, err);
        })
        .unwrap();
    }
}
