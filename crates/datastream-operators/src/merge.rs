//! K-way merge of key-sorted inputs.
//!
//! Every input is buffered (one pending item by default). An output step only
//! runs once every open input presents a head, then emits the minimal head;
//! ties go to the input added first. With deduplication an item whose key
//! equals the previously emitted key is discarded.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;

use datastream_core::error::StreamError;
use datastream_core::eventloop::post;
use datastream_core::port::{InputHooks, InputPort, OutputHooks, OutputPort};
use datastream_core::protocol::{StreamConsumer, StreamProducer};
use tracing::debug;

use crate::fanin::{BufferedInput, HeadQueue};
use crate::traits::{key_fn, natural_order, Comparator, KeyFn};

pub struct Merger<K: 'static, T: 'static> {
    state: Rc<MergerState<K, T>>,
}

struct MergerState<K: 'static, T: 'static> {
    inputs: RefCell<Vec<Rc<BufferedInput<T>>>>,
    output: Rc<OutputPort<T>>,
    key_fn: KeyFn<T, K>,
    heads: HeadQueue<K>,
    deduplicate: bool,
    last_key: RefCell<Option<K>>,
    buffer_size: Cell<usize>,
    scheduled: Cell<bool>,
    closed: Cell<bool>,
}

impl<K: 'static, T: 'static> Merger<K, T> {
    pub fn new(key_fn: KeyFn<T, K>, cmp: Comparator<K>, deduplicate: bool) -> Self {
        let output = OutputPort::new("merger.out");
        let state = Rc::new(MergerState {
            inputs: RefCell::new(Vec::new()),
            output: Rc::clone(&output),
            key_fn,
            heads: HeadQueue::new(cmp),
            deduplicate,
            last_key: RefCell::new(None),
            buffer_size: Cell::new(1),
            scheduled: Cell::new(false),
            closed: Cell::new(false),
        });
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
        self.state.buffer_size.set(buffer_size.max(1));
        self
    }

    /// Add a sorted input. Inputs may be added until the output is connected;
    /// a later one is returned already closed with a protocol violation.
    pub fn new_input(&self) -> Rc<InputPort<T>> {
        let state = &self.state;
        let index = state.inputs.borrow().len();
        let port = InputPort::new(format!("merger.in[{index}]"));
        if state.output.is_bound() || state.output.status().is_terminal() {
            port.close_with_error(StreamError::ProtocolViolation(
                "merger: input added after the output was connected".into(),
            ));
            return port;
        }

        let buffered = Rc::new(BufferedInput::new(Rc::clone(&port), state.buffer_size.get()));
        state.heads.add_source();
        let (on_item, on_end, on_error) = (Rc::clone(state), Rc::clone(state), Rc::clone(state));
        port.install(
            InputHooks::new(move |item: T| on_item.accept(index, item))
                .on_end_of_stream(move || on_end.input_ended(index))
                .on_error(move |e| on_error.abort(e)),
        );
        state.inputs.borrow_mut().push(buffered);
        port
    }

    pub fn output(&self) -> Rc<OutputPort<T>> {
        Rc::clone(&self.state.output)
    }

    pub fn input_count(&self) -> usize {
        self.state.inputs.borrow().len()
    }
}

impl<K: Ord + 'static, T: 'static> Merger<K, T> {
    /// Merge by the natural order of an extracted key.
    pub fn by_key(f: impl Fn(&T) -> K + 'static, deduplicate: bool) -> Self {
        Self::new(key_fn(f), natural_order(), deduplicate)
    }
}

impl<K: 'static, T: 'static> MergerState<K, T> {
    fn input(&self, index: usize) -> Option<Rc<BufferedInput<T>>> {
        self.inputs.borrow().get(index).cloned()
    }

    fn accept(self: &Rc<Self>, index: usize, item: T) {
        let Some(input) = self.input(index) else {
            return;
        };
        if input.push(item) {
            if let Some(key) = input.head_key(&self.key_fn) {
                self.heads.head_arrived(key, index);
            }
            self.schedule();
        }
    }

    fn input_ended(self: &Rc<Self>, index: usize) {
        let Some(input) = self.input(index) else {
            return;
        };
        input.mark_ended();
        if input.is_empty() {
            self.heads.source_ended_empty();
        }
        self.schedule();
    }

    /// Run an output step on a later loop turn, never inside a producer's push.
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
        if self.closed.get() || self.output.status().is_terminal() || !self.output.is_bound() {
            return;
        }
        loop {
            if !self.heads.ready() {
                return;
            }
            if self.heads.is_empty() {
                debug!(inputs = self.inputs.borrow().len(), "merger drained");
                self.output.end_of_stream();
                return;
            }
            if !self.output.is_ready() {
                return;
            }
            let Some((key, index)) = self.heads.pop() else {
                return;
            };
            let Some(input) = self.input(index) else {
                continue;
            };
            let Some(item) = input.pop() else {
                continue;
            };
            self.heads
                .head_consumed(input.head_key(&self.key_fn), index, input.is_ended());

            if self.deduplicate && self.is_duplicate(&key) {
                continue;
            }
            *self.last_key.borrow_mut() = Some(key);
            self.output.send(item);
        }
    }

    fn is_duplicate(&self, key: &K) -> bool {
        let cmp = self.heads.comparator();
        matches!(
            self.last_key.borrow().as_ref().map(|last| cmp(last, key)),
            Some(Ordering::Equal)
        )
    }

    fn abort(&self, error: &StreamError) {
        if self.closed.replace(true) {
            return;
        }
        debug!(%error, "merger aborted");
        self.output.close_with_error(error.clone());
        let inputs = self.inputs.borrow().clone();
        for input in inputs {
            input.clear();
            input.port.close_with_error(error.clone());
        }
    }
}
