//! Splitter: one input, every item delivered to all outputs.
//!
//! The input runs only while every output is ready. An output suspended in
//! the middle of delivering one item keeps that single item and receives it
//! on resume; end-of-stream waits until all such items are delivered.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use datastream_core::error::StreamError;
use datastream_core::port::{InputHooks, InputPort, OutputHooks, OutputPort};
use datastream_core::protocol::{StreamConsumer, StreamProducer};
use tracing::debug;

pub struct Splitter<T: Clone + 'static> {
    state: Rc<SplitterState<T>>,
}

struct SplitterState<T: 'static> {
    input: Rc<InputPort<T>>,
    outputs: RefCell<Vec<Rc<OutputPort<T>>>>,
    pending: RefCell<Vec<Option<T>>>,
    input_ended: Cell<bool>,
    closed: Cell<bool>,
}

impl<T: Clone + 'static> Splitter<T> {
    pub fn new() -> Self {
        let input = InputPort::new("splitter.in");
        let state = Rc::new(SplitterState {
            input: Rc::clone(&input),
            outputs: RefCell::new(Vec::new()),
            pending: RefCell::new(Vec::new()),
            input_ended: Cell::new(false),
            closed: Cell::new(false),
        });
        let (on_item, on_start, on_end, on_error) = (
            Rc::clone(&state),
            Rc::clone(&state),
            Rc::clone(&state),
            Rc::clone(&state),
        );
        input.install(
            InputHooks::new(move |item: T| on_item.deliver(item))
                .on_start(move |input| {
                    if on_start.all_ready() {
                        input.resume();
                    } else {
                        input.suspend();
                    }
                })
                .on_end_of_stream(move || on_end.input_finished())
                .on_error(move |e| on_error.abort(e)),
        );
        Self { state }
    }

    pub fn input(&self) -> Rc<InputPort<T>> {
        Rc::clone(&self.state.input)
    }

    /// Add an output. Outputs are expected to be added before the input starts.
    pub fn new_output(&self) -> Rc<OutputPort<T>> {
        let index = self.state.outputs.borrow().len();
        let output = OutputPort::new(format!("splitter.out[{index}]"));
        let (on_resume, on_suspend, on_error) = (
            Rc::clone(&self.state),
            Rc::clone(&self.state),
            Rc::clone(&self.state),
        );
        output.install(
            OutputHooks::new()
                .on_resume(move || on_resume.output_resumed(index))
                .on_suspend(move || on_suspend.input.suspend())
                .on_error(move |e| on_error.abort(e)),
        );
        self.state.outputs.borrow_mut().push(Rc::clone(&output));
        self.state.pending.borrow_mut().push(None);
        if self.state.closed.get() {
            if let Some(e) = self.state.input.error() {
                output.close_with_error(e);
            }
        }
        output
    }
}

impl<T: Clone + 'static> Default for Splitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> SplitterState<T> {
    fn outputs(&self) -> Vec<Rc<OutputPort<T>>> {
        self.outputs.borrow().clone()
    }

    fn all_ready(&self) -> bool {
        self.outputs.borrow().iter().all(|o| o.is_ready())
            && self.pending.borrow().iter().all(Option::is_none)
    }

    fn deliver(&self, item: T) {
        for (index, output) in self.outputs().iter().enumerate() {
            if output.is_ready() {
                output.send(item.clone());
            } else if output.status().is_open() {
                self.pending.borrow_mut()[index] = Some(item.clone());
            }
        }
        if !self.all_ready() {
            self.input.suspend();
        }
    }

    fn output_resumed(&self, index: usize) {
        let held = self.pending.borrow_mut()[index].take();
        if let Some(item) = held {
            if let Some(output) = self.outputs.borrow().get(index).cloned() {
                output.send(item);
            }
        }
        if !self.all_ready() {
            return;
        }
        if self.input_ended.get() {
            self.finish();
        } else {
            self.input.resume();
        }
    }

    fn input_finished(&self) {
        self.input_ended.set(true);
        if self.pending.borrow().iter().all(Option::is_none) {
            self.finish();
        }
    }

    fn finish(&self) {
        for output in self.outputs() {
            output.end_of_stream();
        }
    }

    fn abort(&self, error: &StreamError) {
        if self.closed.replace(true) {
            return;
        }
        debug!(%error, "splitter aborted");
        self.pending.borrow_mut().iter_mut().for_each(|p| *p = None);
        self.input.close_with_error(error.clone());
        for output in self.outputs() {
            output.close_with_error(error.clone());
        }
    }
}
