//! Union: items of every input forwarded to one output, in arrival order.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use datastream_core::error::StreamError;
use datastream_core::port::{InputHooks, InputPort, OutputHooks, OutputPort};
use datastream_core::protocol::{StreamConsumer, StreamProducer};
use tracing::debug;

pub struct Union<T: 'static> {
    state: Rc<UnionState<T>>,
}

struct UnionState<T: 'static> {
    inputs: RefCell<Vec<Rc<InputPort<T>>>>,
    output: Rc<OutputPort<T>>,
    ended: Cell<usize>,
    closed: Cell<bool>,
}

impl<T: 'static> Union<T> {
    pub fn new() -> Self {
        let output = OutputPort::new("union.out");
        let state = Rc::new(UnionState {
            inputs: RefCell::new(Vec::new()),
            output: Rc::clone(&output),
            ended: Cell::new(0),
            closed: Cell::new(false),
        });
        let (on_bound, on_resume, on_suspend, on_error) = (
            Rc::clone(&state),
            Rc::clone(&state),
            Rc::clone(&state),
            Rc::clone(&state),
        );
        output.install(
            OutputHooks::new()
                .on_bound(move || on_bound.start())
                .on_resume(move || on_resume.resume_all())
                .on_suspend(move || on_suspend.suspend_all())
                .on_error(move |e| on_error.abort(e)),
        );
        Self { state }
    }

    /// Add an input. Inputs must be added before the output is connected.
    pub fn new_input(&self) -> Rc<InputPort<T>> {
        let index = self.state.inputs.borrow().len();
        let input = InputPort::new(format!("union.in[{index}]"));
        if self.state.output.is_bound() || self.state.output.status().is_terminal() {
            input.close_with_error(StreamError::ProtocolViolation(
                "union: input added after the output was connected".into(),
            ));
            return input;
        }
        let out = Rc::clone(&self.state.output);
        let (on_start, on_end, on_error) = (
            Rc::clone(&self.state),
            Rc::clone(&self.state),
            Rc::clone(&self.state),
        );
        input.install(
            InputHooks::new(move |item: T| out.send(item))
                .on_start(move |input| {
                    if on_start.output.is_ready() {
                        input.resume();
                    } else {
                        input.suspend();
                    }
                })
                .on_end_of_stream(move || on_end.input_finished())
                .on_error(move |e| on_error.abort(e)),
        );
        self.state.inputs.borrow_mut().push(Rc::clone(&input));
        input
    }

    pub fn output(&self) -> Rc<OutputPort<T>> {
        Rc::clone(&self.state.output)
    }
}

impl<T: 'static> Default for Union<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> UnionState<T> {
    fn inputs(&self) -> Vec<Rc<InputPort<T>>> {
        self.inputs.borrow().clone()
    }

    fn start(&self) {
        if self.ended.get() == self.inputs.borrow().len() {
            self.output.end_of_stream();
        }
    }

    fn resume_all(&self) {
        for input in self.inputs() {
            input.resume();
        }
    }

    fn suspend_all(&self) {
        for input in self.inputs() {
            input.suspend();
        }
    }

    fn input_finished(&self) {
        let ended = self.ended.get() + 1;
        self.ended.set(ended);
        if self.output.is_bound() && ended == self.inputs.borrow().len() {
            self.output.end_of_stream();
        }
    }

    fn abort(&self, error: &StreamError) {
        if self.closed.replace(true) {
            return;
        }
        debug!(%error, "union aborted");
        self.output.close_with_error(error.clone());
        for input in self.inputs() {
            input.close_with_error(error.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastream_core::eventloop::run_local;
    use datastream_core::protocol::connect;
    use datastream_core::sink::{SuspendPolicy, ToList};
    use datastream_core::supplier::{of_iter, of_iter_then_error};

    #[test]
    fn forwards_every_input_and_ends_after_the_last() {
        run_local(async {
            let union = Union::new();
            connect(&of_iter(vec![1, 2, 3]), &union.new_input());
            connect(&of_iter(vec![10, 20]), &union.new_input());
            connect(&of_iter(Vec::new()), &union.new_input());
            let sink = ToList::with_policy(SuspendPolicy::EveryItem);
            connect(&union.output(), &sink.input());
            sink.completion().await.unwrap();

            let mut items = sink.items();
            items.sort_unstable();
            assert_eq!(items, vec![1, 2, 3, 10, 20]);
        })
        .unwrap();
    }

    #[test]
    fn no_inputs_ends_immediately() {
        run_local(async {
            let union = Union::<u8>::new();
            let sink = ToList::new();
            connect(&union.output(), &sink.input());
            assert_eq!(sink.completion().await, Ok(()));
            assert!(sink.is_empty());
        })
        .unwrap();
    }

    #[test]
    fn failing_input_closes_everything() {
        run_local(async {
            let union = Union::new();
            // Bound but silent: it can only end through the union.
            let healthy = OutputPort::<i32>::new("healthy");
            connect(&healthy, &union.new_input());
            connect(
                &of_iter_then_error(vec![1], StreamError::upstream("bad input")),
                &union.new_input(),
            );
            let sink = ToList::new();
            connect(&union.output(), &sink.input());

            let err = Err(StreamError::upstream("bad input"));
            assert_eq!(sink.completion().await, err);
            assert_eq!(healthy.completion().await, err);
            assert_eq!(sink.items(), vec![1]);
        })
        .unwrap();
    }

    #[test]
    fn ended_inputs_do_not_end_an_unconnected_output() {
        let out = run_local(async {
            let union = Union::new();
            let empty = of_iter(Vec::<i32>::new());
            connect(&empty, &union.new_input());
            empty.completion().await.unwrap();

            let joined = union.new_input();
            assert!(joined.status().is_open());
            connect(&of_iter(vec![1, 2]), &joined);
            let sink = ToList::new();
            connect(&union.output(), &sink.input());
            sink.completion().await.unwrap();
            sink.take()
        })
        .unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn late_input_is_rejected() {
        run_local(async {
            let union = Union::new();
            connect(&of_iter(vec![1]), &union.new_input());
            let sink = ToList::new();
            connect(&union.output(), &sink.input());
            sink.completion().await.unwrap();

            let late = union.new_input();
            assert!(matches!(
                late.completion().await,
                Err(StreamError::ProtocolViolation(_))
            ));
        })
        .unwrap();
    }
}
