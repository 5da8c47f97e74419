//! Forwarder: a transparent input/output pair.
//!
//! Either side can be wired first. Demand from the output is forwarded to the
//! input as soon as the input is bound; items are passed on without queuing.

use std::cell::Cell;
use std::rc::Rc;

use datastream_core::error::StreamError;
use datastream_core::port::{InputHooks, InputPort, OutputHooks, OutputPort};
use datastream_core::protocol::{StreamConsumer, StreamProducer};

pub struct Forwarder<T: 'static> {
    input: Rc<InputPort<T>>,
    output: Rc<OutputPort<T>>,
}

impl<T: 'static> Forwarder<T> {
    pub fn new() -> Self {
        let input = InputPort::new("forwarder.in");
        let output = OutputPort::new("forwarder.out");
        passthrough(
            &input,
            &output,
            |item, output| output.send(item),
            |output| output.end_of_stream(),
            |_| {},
        );
        Self { input, output }
    }

    pub fn input(&self) -> Rc<InputPort<T>> {
        Rc::clone(&self.input)
    }

    pub fn output(&self) -> Rc<OutputPort<T>> {
        Rc::clone(&self.output)
    }
}

impl<T: 'static> Default for Forwarder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the hooks of a one-in/one-out operator.
///
/// Output demand drives the input; the input starts suspended unless the
/// output is already ready. Errors from either side close the other side and
/// are reported once to `on_error`. `on_item` and `on_end` decide what reaches
/// the output.
pub(crate) fn passthrough<I, O>(
    input: &Rc<InputPort<I>>,
    output: &Rc<OutputPort<O>>,
    on_item: impl Fn(I, &OutputPort<O>) + 'static,
    on_end: impl Fn(&OutputPort<O>) + 'static,
    on_error: impl Fn(&StreamError) + 'static,
) where
    I: 'static,
    O: 'static,
{
    let reported = Rc::new(Cell::new(false));
    let on_error: Rc<dyn Fn(&StreamError)> = Rc::new(move |e: &StreamError| {
        if !reported.replace(true) {
            on_error(e);
        }
    });
    let input_error = Rc::clone(&on_error);
    let output_error = on_error;

    let (start_out, item_out, end_out, error_out) = (
        Rc::clone(output),
        Rc::clone(output),
        Rc::clone(output),
        Rc::clone(output),
    );
    input.install(
        InputHooks::new(move |item: I| on_item(item, &item_out))
            .on_start(move |input| {
                if start_out.is_ready() {
                    input.resume();
                } else {
                    input.suspend();
                }
            })
            .on_end_of_stream(move || on_end(&end_out))
            .on_error(move |e| {
                input_error(e);
                error_out.close_with_error(e.clone());
            }),
    );

    let (resume_in, suspend_in, error_in) = (Rc::clone(input), Rc::clone(input), Rc::clone(input));
    output.install(
        OutputHooks::new()
            .on_resume(move || resume_in.resume())
            .on_suspend(move || suspend_in.suspend())
            .on_error(move |e| {
                output_error(e);
                error_in.close_with_error(e.clone());
            }),
    );
}
