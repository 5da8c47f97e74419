//! Decorator: a pass-through with interceptors.
//!
//! The item interceptor decides per item whether to forward it (possibly
//! transformed), drop it, or fail the stream through its [`DecoratorContext`].
//! It must forward at most one item per received item, since the decorator
//! keeps no queue.

use std::rc::Rc;

use datastream_core::error::StreamError;
use datastream_core::port::{InputPort, OutputPort};
use datastream_core::protocol::StreamProducer;

use crate::forwarder::passthrough;

/// What an interceptor can do with the downstream side.
pub struct DecoratorContext<'a, O: 'static> {
    output: &'a OutputPort<O>,
}

impl<'a, O: 'static> DecoratorContext<'a, O> {
    pub fn send(&self, item: O) {
        self.output.send(item);
    }

    /// Close the stream in both directions.
    pub fn close_with_error(&self, error: StreamError) {
        self.output.close_with_error(error);
    }

    pub fn is_ready(&self) -> bool {
        self.output.is_ready()
    }
}

type ItemHook<I, O> = Box<dyn Fn(&DecoratorContext<'_, O>, I)>;
type EndHook<O> = Box<dyn Fn(&DecoratorContext<'_, O>)>;
type ErrorHook = Box<dyn Fn(&StreamError)>;

pub struct DecoratorBuilder<I: 'static, O: 'static> {
    on_item: ItemHook<I, O>,
    on_end_of_stream: Option<EndHook<O>>,
    on_error: Option<ErrorHook>,
}

impl<I: 'static, O: 'static> DecoratorBuilder<I, O> {
    /// Runs before end-of-stream is forwarded; may still send one item or fail.
    pub fn on_end_of_stream(mut self, f: impl Fn(&DecoratorContext<'_, O>) + 'static) -> Self {
        self.on_end_of_stream = Some(Box::new(f));
        self
    }

    /// Observes the error closing the decorator, from either side.
    pub fn on_error(mut self, f: impl Fn(&StreamError) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Decorator<I, O> {
        let input = InputPort::new("decorator.in");
        let output = OutputPort::new("decorator.out");
        let DecoratorBuilder {
            on_item,
            on_end_of_stream,
            on_error,
        } = self;

        passthrough(
            &input,
            &output,
            move |item, output| on_item(&DecoratorContext { output }, item),
            move |output| {
                if let Some(hook) = &on_end_of_stream {
                    hook(&DecoratorContext { output });
                }
                output.end_of_stream();
            },
            move |e| {
                if let Some(hook) = &on_error {
                    hook(e);
                }
            },
        );

        Decorator { input, output }
    }
}

pub struct Decorator<I: 'static, O: 'static> {
    input: Rc<InputPort<I>>,
    output: Rc<OutputPort<O>>,
}

impl<I: 'static, O: 'static> Decorator<I, O> {
    pub fn builder(on_item: impl Fn(&DecoratorContext<'_, O>, I) + 'static) -> DecoratorBuilder<I, O> {
        DecoratorBuilder {
            on_item: Box::new(on_item),
            on_end_of_stream: None,
            on_error: None,
        }
    }

    /// Forward `f(item)` for every item.
    pub fn map(f: impl Fn(I) -> O + 'static) -> Self {
        Self::builder(move |ctx, item| ctx.send(f(item))).build()
    }

    pub fn input(&self) -> Rc<InputPort<I>> {
        Rc::clone(&self.input)
    }

    pub fn output(&self) -> Rc<OutputPort<O>> {
        Rc::clone(&self.output)
    }
}

impl<T: 'static> Decorator<T, T> {
    /// Forward only items matching `predicate`.
    pub fn filter(predicate: impl Fn(&T) -> bool + 'static) -> Self {
        Self::builder(move |ctx, item| {
            if predicate(&item) {
                ctx.send(item);
            }
        })
        .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use datastream_core::eventloop::run_local;
    use datastream_core::protocol::connect;
    use datastream_core::sink::ToList;
    use datastream_core::supplier::of_iter;

    #[test]
    fn map_and_filter() {
        run_local(async {
            let evens = Decorator::filter(|x: &u32| x % 2 == 0);
            let labels = Decorator::map(|x: u32| format!("#{x}"));
            let sink = ToList::new();
            connect(&of_iter(0..7u32), &evens.input());
            connect(&evens.output(), &labels.input());
            connect(&labels.output(), &sink.input());
            sink.completion().await.unwrap();
            assert_eq!(sink.items(), vec!["#0", "#2", "#4", "#6"]);
        })
        .unwrap();
    }

    #[test]
    fn interceptor_can_fail_the_stream() {
        run_local(async {
            let seen = Rc::new(RefCell::new(None));
            let s = Rc::clone(&seen);
            let guard = Decorator::<i32, i32>::builder(|ctx, x| {
                if x < 0 {
                    ctx.close_with_error(StreamError::upstream(format!("negative: {x}")));
                } else {
                    ctx.send(x);
                }
            })
            .on_error(move |e| *s.borrow_mut() = Some(e.clone()))
            .build();
            let src = of_iter(vec![1, 2, -3, 4]);
            let sink = ToList::new();
            connect(&src, &guard.input());
            connect(&guard.output(), &sink.input());

            let err = StreamError::upstream("negative: -3");
            assert_eq!(sink.completion().await, Err(err.clone()));
            assert_eq!(src.completion().await, Err(err.clone()));
            assert_eq!(sink.items(), vec![1, 2]);
            assert_eq!(*seen.borrow(), Some(err));
        })
        .unwrap();
    }

    #[test]
    fn end_of_stream_interceptor_can_append() {
        run_local(async {
            let trailer = Decorator::<i32, i32>::builder(|ctx, x| ctx.send(x))
                .on_end_of_stream(|ctx| {
                    if ctx.is_ready() {
                        ctx.send(-1);
                    }
                })
                .build();
            let sink = ToList::new();
            connect(&of_iter(vec![1, 2]), &trailer.input());
            connect(&trailer.output(), &sink.input());
            sink.completion().await.unwrap();
            assert_eq!(sink.items(), vec![1, 2, -1]);
        })
        .unwrap();
    }
}
