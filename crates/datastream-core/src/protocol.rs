//! The producer/consumer contract.
//!
//! A producer pushes items into the [`Receiver`] handed to it by the latest
//! `resume`, and only while it is `Active`. A consumer controls the flow with
//! `suspend`/`resume` on its producer. Either side may close the link with an
//! error; the close reaches the other side synchronously.

use std::rc::Rc;

use crate::completion::Completion;
use crate::error::StreamError;
use crate::status::StreamStatus;

/// Per-item sink a producer pushes into.
pub trait Receiver<T> {
    fn accept(&self, item: T);
}

impl<T, F> Receiver<T> for F
where
    F: Fn(T),
{
    fn accept(&self, item: T) {
        self(item)
    }
}

pub trait StreamProducer<T: 'static> {
    /// Bind the downstream consumer. Binding to an already terminal producer
    /// replays the terminal status to the consumer on a later loop turn.
    fn set_consumer(&self, consumer: Rc<dyn StreamConsumer<T>>);

    fn status(&self) -> StreamStatus;

    fn error(&self) -> Option<StreamError>;

    /// Allow emission into `receiver`. Emission restarts on a later loop turn.
    fn resume(&self, receiver: Rc<dyn Receiver<T>>);

    fn suspend(&self);

    fn close_with_error(&self, error: StreamError);

    fn completion(&self) -> Completion;

    fn into_dyn(self: Rc<Self>) -> Rc<dyn StreamProducer<T>>;
}

pub trait StreamConsumer<T: 'static> {
    /// Bind the upstream producer and run the consumer's start hook.
    fn set_producer(&self, producer: Rc<dyn StreamProducer<T>>);

    fn status(&self) -> StreamStatus;

    fn error(&self) -> Option<StreamError>;

    fn end_of_stream(&self);

    fn close_with_error(&self, error: StreamError);

    fn completion(&self) -> Completion;

    fn into_dyn(self: Rc<Self>) -> Rc<dyn StreamConsumer<T>>;
}

/// Wire `producer` to `consumer`.
pub fn connect<T, P, C>(producer: &Rc<P>, consumer: &Rc<C>)
where
    T: 'static,
    P: StreamProducer<T> + ?Sized,
    C: StreamConsumer<T> + ?Sized,
{
    producer.set_consumer(Rc::clone(consumer).into_dyn());
    consumer.set_producer(Rc::clone(producer).into_dyn());
}
