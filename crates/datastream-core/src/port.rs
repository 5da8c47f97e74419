//! Reusable producer and consumer endpoints.
//!
//! Operators own ports instead of implementing the protocol themselves. A port
//! enforces the state machine and the push rules; the owning operator reacts
//! through hooks installed once after construction. Hooks are released when
//! the port reaches a terminal state, which also breaks the
//! port → hooks → operator → port reference cycle.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::completion::{Completion, CompletionCell};
use crate::error::StreamError;
use crate::eventloop::post;
use crate::protocol::{Receiver, StreamConsumer, StreamProducer};
use crate::status::StreamStatus;

/// Reactions of the operator owning an [`OutputPort`].
pub struct OutputHooks {
    on_bound: Box<dyn Fn()>,
    on_resume: Box<dyn Fn()>,
    on_suspend: Box<dyn Fn()>,
    on_error: Box<dyn Fn(&StreamError)>,
}

impl OutputHooks {
    pub fn new() -> Self {
        Self {
            on_bound: Box::new(|| {}),
            on_resume: Box::new(|| {}),
            on_suspend: Box::new(|| {}),
            on_error: Box::new(|_| {}),
        }
    }

    /// Runs on the loop turn after a consumer is bound.
    pub fn on_bound(mut self, f: impl Fn() + 'static) -> Self {
        self.on_bound = Box::new(f);
        self
    }

    /// Runs on the loop turn after the consumer resumed; the port is ready.
    pub fn on_resume(mut self, f: impl Fn() + 'static) -> Self {
        self.on_resume = Box::new(f);
        self
    }

    pub fn on_suspend(mut self, f: impl Fn() + 'static) -> Self {
        self.on_suspend = Box::new(f);
        self
    }

    /// Runs once when the port is closed with an error, from either side.
    pub fn on_error(mut self, f: impl Fn(&StreamError) + 'static) -> Self {
        self.on_error = Box::new(f);
        self
    }
}

impl Default for OutputHooks {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer endpoint.
pub struct OutputPort<T: 'static> {
    name: String,
    this: Weak<OutputPort<T>>,
    status: Cell<StreamStatus>,
    error: RefCell<Option<StreamError>>,
    consumer: RefCell<Option<Rc<dyn StreamConsumer<T>>>>,
    receiver: RefCell<Option<Rc<dyn Receiver<T>>>>,
    hooks: RefCell<Option<Rc<OutputHooks>>>,
    completion: CompletionCell,
}

impl<T: 'static> OutputPort<T> {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        let name = name.into();
        Rc::new_cyclic(|this| OutputPort {
            name,
            this: this.clone(),
            status: Cell::new(StreamStatus::Active),
            error: RefCell::new(None),
            consumer: RefCell::new(None),
            receiver: RefCell::new(None),
            hooks: RefCell::new(None),
            completion: CompletionCell::new(),
        })
    }

    pub fn install(&self, hooks: OutputHooks) {
        if self.status.get().is_open() {
            *self.hooks.borrow_mut() = Some(Rc::new(hooks));
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Active` with a receiver installed: the only state in which `send` is legal.
    pub fn is_ready(&self) -> bool {
        self.status.get() == StreamStatus::Active && self.receiver.borrow().is_some()
    }

    pub fn is_bound(&self) -> bool {
        self.consumer.borrow().is_some()
    }

    /// Push one item to the consumer's receiver.
    ///
    /// Pushing while not ready closes the port with a protocol violation;
    /// pushing after a terminal transition is silently dropped.
    pub fn send(&self, item: T) {
        let status = self.status.get();
        if status.is_terminal() {
            trace!(port = %self.name, %status, "dropping item pushed after close");
            return;
        }
        let receiver = match status {
            StreamStatus::Active => self.receiver.borrow().clone(),
            _ => None,
        };
        match receiver {
            Some(receiver) => receiver.accept(item),
            None => {
                warn!(port = %self.name, %status, "item pushed without demand");
                self.close_with_error(StreamError::ProtocolViolation(format!(
                    "{}: item pushed while {} without a receiver",
                    self.name, status
                )));
            }
        }
    }

    pub fn end_of_stream(&self) {
        if self.status.get().is_terminal() {
            return;
        }
        self.status.set(StreamStatus::EndOfStream);
        let (consumer, _hooks) = self.detach();
        debug!(port = %self.name, "end of stream");
        if let Some(consumer) = consumer {
            consumer.end_of_stream();
        }
        self.completion.complete(Ok(()));
    }

    fn detach(&self) -> (Option<Rc<dyn StreamConsumer<T>>>, Option<Rc<OutputHooks>>) {
        self.receiver.borrow_mut().take();
        let hooks = self.hooks.borrow_mut().take();
        let consumer = self.consumer.borrow_mut().take();
        (consumer, hooks)
    }

    fn hooks(&self) -> Option<Rc<OutputHooks>> {
        self.hooks.borrow().clone()
    }

    fn fire_bound(&self) {
        if self.status.get().is_open() {
            if let Some(hooks) = self.hooks() {
                (hooks.on_bound)();
            }
        }
    }

    fn fire_resume(&self) {
        if self.is_ready() {
            if let Some(hooks) = self.hooks() {
                (hooks.on_resume)();
            }
        }
    }
}

impl<T: 'static> StreamProducer<T> for OutputPort<T> {
    fn set_consumer(&self, consumer: Rc<dyn StreamConsumer<T>>) {
        if self.status.get().is_terminal() {
            let error = self.error.borrow().clone();
            post(move || match error {
                Some(e) => consumer.close_with_error(e),
                None => consumer.end_of_stream(),
            });
            return;
        }
        if self.is_bound() {
            warn!(port = %self.name, "producer bound twice");
            self.close_with_error(StreamError::ProtocolViolation(format!(
                "{}: producer is already bound",
                self.name
            )));
            self.set_consumer(consumer);
            return;
        }
        *self.consumer.borrow_mut() = Some(consumer);
        let this = self.this.clone();
        post(move || {
            if let Some(port) = this.upgrade() {
                port.fire_bound();
            }
        });
    }

    fn status(&self) -> StreamStatus {
        self.status.get()
    }

    fn error(&self) -> Option<StreamError> {
        self.error.borrow().clone()
    }

    fn resume(&self, receiver: Rc<dyn Receiver<T>>) {
        if self.status.get().is_terminal() {
            return;
        }
        let was_ready = self.is_ready();
        *self.receiver.borrow_mut() = Some(receiver);
        self.status.set(StreamStatus::Active);
        if !was_ready {
            let this = self.this.clone();
            post(move || {
                if let Some(port) = this.upgrade() {
                    port.fire_resume();
                }
            });
        }
    }

    fn suspend(&self) {
        if self.status.get() != StreamStatus::Active {
            return;
        }
        self.status.set(StreamStatus::Suspended);
        if let Some(hooks) = self.hooks() {
            (hooks.on_suspend)();
        }
    }

    fn close_with_error(&self, error: StreamError) {
        if self.status.get().is_terminal() {
            return;
        }
        self.status.set(StreamStatus::ClosedWithError);
        *self.error.borrow_mut() = Some(error.clone());
        let (consumer, hooks) = self.detach();
        debug!(port = %self.name, %error, "closed with error");
        if let Some(hooks) = hooks {
            (hooks.on_error)(&error);
        }
        if let Some(consumer) = consumer {
            consumer.close_with_error(error.clone());
        }
        self.completion.complete(Err(error));
    }

    fn completion(&self) -> Completion {
        self.completion.completion()
    }

    fn into_dyn(self: Rc<Self>) -> Rc<dyn StreamProducer<T>> {
        self
    }
}

/// Reactions of the operator owning an [`InputPort`].
pub struct InputHooks<T: 'static> {
    receiver: Rc<dyn Receiver<T>>,
    on_start: Option<Box<dyn Fn(&InputPort<T>)>>,
    on_end_of_stream: Box<dyn Fn()>,
    on_error: Box<dyn Fn(&StreamError)>,
}

impl<T: 'static> InputHooks<T> {
    pub fn new(receiver: impl Receiver<T> + 'static) -> Self {
        Self::with_receiver(Rc::new(receiver))
    }

    pub fn with_receiver(receiver: Rc<dyn Receiver<T>>) -> Self {
        Self {
            receiver,
            on_start: None,
            on_end_of_stream: Box::new(|| {}),
            on_error: Box::new(|_| {}),
        }
    }

    /// Replaces the default start behavior (resume immediately).
    pub fn on_start(mut self, f: impl Fn(&InputPort<T>) + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_end_of_stream(mut self, f: impl Fn() + 'static) -> Self {
        self.on_end_of_stream = Box::new(f);
        self
    }

    /// Runs once when the port is closed with an error, from either side.
    pub fn on_error(mut self, f: impl Fn(&StreamError) + 'static) -> Self {
        self.on_error = Box::new(f);
        self
    }
}

/// Consumer endpoint.
pub struct InputPort<T: 'static> {
    name: String,
    status: Cell<StreamStatus>,
    error: RefCell<Option<StreamError>>,
    producer: RefCell<Option<Rc<dyn StreamProducer<T>>>>,
    receiver: RefCell<Option<Rc<dyn Receiver<T>>>>,
    hooks: RefCell<Option<Rc<InputHooks<T>>>>,
    completion: CompletionCell,
}

impl<T: 'static> InputPort<T> {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(InputPort {
            name: name.into(),
            status: Cell::new(StreamStatus::Active),
            error: RefCell::new(None),
            producer: RefCell::new(None),
            receiver: RefCell::new(None),
            hooks: RefCell::new(None),
            completion: CompletionCell::new(),
        })
    }

    pub fn install(&self, hooks: InputHooks<T>) {
        if self.status.get().is_open() {
            *self.receiver.borrow_mut() = Some(Rc::clone(&hooks.receiver));
            *self.hooks.borrow_mut() = Some(Rc::new(hooks));
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_bound(&self) -> bool {
        self.producer.borrow().is_some()
    }

    /// Request items. Before binding this only records the demand; the start
    /// hook decides what to do with it.
    pub fn resume(&self) {
        if self.status.get().is_terminal() {
            return;
        }
        self.status.set(StreamStatus::Active);
        let producer = self.producer.borrow().clone();
        let receiver = self.receiver.borrow().clone();
        if let (Some(producer), Some(receiver)) = (producer, receiver) {
            producer.resume(receiver);
        }
    }

    pub fn suspend(&self) {
        if self.status.get() != StreamStatus::Active {
            return;
        }
        self.status.set(StreamStatus::Suspended);
        let producer = self.producer.borrow().clone();
        if let Some(producer) = producer {
            producer.suspend();
        }
    }

    /// Route subsequent items to `receiver` instead of the installed one.
    pub fn redirect(&self, receiver: Rc<dyn Receiver<T>>) {
        if self.status.get().is_terminal() {
            return;
        }
        *self.receiver.borrow_mut() = Some(Rc::clone(&receiver));
        if self.status.get() == StreamStatus::Active {
            let producer = self.producer.borrow().clone();
            if let Some(producer) = producer {
                producer.resume(receiver);
            }
        }
    }

    fn detach(&self) -> (Option<Rc<dyn StreamProducer<T>>>, Option<Rc<InputHooks<T>>>) {
        self.receiver.borrow_mut().take();
        let hooks = self.hooks.borrow_mut().take();
        let producer = self.producer.borrow_mut().take();
        (producer, hooks)
    }
}

impl<T: 'static> StreamConsumer<T> for InputPort<T> {
    fn set_producer(&self, producer: Rc<dyn StreamProducer<T>>) {
        if self.is_bound() {
            warn!(port = %self.name, "consumer bound twice");
            producer.close_with_error(StreamError::ProtocolViolation(format!(
                "{}: consumer is already bound",
                self.name
            )));
            return;
        }
        match self.status.get() {
            StreamStatus::ClosedWithError => {
                if let Some(error) = self.error.borrow().clone() {
                    producer.close_with_error(error);
                }
                return;
            }
            StreamStatus::EndOfStream => return,
            _ => {}
        }
        *self.producer.borrow_mut() = Some(producer);
        let hooks = self.hooks.borrow().clone();
        match hooks.as_ref().and_then(|h| h.on_start.as_ref()) {
            Some(on_start) => on_start(self),
            None => self.resume(),
        }
    }

    fn status(&self) -> StreamStatus {
        self.status.get()
    }

    fn error(&self) -> Option<StreamError> {
        self.error.borrow().clone()
    }

    fn end_of_stream(&self) {
        if self.status.get().is_terminal() {
            return;
        }
        self.status.set(StreamStatus::EndOfStream);
        let (_producer, hooks) = self.detach();
        debug!(port = %self.name, "input reached end of stream");
        if let Some(hooks) = hooks {
            (hooks.on_end_of_stream)();
        }
        self.completion.complete(Ok(()));
    }

    fn close_with_error(&self, error: StreamError) {
        if self.status.get().is_terminal() {
            return;
        }
        self.status.set(StreamStatus::ClosedWithError);
        *self.error.borrow_mut() = Some(error.clone());
        let (producer, hooks) = self.detach();
        debug!(port = %self.name, %error, "input closed with error");
        if let Some(producer) = producer {
            producer.close_with_error(error.clone());
        }
        if let Some(hooks) = hooks {
            (hooks.on_error)(&error);
        }
        self.completion.complete(Err(error));
    }

    fn completion(&self) -> Completion {
        self.completion.completion()
    }

    fn into_dyn(self: Rc<Self>) -> Rc<dyn StreamConsumer<T>> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventloop::run_local;
    use crate::protocol::connect;
    use tokio::task::yield_now;

    async fn settle() {
        for _ in 0..8 {
            yield_now().await;
        }
    }

    fn collecting_input(log: &Rc<RefCell<Vec<u32>>>) -> Rc<InputPort<u32>> {
        let input = InputPort::new("in");
        let log = Rc::clone(log);
        input.install(InputHooks::new(move |x: u32| log.borrow_mut().push(x)));
        input
    }

    #[test]
    fn push_without_demand_is_a_violation() {
        run_local(async {
            let out = OutputPort::<u32>::new("out");
            out.send(1);
            assert_eq!(out.status(), StreamStatus::ClosedWithError);
            assert!(matches!(
                out.error(),
                Some(StreamError::ProtocolViolation(_))
            ));
        })
        .unwrap();
    }

    #[test]
    fn push_while_suspended_closes_both_sides() {
        run_local(async {
            let log = Rc::new(RefCell::new(Vec::new()));
            let out = OutputPort::<u32>::new("out");
            let input = collecting_input(&log);
            connect(&out, &input);
            assert!(out.is_ready());
            out.send(1);
            input.suspend();
            out.send(2);
            assert_eq!(*log.borrow(), vec![1]);
            assert_eq!(input.status(), StreamStatus::ClosedWithError);
            assert!(matches!(
                input.completion().await,
                Err(StreamError::ProtocolViolation(_))
            ));
        })
        .unwrap();
    }

    #[test]
    fn first_error_wins_and_terminal_is_sticky() {
        run_local(async {
            let log = Rc::new(RefCell::new(Vec::new()));
            let out = OutputPort::<u32>::new("out");
            let input = collecting_input(&log);
            connect(&out, &input);
            input.close_with_error(StreamError::downstream("first"));
            out.close_with_error(StreamError::upstream("second"));
            out.end_of_stream();
            out.send(7);
            assert_eq!(out.error(), Some(StreamError::downstream("first")));
            assert_eq!(input.error(), Some(StreamError::downstream("first")));
            assert_eq!(out.status(), StreamStatus::ClosedWithError);
            assert!(log.borrow().is_empty());
        })
        .unwrap();
    }

    #[test]
    fn resume_is_posted_and_idempotent() {
        run_local(async {
            let resumes = Rc::new(Cell::new(0));
            let out = OutputPort::<u32>::new("out");
            let r = Rc::clone(&resumes);
            out.install(OutputHooks::new().on_resume(move || r.set(r.get() + 1)));
            let log = Rc::new(RefCell::new(Vec::new()));
            let input = collecting_input(&log);
            connect(&out, &input);
            input.resume();
            assert_eq!(resumes.get(), 0);
            settle().await;
            assert_eq!(resumes.get(), 1);
        })
        .unwrap();
    }

    #[test]
    fn binding_to_terminal_producer_replays_status() {
        run_local(async {
            let out = OutputPort::<u32>::new("out");
            out.close_with_error(StreamError::upstream("gone"));
            let log = Rc::new(RefCell::new(Vec::new()));
            let input = collecting_input(&log);
            connect(&out, &input);
            assert_eq!(input.completion().await, Err(StreamError::upstream("gone")));

            let ended = OutputPort::<u32>::new("ended");
            ended.end_of_stream();
            let input = collecting_input(&log);
            connect(&ended, &input);
            assert_eq!(input.completion().await, Ok(()));
        })
        .unwrap();
    }

    #[test]
    fn redirect_swaps_receiver() {
        run_local(async {
            let first = Rc::new(RefCell::new(Vec::new()));
            let second = Rc::new(RefCell::new(Vec::new()));
            let out = OutputPort::<u32>::new("out");
            let input = collecting_input(&first);
            connect(&out, &input);
            out.send(1);
            let s = Rc::clone(&second);
            input.redirect(Rc::new(move |x: u32| s.borrow_mut().push(x)));
            out.send(2);
            out.end_of_stream();
            assert_eq!(*first.borrow(), vec![1]);
            assert_eq!(*second.borrow(), vec![2]);
            assert_eq!(input.status(), StreamStatus::EndOfStream);
        })
        .unwrap();
    }
}
