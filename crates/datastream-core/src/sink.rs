//! Built-in sinks.

use std::cell::RefCell;
use std::rc::Rc;

use crate::completion::Completion;
use crate::eventloop::post;
use crate::port::{InputHooks, InputPort};
use crate::protocol::StreamConsumer;
use crate::status::StreamStatus;

/// How a [`ToList`] throttles its producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuspendPolicy {
    #[default]
    Never,
    /// Suspend after every item and resume on the next loop turn.
    EveryItem,
}

/// Collects every received item.
pub struct ToList<T: 'static> {
    input: Rc<InputPort<T>>,
    items: Rc<RefCell<Vec<T>>>,
}

impl<T: 'static> ToList<T> {
    pub fn new() -> Self {
        Self::with_policy(SuspendPolicy::Never)
    }

    pub fn with_policy(policy: SuspendPolicy) -> Self {
        let input = InputPort::new("to_list");
        let items = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&items);
        let port = Rc::downgrade(&input);
        input.install(InputHooks::new(move |item: T| {
            sink.borrow_mut().push(item);
            if policy == SuspendPolicy::EveryItem {
                if let Some(port) = port.upgrade() {
                    port.suspend();
                    post(move || port.resume());
                }
            }
        }));
        Self { input, items }
    }

    pub fn input(&self) -> Rc<InputPort<T>> {
        Rc::clone(&self.input)
    }

    pub fn status(&self) -> StreamStatus {
        self.input.status()
    }

    pub fn completion(&self) -> Completion {
        self.input.completion()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.borrow_mut())
    }
}

impl<T: Clone + 'static> ToList<T> {
    pub fn items(&self) -> Vec<T> {
        self.items.borrow().clone()
    }
}

impl<T: 'static> Default for ToList<T> {
    fn default() -> Self {
        Self::new()
    }
}
