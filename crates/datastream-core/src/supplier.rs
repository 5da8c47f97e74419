//! Built-in sources.

use std::cell::RefCell;
use std::iter::Peekable;
use std::rc::Rc;

use crate::error::StreamError;
use crate::port::{OutputHooks, OutputPort};
use crate::protocol::StreamProducer;

/// What a source does once its items are exhausted.
enum Tail {
    End,
    Fail(StreamError),
}

/// Emits `items` in order, then ends.
pub fn of_iter<T, I>(items: I) -> Rc<OutputPort<T>>
where
    T: 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: 'static,
{
    source("of_iter", items.into_iter(), Tail::End)
}

/// A source that fails immediately with `error`.
pub fn closing_with_error<T: 'static>(error: StreamError) -> Rc<OutputPort<T>> {
    source("closing_with_error", std::iter::empty(), Tail::Fail(error))
}

/// Emits `items` in order, then closes with `error`.
pub fn of_iter_then_error<T, I>(items: I, error: StreamError) -> Rc<OutputPort<T>>
where
    T: 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: 'static,
{
    source("of_iter_then_error", items.into_iter(), Tail::Fail(error))
}

fn source<T, It>(name: &str, items: It, tail: Tail) -> Rc<OutputPort<T>>
where
    T: 'static,
    It: Iterator<Item = T> + 'static,
{
    let port = OutputPort::new(name);
    let state = Rc::new(IterSource {
        port: Rc::clone(&port),
        items: RefCell::new(items.peekable()),
        tail: RefCell::new(Some(tail)),
    });
    let on_bound = Rc::clone(&state);
    let on_resume = state;
    port.install(
        OutputHooks::new()
            .on_bound(move || on_bound.pump())
            .on_resume(move || on_resume.pump()),
    );
    port
}

struct IterSource<T: 'static, It: Iterator<Item = T>> {
    port: Rc<OutputPort<T>>,
    items: RefCell<Peekable<It>>,
    tail: RefCell<Option<Tail>>,
}

impl<T: 'static, It: Iterator<Item = T>> IterSource<T, It> {
    /// Emit while the consumer has demand; finish as soon as nothing is left,
    /// demand or not.
    fn pump(&self) {
        loop {
            let exhausted = self.items.borrow_mut().peek().is_none();
            if exhausted {
                self.finish();
                return;
            }
            if !self.port.is_ready() {
                return;
            }
            let next = self.items.borrow_mut().next();
            if let Some(item) = next {
                self.port.send(item);
            }
        }
    }

    fn finish(&self) {
        let tail = self.tail.borrow_mut().take();
        match tail {
            Some(Tail::End) => self.port.end_of_stream(),
            Some(Tail::Fail(e)) => self.port.close_with_error(e),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventloop::run_local;
    use crate::protocol::connect;
    use crate::sink::ToList;
    use crate::status::StreamStatus;

    #[test]
    fn emits_all_items_then_ends() {
        run_local(async {
            let src = of_iter(vec![1, 2, 3]);
            let sink = ToList::new();
            connect(&src, &sink.input());
            assert_eq!(sink.completion().await, Ok(()));
            assert_eq!(sink.items(), vec![1, 2, 3]);
            assert_eq!(src.status(), StreamStatus::EndOfStream);
        })
        .unwrap();
    }

    #[test]
    fn failing_source_delivers_items_before_error() {
        run_local(async {
            let src = of_iter_then_error(vec![1, 2], StreamError::upstream("broken"));
            let sink = ToList::new();
            connect(&src, &sink.input());
            assert_eq!(sink.completion().await, Err(StreamError::upstream("broken")));
            assert_eq!(sink.items(), vec![1, 2]);

            let src = closing_with_error::<u8>(StreamError::upstream("nothing"));
            let sink = ToList::new();
            connect(&src, &sink.input());
            assert_eq!(
                sink.completion().await,
                Err(StreamError::upstream("nothing"))
            );
            assert!(sink.items().is_empty());
        })
        .unwrap();
    }
}
