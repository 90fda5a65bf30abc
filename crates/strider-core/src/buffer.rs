use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::CrawlerError;
use crate::sync::lock;

/// Why [`Buffer::try_put`] handed its datum back.
#[derive(Debug, PartialEq, Eq)]
pub enum Rejected<T> {
    Full(T),
    Closed(T),
}

impl<T> Rejected<T> {
    pub fn into_inner(self) -> T {
        match self {
            Rejected::Full(datum) | Rejected::Closed(datum) => datum,
        }
    }
}

/// Fixed-capacity FIFO with non-blocking access.
#[derive(Debug)]
pub struct Buffer<T> {
    cap: usize,
    inner: Mutex<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
}

impl<T> Buffer<T> {
    pub fn new(cap: u32) -> Result<Self, CrawlerError> {
        if cap == 0 {
            return Err(CrawlerError::illegal_parameter(
                "illegal size for buffer: 0",
            ));
        }
        Ok(Self::with_capacity(cap as usize))
    }

    /// `cap` must be non-zero.
    pub(crate) fn with_capacity(cap: usize) -> Self {
        Self {
            cap,
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(cap),
                closed: false,
            }),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn try_put(&self, datum: T) -> Result<(), Rejected<T>> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(Rejected::Closed(datum));
        }
        if inner.queue.len() >= self.cap {
            return Err(Rejected::Full(datum));
        }
        inner.queue.push_back(datum);
        Ok(())
    }

    /// `Ok(None)` when empty, [`CrawlerError::ClosedBuffer`] once closed.
    pub fn try_get(&self) -> Result<Option<T>, CrawlerError> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(CrawlerError::ClosedBuffer);
        }
        Ok(inner.queue.pop_front())
    }

    /// Closes the buffer and drops anything still in it. Returns false if
    /// it was already closed.
    pub fn close(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return false;
        }
        inner.closed = true;
        inner.queue.clear();
        true
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }
}
