//! In-order release of out-of-order page completions.
//!
//! Results are parked in an arena indexed by page and released through a
//! monotonically advancing `next_expected` cursor. A fast late page waits in
//! its slot until every earlier page has been released; as soon as the gap
//! closes, the whole ready run is released without waiting for anything else.
//!
//! The sequencer is owned by exactly one task (the job driver), so it needs no
//! locking: concurrent completions reach it through the pool's channel.

use crate::page::PageResult;
use thiserror::Error;

/// A completion the sequencer refused to store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("page index {index} is out of range (document has {total} pages)")]
    OutOfRange { index: usize, total: usize },

    #[error("page index {index} was already delivered")]
    Duplicate { index: usize },
}

#[derive(Debug)]
pub struct Sequencer {
    slots: Vec<Option<PageResult>>,
    next_expected: usize,
    buffered: usize,
}

impl Sequencer {
    pub fn new(total_pages: usize) -> Self {
        Self {
            slots: (0..total_pages).map(|_| None).collect(),
            next_expected: 0,
            buffered: 0,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.slots.len()
    }

    /// Number of results already released, which is also the index of the
    /// next result to release.
    pub fn next_expected(&self) -> usize {
        self.next_expected
    }

    /// Results stored but not yet released.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn is_done(&self) -> bool {
        self.next_expected == self.slots.len()
    }

    /// Park a terminal result in its slot.
    pub fn insert(&mut self, result: PageResult) -> Result<(), SequenceError> {
        let index = result.index;
        let total = self.slots.len();
        if index >= total {
            return Err(SequenceError::OutOfRange { index, total });
        }
        if index < self.next_expected || self.slots[index].is_some() {
            return Err(SequenceError::Duplicate { index });
        }
        self.slots[index] = Some(result);
        self.buffered += 1;
        Ok(())
    }

    /// Release the result at the cursor if it has arrived, advancing the
    /// cursor. Call in a loop after each insert to drain the ready run.
    pub fn pop_ready(&mut self) -> Option<PageResult> {
        let ready = self.slots.get_mut(self.next_expected)?.take()?;
        self.next_expected += 1;
        self.buffered -= 1;
        Some(ready)
    }
}
