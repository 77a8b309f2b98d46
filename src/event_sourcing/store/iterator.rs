use crate::event_sourcing::core::{decode_event, Event, EventStoreError, Item, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    NotStarted,
    At(usize),
    Exhausted,
}

/// Forward-only cursor over fetched records. Records are decoded on `value()`.
#[derive(Debug)]
pub struct ResultIterator {
    items: Vec<Item>,
    cursor: Cursor,
}

impl ResultIterator {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            cursor: Cursor::NotStarted,
        }
    }

    /// Advance; returns whether a record is now available.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        let candidate = match self.cursor {
            Cursor::NotStarted => 0,
            Cursor::At(index) => index + 1,
            Cursor::Exhausted => return false,
        };

        if candidate < self.items.len() {
            self.cursor = Cursor::At(candidate);
            true
        } else {
            self.cursor = Cursor::Exhausted;
            false
        }
    }

    pub fn value(&self) -> Result<Event> {
        match self.cursor {
            Cursor::At(index) => Ok(decode_event(&self.items[index])?),
            Cursor::NotStarted | Cursor::Exhausted => Err(EventStoreError::OutOfBounds),
        }
    }

    /// Drop the held records. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.items = Vec::new();
        self.cursor = Cursor::Exhausted;
    }

    /// Number of records fetched, regardless of position.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain the remaining records into events and close the iterator.
    pub fn collect_events(mut self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        while self.next() {
            events.push(self.value()?);
        }
        self.close();
        Ok(events)
    }
}
