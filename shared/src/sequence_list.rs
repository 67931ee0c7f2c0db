use thiserror::Error;

use crate::{sequence_less_than, types::SequenceNumber};

/// Errors that can occur during SequenceList operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// Attempted to insert a duplicate ID into the sequence list
    #[error("Duplicate sequence ID {id} not allowed in SequenceList")]
    DuplicateId { id: SequenceNumber },
}

/// A list of items kept sorted by wrapping sequence number.
///
/// Items usually arrive close to in-order, so inserts scan from the back.
pub struct SequenceList<T> {
    list: Vec<(SequenceNumber, T)>,
}

impl<T> Default for SequenceList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SequenceList<T> {
    pub fn new() -> Self {
        Self { list: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn front_id(&self) -> Option<SequenceNumber> {
        self.list.first().map(|(id, _)| *id)
    }

    pub fn pop_front(&mut self) -> Option<(SequenceNumber, T)> {
        if self.list.is_empty() {
            return None;
        }
        Some(self.list.remove(0))
    }

    /// Attempts to insert an item with the given ID, scanning from the back.
    /// Returns an error if the ID already exists.
    pub fn try_insert_scan_from_back(
        &mut self,
        id: SequenceNumber,
        item: T,
    ) -> Result<(), SequenceError> {
        let mut index = self.list.len();

        loop {
            if index == 0 {
                // made it all the way through, insert at front and be done
                self.list.insert(0, (id, item));
                return Ok(());
            }

            index -= 1;

            let old_id = self.list[index].0;
            if old_id == id {
                return Err(SequenceError::DuplicateId { id });
            }
            if sequence_less_than(old_id, id) {
                self.list.insert(index + 1, (id, item));
                return Ok(());
            }
        }
    }
}
