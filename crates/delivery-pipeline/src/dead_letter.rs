//! Where batches go when they can never be delivered.

use crate::{DeliveryError, Record};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::error;

/// Receives batches removed from the retry loop by a terminal failure.
pub trait DeadLetterSink: Send + Sync {
    fn accept(&self, destination: &str, records: Vec<Record>, error: &DeliveryError);
}

/// Logs the dead batch and drops it. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDeadLetters;

impl DeadLetterSink for LogDeadLetters {
    fn accept(&self, destination: &str, records: Vec<Record>, error: &DeliveryError) {
        let first = records.first().map(|r| r.sequence);
        let last = records.last().map(|r| r.sequence);
        error!(
            destination = %destination,
            count = records.len(),
            first_sequence = ?first,
            last_sequence = ?last,
            error = %error,
            "Dropping undeliverable batch"
        );
    }
}

/// A dead-lettered record together with the error that retired it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub destination: String,
    pub record: Record,
    pub error: DeliveryError,
}

/// Keeps the most recent dead-lettered records in memory.
#[derive(Debug)]
pub struct MemoryDeadLetters {
    capacity: usize,
    letters: Mutex<VecDeque<DeadLetter>>,
}

impl MemoryDeadLetters {
    /// Retain at most `capacity` records, discarding the oldest.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            letters: Mutex::new(VecDeque::new()),
        }
    }

    /// Copy of everything retained, oldest first.
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.letters.lock().iter().cloned().collect()
    }

    /// Remove and return everything retained.
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.letters.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.letters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterSink for MemoryDeadLetters {
    fn accept(&self, destination: &str, records: Vec<Record>, error: &DeliveryError) {
        let mut letters = self.letters.lock();
        for record in records {
            letters.push_back(DeadLetter {
                destination: destination.to_string(),
                record,
                error: error.clone(),
            });
        }
        while letters.len() > self.capacity {
            letters.pop_front();
        }
    }
}
