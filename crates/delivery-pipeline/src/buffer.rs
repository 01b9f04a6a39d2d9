//! Ordered in-memory buffer of records awaiting delivery.

use crate::{Record, TracePayload};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Result of appending a record to a [`Buffer`].
#[derive(Debug)]
pub enum Append {
    /// The payload was buffered under `sequence`. Any records evicted to
    /// respect the cap are returned oldest first.
    Accepted { sequence: u64, evicted: Vec<Record> },
    /// The buffer was closed by shutdown; the payload is handed back.
    Closed(TracePayload),
}

#[derive(Debug, Default)]
struct Inner {
    records: VecDeque<Record>,
    next_sequence: u64,
    closed: bool,
}

/// Pending records for one pipeline.
///
/// All operations take a short, non-async lock and never hold it across I/O.
#[derive(Debug)]
pub struct Buffer {
    inner: Mutex<Inner>,
    max_len: Option<usize>,
}

impl Buffer {
    /// Create an empty buffer, optionally capped at `max_len` records.
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_len,
        }
    }

    /// Wrap `payload` in a [`Record`] and append it at the back.
    ///
    /// Sequence numbers are assigned under the lock, so they always match
    /// buffer order.
    pub fn append(&self, payload: TracePayload) -> Append {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Append::Closed(payload);
        }
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.records.push_back(Record::new(sequence, payload));
        let evicted = self.evict_overflow(&mut inner.records);
        Append::Accepted { sequence, evicted }
    }

    /// Take everything currently buffered, leaving the buffer empty.
    pub fn snapshot_and_clear(&self) -> Vec<Record> {
        let mut inner = self.inner.lock();
        std::mem::take(&mut inner.records).into()
    }

    /// Take everything and reject all later appends.
    pub fn snapshot_and_close(&self) -> Vec<Record> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        std::mem::take(&mut inner.records).into()
    }

    /// Put a failed batch back ahead of anything appended since it was taken.
    ///
    /// Returns records evicted to respect the cap, oldest first. A closed
    /// buffer will never be flushed again, so the batch is handed back as
    /// `Err` instead.
    pub fn requeue(&self, batch: Vec<Record>) -> Result<Vec<Record>, Vec<Record>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(batch);
        }
        let newer = std::mem::take(&mut inner.records);
        let mut records = VecDeque::from(batch);
        records.extend(newer);
        inner.records = records;
        Ok(self.evict_overflow(&mut inner.records))
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`snapshot_and_close`](Self::snapshot_and_close) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    fn evict_overflow(&self, records: &mut VecDeque<Record>) -> Vec<Record> {
        match self.max_len {
            Some(max) if records.len() > max => {
                let excess = records.len() - max;
                records.drain(..excess).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(i: u64) -> TracePayload {
        TracePayload::new(format!("span-{i}"), "chat")
    }

    fn sequences(records: &[Record]) -> Vec<u64> {
        records.iter().map(|r| r.sequence).collect()
    }

    fn accepted(append: Append) -> Vec<Record> {
        match append {
            Append::Accepted { evicted, .. } => evicted,
            Append::Closed(_) => panic!("buffer unexpectedly closed"),
        }
    }

    #[test]
    fn test_append_and_snapshot_preserve_order() {
        let buffer = Buffer::new(None);
        for i in 0..5 {
            assert!(accepted(buffer.append(payload(i))).is_empty());
        }
        assert_eq!(buffer.len(), 5);

        let batch = buffer.snapshot_and_clear();
        assert_eq!(sequences(&batch), vec![0, 1, 2, 3, 4]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_snapshot_of_empty_buffer() {
        let buffer = Buffer::new(None);
        assert!(buffer.snapshot_and_clear().is_empty());
    }

    #[test]
    fn test_requeue_goes_ahead_of_newer_records() {
        let buffer = Buffer::new(None);
        buffer.append(payload(0));
        buffer.append(payload(1));
        let batch = buffer.snapshot_and_clear();

        // Appended while the batch was in flight
        buffer.append(payload(2));
        buffer.append(payload(3));

        assert!(buffer.requeue(batch).unwrap().is_empty());
        assert_eq!(sequences(&buffer.snapshot_and_clear()), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_requeue_empty_batch_is_noop() {
        let buffer = Buffer::new(None);
        buffer.append(payload(0));
        assert!(buffer.requeue(Vec::new()).unwrap().is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_append_evicts_oldest_beyond_cap() {
        let buffer = Buffer::new(Some(3));
        for i in 0..3 {
            assert!(accepted(buffer.append(payload(i))).is_empty());
        }

        let evicted = accepted(buffer.append(payload(3)));
        assert_eq!(sequences(&evicted), vec![0]);
        assert_eq!(sequences(&buffer.snapshot_and_clear()), vec![1, 2, 3]);
    }

    #[test]
    fn test_requeue_evicts_oldest_beyond_cap() {
        let buffer = Buffer::new(Some(3));
        buffer.append(payload(0));
        buffer.append(payload(1));
        let batch = buffer.snapshot_and_clear();
        buffer.append(payload(2));
        buffer.append(payload(3));

        let evicted = buffer.requeue(batch).unwrap();
        assert_eq!(sequences(&evicted), vec![0]);
        assert_eq!(sequences(&buffer.snapshot_and_clear()), vec![1, 2, 3]);
    }

    #[test]
    fn test_closed_buffer_rejects_appends() {
        let buffer = Buffer::new(None);
        buffer.append(payload(0));

        let remaining = buffer.snapshot_and_close();
        assert_eq!(sequences(&remaining), vec![0]);
        assert!(buffer.is_closed());

        match buffer.append(payload(1)) {
            Append::Closed(p) => assert_eq!(p.id, "span-1"),
            Append::Accepted { .. } => panic!("closed buffer accepted a record"),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_requeue_into_closed_buffer_hands_batch_back() {
        let buffer = Buffer::new(None);
        buffer.append(payload(0));
        buffer.append(payload(1));
        let batch = buffer.snapshot_and_clear();
        buffer.snapshot_and_close();

        let returned = buffer.requeue(batch).unwrap_err();
        assert_eq!(sequences(&returned), vec![0, 1]);
        assert!(buffer.is_empty());
    }
}
