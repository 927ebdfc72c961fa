//! In-memory booking writer for testing and single-process use.
//!
//! Supports error injection and call tracking so the retry-once and
//! escalation paths can be exercised without a real store.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::domain::foundation::{BookingId, CallbackId};
use crate::ports::{BookingRecord, BookingWriter, CallbackRecord, PersistenceError};

/// In-memory booking/callback store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBookingWriter {
    bookings: Arc<Mutex<Vec<BookingRecord>>>,
    callbacks: Arc<Mutex<Vec<CallbackRecord>>>,
    /// Errors injected ahead of successful writes (consumed in order).
    booking_failures: Arc<Mutex<VecDeque<PersistenceError>>>,
    callback_failures: Arc<Mutex<VecDeque<PersistenceError>>>,
    booking_attempts: Arc<Mutex<u32>>,
    callback_attempts: Arc<Mutex<u32>>,
}

impl InMemoryBookingWriter {
    /// Creates an empty writer that accepts every write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error for the next booking write.
    pub fn with_booking_failure(self, error: PersistenceError) -> Self {
        self.booking_failures.lock().unwrap().push_back(error);
        self
    }

    /// Queues an error for the next callback write.
    pub fn with_callback_failure(self, error: PersistenceError) -> Self {
        self.callback_failures.lock().unwrap().push_back(error);
        self
    }

    /// All successfully written bookings.
    pub fn bookings(&self) -> Vec<BookingRecord> {
        self.bookings.lock().unwrap().clone()
    }

    /// All successfully written callbacks.
    pub fn callbacks(&self) -> Vec<CallbackRecord> {
        self.callbacks.lock().unwrap().clone()
    }

    /// Number of booking write attempts, including failed ones.
    pub fn booking_attempts(&self) -> u32 {
        *self.booking_attempts.lock().unwrap()
    }

    /// Number of callback write attempts, including failed ones.
    pub fn callback_attempts(&self) -> u32 {
        *self.callback_attempts.lock().unwrap()
    }
}

#[async_trait]
impl BookingWriter for InMemoryBookingWriter {
    async fn persist_booking(&self, record: BookingRecord) -> Result<BookingId, PersistenceError> {
        *self.booking_attempts.lock().unwrap() += 1;
        if let Some(error) = self.booking_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.bookings.lock().unwrap().push(record);
        Ok(BookingId::new())
    }

    async fn persist_callback(
        &self,
        record: CallbackRecord,
    ) -> Result<CallbackId, PersistenceError> {
        *self.callback_attempts.lock().unwrap() += 1;
        if let Some(error) = self.callback_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.callbacks.lock().unwrap().push(record);
        Ok(CallbackId::new())
    }
}
