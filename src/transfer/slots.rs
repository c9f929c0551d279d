//! Connection slots shared across galleries, and per-job request pacing

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Per-host connection counter shared by every concurrently fetching gallery
///
/// Each job passes the `max_connections_per_server` of its own profile
/// snapshot, so a profile switch never changes the limit a running job waits
/// on, while the count itself is global.
#[derive(Debug, Default)]
pub struct HostSlots {
    in_flight: Mutex<HashMap<String, usize>>,
    released: Notify,
}

impl HostSlots {
    /// Create an empty slot table
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        // Counters stay consistent even if a holder panicked
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until `host` has fewer than `limit` connections in flight, then take one
    pub async fn acquire(self: &Arc<Self>, host: &str, limit: usize) -> HostSlot {
        let limit = limit.max(1);
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut table = self.table();
                let count = table.entry(host.to_string()).or_insert(0);
                if *count < limit {
                    *count += 1;
                    return HostSlot {
                        slots: Arc::clone(self),
                        host: host.to_string(),
                    };
                }
            }

            notified.await;
        }
    }

    /// Connections currently held for `host`
    pub fn in_flight(&self, host: &str) -> usize {
        self.table().get(host).copied().unwrap_or(0)
    }

    fn release(&self, host: &str) {
        {
            let mut table = self.table();
            if let Some(count) = table.get_mut(host) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    table.remove(host);
                }
            }
        }
        self.released.notify_waiters();
    }
}

/// A held connection slot; released on drop
#[derive(Debug)]
pub struct HostSlot {
    slots: Arc<HostSlots>,
    host: String,
}

impl Drop for HostSlot {
    fn drop(&mut self) {
        self.slots.release(&self.host);
    }
}

/// Spaces out request starts within one job by a fixed delay
#[derive(Debug)]
pub struct RequestPacer {
    delay: Duration,
    next_start: tokio::sync::Mutex<Option<Instant>>,
}

impl RequestPacer {
    /// Create a pacer with the given minimum spacing
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_start: tokio::sync::Mutex::new(None),
        }
    }

    /// Wait for this request's turn
    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut next_start = self.next_start.lock().await;
        let now = Instant::now();
        let start = match *next_start {
            Some(at) if at > now => at,
            _ => now,
        };
        *next_start = Some(start + self.delay);
        drop(next_start);

        tokio::time::sleep_until(start).await;
    }
}
