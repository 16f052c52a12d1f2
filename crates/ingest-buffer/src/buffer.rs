//! Per-User Sample Buffers

use std::collections::HashMap;
use vitals_types::Reading;

/// Buffered readings keyed by user id, oldest first per user
#[derive(Debug, Default)]
pub struct UserBuffers {
    queues: HashMap<String, Vec<Reading>>,
    len: usize,
}

impl UserBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading to its user's queue
    pub fn push(&mut self, reading: Reading) {
        self.queues
            .entry(reading.user_id.clone())
            .or_default()
            .push(reading);
        self.len += 1;
    }

    /// Total buffered readings
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of users with buffered readings
    pub fn user_count(&self) -> usize {
        self.queues.len()
    }

    /// Buffered readings for one user
    pub fn pending_for(&self, user_id: &str) -> usize {
        self.queues.get(user_id).map_or(0, Vec::len)
    }

    /// Swap every queue out, leaving the buffers empty
    pub fn take_all(&mut self) -> HashMap<String, Vec<Reading>> {
        self.len = 0;
        std::mem::take(&mut self.queues)
    }

    /// Put back readings from a failed flush, ahead of anything buffered since
    pub fn restore(&mut self, taken: HashMap<String, Vec<Reading>>) {
        for (user_id, mut readings) in taken {
            self.len += readings.len();
            if let Some(newer) = self.queues.remove(&user_id) {
                readings.extend(newer);
            }
            self.queues.insert(user_id, readings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use vitals_types::VitalPayload;

    fn reading(user: &str, count: u64) -> Reading {
        Reading::new(user, "band", "fitbit", Utc::now(), VitalPayload::Steps { count })
    }

    #[test]
    fn test_push_and_take() {
        let mut buffers = UserBuffers::new();
        buffers.push(reading("a", 1));
        buffers.push(reading("b", 2));
        buffers.push(reading("a", 3));

        assert_eq!(buffers.len(), 3);
        assert_eq!(buffers.user_count(), 2);
        assert_eq!(buffers.pending_for("a"), 2);

        let taken = buffers.take_all();
        assert!(buffers.is_empty());
        assert_eq!(taken["a"].len(), 2);
        assert_eq!(taken["b"].len(), 1);
    }

    #[test]
    fn test_restore_keeps_older_first() {
        let mut buffers = UserBuffers::new();
        buffers.push(reading("a", 1));
        let taken = buffers.take_all();
        buffers.push(reading("a", 2));

        buffers.restore(taken);
        assert_eq!(buffers.len(), 2);
        let again = buffers.take_all();
        let counts: Vec<_> = again["a"]
            .iter()
            .map(|r| match r.payload {
                VitalPayload::Steps { count } => count,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(counts, vec![1, 2]);
    }

    proptest! {
        #[test]
        fn failed_flush_loses_nothing(
            users in proptest::collection::vec(0u8..4, 0..40),
            split in 0usize..40,
        ) {
            let mut buffers = UserBuffers::new();
            let split = split.min(users.len());
            for (i, u) in users[..split].iter().enumerate() {
                buffers.push(reading(&format!("user-{}", u), i as u64));
            }
            let taken = buffers.take_all();
            for (i, u) in users[split..].iter().enumerate() {
                buffers.push(reading(&format!("user-{}", u), (split + i) as u64));
            }
            buffers.restore(taken);

            prop_assert_eq!(buffers.len(), users.len());
            let mut seen: Vec<u64> = buffers
                .take_all()
                .values()
                .flatten()
                .map(|r| match r.payload {
                    VitalPayload::Steps { count } => count,
                    _ => unreachable!(),
                })
                .collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..users.len() as u64).collect::<Vec<_>>());
        }
    }
}
