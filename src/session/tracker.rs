//! # Sequence Tracker
//!
//! Packet-loss accounting from packet sequence numbers. Each sequence number
//! is compared only to the previously accepted one; a forward jump is loss,
//! a step back (or a repeat) starts a new segment after a source restart.

/// How an accepted sequence number relates to the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStep {
    /// First packet of the session
    First,
    /// Exactly `last + 1`
    Contiguous,
    /// Forward jump; `lost` packets never arrived
    Gap { lost: u64 },
    /// `s <= last`: the source restarted or repeated a packet
    Restart { previous: u64 },
}

/// Cumulative received/lost counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceStats {
    pub received: u64,
    pub lost: u64,
    /// Number of restarts seen (non-monotonic sequence numbers)
    pub segments_restarted: u64,
}

impl SequenceStats {
    /// Packets expected so far (received + lost)
    pub fn expected(&self) -> u64 {
        self.received.saturating_add(self.lost)
    }

    /// Lost share of expected packets in percent, 0 when nothing was seen
    pub fn loss_percent(&self) -> f64 {
        match self.expected() {
            0 => 0.0,
            total => (self.lost as f64 / total as f64 * 100.0).min(100.0),
        }
    }
}

/// Tracks the last accepted sequence number and the running counters
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    last_sequence: Option<u64>,
    stats: SequenceStats,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one accepted packet
    ///
    /// Counters only ever grow and saturate at `u64::MAX`; a restart
    /// re-anchors the tracker without giving back loss counted before it.
    ///
    /// # Examples
    ///
    /// ```
    /// use cansat_ground::session::tracker::{SequenceStep, SequenceTracker};
    ///
    /// let mut tracker = SequenceTracker::new();
    /// tracker.observe(10);
    /// assert_eq!(tracker.observe(14), SequenceStep::Gap { lost: 3 });
    /// assert_eq!(tracker.stats().received, 2);
    /// assert_eq!(tracker.stats().lost, 3);
    /// ```
    pub fn observe(&mut self, sequence: u64) -> SequenceStep {
        let step = match self.last_sequence {
            None => SequenceStep::First,
            Some(last) if last.checked_add(1) == Some(sequence) => SequenceStep::Contiguous,
            Some(last) if sequence > last => SequenceStep::Gap {
                lost: sequence - last - 1,
            },
            Some(last) => SequenceStep::Restart { previous: last },
        };

        self.stats.received = self.stats.received.saturating_add(1);
        match step {
            SequenceStep::Gap { lost } => self.stats.lost = self.stats.lost.saturating_add(lost),
            SequenceStep::Restart { .. } => {
                self.stats.segments_restarted = self.stats.segments_restarted.saturating_add(1)
            }
            SequenceStep::First | SequenceStep::Contiguous => {}
        }
        self.last_sequence = Some(sequence);

        step
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn stats(&self) -> SequenceStats {
        self.stats
    }

    /// Zero the counters and forget the last sequence number
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
