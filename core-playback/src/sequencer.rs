//! # Chunk Sequencer
//!
//! Restores arrival order after concurrent decodes.
//!
//! Payloads are numbered as the demuxer emits them. Decodes may finish in
//! any order; the sequencer parks early results in an index-ordered slot
//! array and releases them only once every lower index has been released.
//! A failed decode still occupies its slot, so a skipped chunk never holds
//! back its successors.

use crate::error::DecodeError;
use crate::traits::DecodedChunk;
use std::collections::VecDeque;
use tracing::trace;

/// Outcome of one decode, as stored in a slot.
pub type DecodeOutcome = Result<DecodedChunk, DecodeError>;

/// Index-ordered reassembly of decode results.
#[derive(Debug, Default)]
pub struct ChunkSequencer {
    /// `slots[i]` holds the result for index `next + i`.
    slots: VecDeque<Option<DecodeOutcome>>,
    next: u64,
}

impl ChunkSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the result for `index` and return every result that is now
    /// releasable, in index order.
    ///
    /// Results for indices already released are ignored.
    pub fn insert(&mut self, index: u64, outcome: DecodeOutcome) -> Vec<(u64, DecodeOutcome)> {
        if index < self.next {
            trace!(index, next = self.next, "Ignoring result for released index");
            return Vec::new();
        }

        let offset = (index - self.next) as usize;
        if self.slots.len() <= offset {
            self.slots.resize_with(offset + 1, || None);
        }
        self.slots[offset] = Some(outcome);

        let mut ready = Vec::new();
        while let Some(Some(_)) = self.slots.front() {
            if let Some(Some(outcome)) = self.slots.pop_front() {
                ready.push((self.next, outcome));
                self.next += 1;
            }
        }
        ready
    }

    /// Next index waiting to be released.
    pub fn next_index(&self) -> u64 {
        self.next
    }

    /// Results parked behind a missing lower index.
    pub fn parked(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// `true` once every index below `emitted` has been released.
    pub fn is_drained(&self, emitted: u64) -> bool {
        self.next >= emitted && self.parked() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::AudioCodec;

    fn chunk(sequence: u64) -> DecodeOutcome {
        Ok(DecodedChunk::new(sequence, AudioCodec::Wav, 8000, vec![vec![0.0; 80]]))
    }

    fn indices(ready: &[(u64, DecodeOutcome)]) -> Vec<u64> {
        ready.iter().map(|(index, _)| *index).collect()
    }

    #[test]
    fn test_in_order_results_release_immediately() {
        let mut sequencer = ChunkSequencer::new();
        assert_eq!(indices(&sequencer.insert(0, chunk(0))), vec![0]);
        assert_eq!(indices(&sequencer.insert(1, chunk(1))), vec![1]);
        assert!(sequencer.is_drained(2));
    }

    #[test]
    fn test_out_of_order_results_wait_for_gap() {
        let mut sequencer = ChunkSequencer::new();

        assert!(sequencer.insert(2, chunk(2)).is_empty());
        assert!(sequencer.insert(1, chunk(1)).is_empty());
        assert_eq!(sequencer.parked(), 2);
        assert!(!sequencer.is_drained(3));

        assert_eq!(indices(&sequencer.insert(0, chunk(0))), vec![0, 1, 2]);
        assert_eq!(sequencer.next_index(), 3);
        assert!(sequencer.is_drained(3));
    }

    #[test]
    fn test_failure_occupies_its_slot() {
        let mut sequencer = ChunkSequencer::new();

        assert!(sequencer.insert(1, chunk(1)).is_empty());
        let ready = sequencer.insert(0, Err(DecodeError::Empty));

        assert_eq!(indices(&ready), vec![0, 1]);
        assert!(ready[0].1.is_err());
        assert!(ready[1].1.is_ok());
    }

    #[test]
    fn test_stale_index_ignored() {
        let mut sequencer = ChunkSequencer::new();
        sequencer.insert(0, chunk(0));
        assert!(sequencer.insert(0, chunk(0)).is_empty());
        assert_eq!(sequencer.next_index(), 1);
    }
}
