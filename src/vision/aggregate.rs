//! Majority vote over OCR hits
//!
//! Each batch pools its hits; the most frequent reading wins unless it was
//! already announced during this run.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::ocr::OcrHit;

/// Voting state for one run over one video
#[derive(Debug, Default)]
pub struct PlateAggregator {
    processed_numbers: HashSet<String>,
}

impl PlateAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from numbers already handled elsewhere
    pub fn with_processed(processed_numbers: HashSet<String>) -> Self {
        Self { processed_numbers }
    }

    /// Numbers emitted so far
    pub fn processed_numbers(&self) -> &HashSet<String> {
        &self.processed_numbers
    }

    /// Pick the winning reading of a batch pool
    ///
    /// Hits are scanned in frame order and the leader changes only on a
    /// strictly higher count, so the first text to reach the top count wins
    /// ties. Returns `None` for an empty pool or an already processed winner.
    pub fn resolve_batch(&self, pool: &[OcrHit]) -> Option<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut leader: Option<(&str, usize)> = None;

        for hit in pool {
            let count = counts.entry(hit.text.as_str()).or_insert(0);
            *count += 1;

            match leader {
                Some((_, best)) if *count <= best => {}
                _ => leader = Some((hit.text.as_str(), *count)),
            }
        }

        let (winner, votes) = leader?;
        if self.processed_numbers.contains(winner) {
            debug!("{} already processed ({} votes)", winner, votes);
            return None;
        }

        debug!("Batch winner {} with {}/{} votes", winner, votes, pool.len());
        Some(winner.to_string())
    }

    /// Record an emitted number
    pub fn mark_processed(&mut self, number: &str) {
        self.processed_numbers.insert(number.to_string());
    }
}
