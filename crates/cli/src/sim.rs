//! Simulated worker backend: SHA-256 nonce search on a rayon pool.
//!
//! Each assignment scans up to `scan_budget` nonces from the start of its
//! range. A nonce qualifies when `sha256(payload || nonce_le)` has at least
//! `difficulty` leading zero bits.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::trace;

use hashgrid_core::{Outcome, Payload};
use hashgrid_scheduler::{Assignment, Completion, FeedSenders, SearchRange};

pub struct SimulatedPool {
    feeds: FeedSenders,
    pool: rayon::ThreadPool,
    difficulty: u32,
    scan_budget: u64,
}

impl SimulatedPool {
    pub fn new(feeds: FeedSenders, difficulty: u32, scan_budget: u64, threads: Option<usize>) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("sim-worker-{i}"));
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build().context("failed to build simulated worker pool")?;
        Ok(Self {
            feeds,
            pool,
            difficulty,
            scan_budget: scan_budget.max(1),
        })
    }

    /// Run an assignment in the background; the completion lands in the feed.
    pub fn dispatch(&self, assignment: &Assignment) {
        let feeds = self.feeds.clone();
        let payload = assignment.payload.clone();
        let range = assignment.range;
        let worker_id = assignment.worker_id;
        let work_id = assignment.work_id;
        let difficulty = self.difficulty;
        let budget = self.scan_budget;

        self.pool.spawn(move || {
            let (outcome, scanned) = search(&payload, range, difficulty, budget);
            trace!(worker_id, work_id = %work_id, scanned, found = outcome.is_found(), "simulated search done");
            let load_pct = scanned as f64 / budget as f64 * 100.0;
            feeds.complete(Completion {
                worker_id,
                work_id,
                outcome,
                load_pct,
            });
        });
    }
}

/// Scan `range` from its low end. Returns the outcome and the number of nonces tried.
pub fn search(payload: &Payload, range: SearchRange, difficulty: u32, budget: u64) -> (Outcome, u64) {
    let (lo, hi) = range;
    let end = hi.min(lo.saturating_add(budget - 1));
    let mut scanned = 0;
    for nonce in lo..=end {
        scanned += 1;
        let digest = Sha256::new()
            .chain_update(payload.as_bytes())
            .chain_update(nonce.to_le_bytes())
            .finalize();
        if leading_zero_bits(&digest) >= difficulty {
            return (Outcome::Found(nonce.to_le_bytes().to_vec()), scanned);
        }
    }
    (Outcome::Exhausted, scanned)
}

fn leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut bits = 0;
    for b in bytes {
        if *b == 0 {
            bits += 8;
        } else {
            return bits + b.leading_zeros();
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Payload {
        Payload::new(b"hashgrid-target".to_vec())
    }

    #[test]
    fn zero_difficulty_hits_first_nonce() {
        let (outcome, scanned) = search(&payload(), (40, 1000), 0, 10);
        assert_eq!(outcome, Outcome::Found(40u64.to_le_bytes().to_vec()));
        assert_eq!(scanned, 1);
    }

    #[test]
    fn impossible_difficulty_exhausts_budget() {
        let (outcome, scanned) = search(&payload(), (0, 1 << 20), 256, 64);
        assert_eq!(outcome, Outcome::Exhausted);
        assert_eq!(scanned, 64);
    }

    #[test]
    fn scan_stops_at_range_end() {
        let (_, scanned) = search(&payload(), (10, 14), 256, 1000);
        assert_eq!(scanned, 5);
    }

    #[test]
    fn found_nonce_verifies() {
        let (outcome, _) = search(&payload(), (0, u64::MAX), 8, 1 << 16);
        let Outcome::Found(bytes) = outcome else {
            panic!("8 bits should be found within 65536 nonces");
        };
        let nonce = u64::from_le_bytes(bytes.try_into().unwrap());
        let digest = Sha256::new()
            .chain_update(payload().as_bytes())
            .chain_update(nonce.to_le_bytes())
            .finalize();
        assert!(leading_zero_bits(&digest) >= 8);
    }

    #[test]
    fn counts_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0, 0, 0x0F]), 20);
        assert_eq!(leading_zero_bits(&[0x80]), 0);
        assert_eq!(leading_zero_bits(&[0, 0]), 16);
    }
}
