//! Opaque ID minting.
//!
//! Identifiers are short opaque strings minted at creation time (monotonic
//! tag + timestamp suffix). No UUID dependency is used here — callers only
//! need stable, locally-unique, sortable-by-creation IDs.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Mints IDs of the form `"{tag}-{counter:08x}-{millis}"`.
///
/// One minter per ID namespace (faults, predictions, healing attempts, ...)
/// keeps counters independent so two namespaces never collide even if
/// minted in the same millisecond.
#[derive(Debug)]
pub struct IdMinter {
    tag: &'static str,
    counter: AtomicU64,
}

impl IdMinter {
    pub const fn new(tag: &'static str) -> Self {
        Self {
            tag,
            counter: AtomicU64::new(0),
        }
    }

    /// Mint a new opaque ID. Total order of minting is recoverable from the
    /// embedded counter, independent of wall-clock resolution.
    pub fn mint(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:08x}-{}", self.tag, n, Utc::now().timestamp_millis())
    }
}

pub static FAULT_IDS: IdMinter = IdMinter::new("flt");
pub static PREDICTION_IDS: IdMinter = IdMinter::new("prd");
pub static HEALING_ATTEMPT_IDS: IdMinter = IdMinter::new("heal");
pub static PLAN_IDS: IdMinter = IdMinter::new("plan");
pub static STEP_IDS: IdMinter = IdMinter::new("step");
pub static EXECUTION_IDS: IdMinter = IdMinter::new("exec");
pub static DRILL_IDS: IdMinter = IdMinter::new("drill");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_are_distinct_and_tagged() {
        let minter = IdMinter::new("x");
        let a = minter.mint();
        let b = minter.mint();
        assert_ne!(a, b);
        assert!(a.starts_with("x-"));
        assert!(b.starts_with("x-"));
    }

    #[test]
    fn namespaces_are_independent() {
        let a = FAULT_IDS.mint();
        let b = PREDICTION_IDS.mint();
        assert!(a.starts_with("flt-"));
        assert!(b.starts_with("prd-"));
    }
}
