//! Synthetic CPU-bound task, offloaded to the blocking thread pool so the
//! event loop keeps serving requests while it runs.

use anyhow::{Context, Result};

/// Iteration count for the gateway endpoint; tuned to take a few seconds.
pub const DEFAULT_ITERATIONS: u64 = 500_000_000;

/// Run `iterations` rounds of a xorshift accumulator on a blocking thread and
/// return the total. Deterministic for a given iteration count.
pub async fn run_heavy_task(iterations: u64) -> Result<u64> {
    tokio::task::spawn_blocking(move || {
        let mut x: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut total: u64 = 0;
        for _ in 0..iterations {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            total = total.wrapping_add(x);
        }
        total
    })
    .await
    .context("heavy task worker panicked")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn result_is_deterministic_for_a_fixed_count() {
        let a = run_heavy_task(10_000).await.expect("task runs");
        let b = run_heavy_task(10_000).await.expect("task runs");
        assert_eq!(a, b);
        assert_ne!(a, 0);
    }

    #[tokio::test]
    async fn different_counts_produce_different_totals() {
        let a = run_heavy_task(1_000).await.expect("task runs");
        let b = run_heavy_task(2_000).await.expect("task runs");
        assert_ne!(a, b);
    }
}
