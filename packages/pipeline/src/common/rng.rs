//! Seeded RNG port.
//!
//! All randomness in the scenario runner, fault schedules and backoff
//! jitter comes from a `SeededRng` so runs replay bit-for-bit. ChaCha8 is
//! deterministic across platforms, unlike thread-local entropy.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic RNG. Same seed, same call sequence, same values.
pub struct SeededRng {
    inner: Mutex<ChaCha8Rng>,
    seed: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform float in `[0, 1)`.
    pub fn random(&self) -> f64 {
        self.inner.lock().gen::<f64>()
    }

    /// Uniform integer in `[a, b]` inclusive.
    pub fn randint(&self, a: i64, b: i64) -> i64 {
        self.inner.lock().gen_range(a..=b)
    }

    /// Pick one element from a non-empty slice.
    pub fn choose<'a, T>(&self, items: &'a [T]) -> &'a T {
        let idx = self.inner.lock().gen_range(0..items.len());
        &items[idx]
    }
}
