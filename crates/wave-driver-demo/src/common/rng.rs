//! Seeded RNG wrapper for reproducible behavior.
//!
//! Noise and injected failures both draw from a ChaCha8 stream so a demo run
//! with a fixed seed is bit-for-bit repeatable.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded RNG shared between clones of an error configuration.
pub struct DemoRng {
    inner: Mutex<ChaCha8Rng>,
}

impl DemoRng {
    /// Create a new RNG with optional seed.
    /// If seed is None, uses a random seed from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Decide whether an operation fails at the given rate (0.0 to 1.0).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Uniform value in [-1.0, 1.0).
    pub fn next_symmetric(&self) -> f64 {
        self.inner.lock().gen_range(-1.0..1.0)
    }

    /// Uniform value in [0.0, 1.0).
    pub fn next_f64(&self) -> f64 {
        self.inner.lock().gen()
    }
}

impl Default for DemoRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for DemoRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemoRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}
