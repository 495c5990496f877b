use rand::{thread_rng, Rng};
use std::time::Duration;

/// Randomized delay drawn uniformly from a `[min, max]` window.
///
/// Used to throttle request bursts and to space out outbound messages. The pause
/// is intentional and is applied on every attempt, retries included.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Default for Pacer {
    fn default() -> Self { Pacer::disabled() }
}

impl Pacer {
    /// Window in (fractional) seconds. Negative values clamp to zero, swapped bounds are reordered.
    pub fn from_secs(min: f64, max: f64) -> Self {
        let lo = Duration::from_secs_f64(min.max(0.0));
        let hi = Duration::from_secs_f64(max.max(0.0));
        if lo <= hi { Pacer { min: lo, max: hi } } else { Pacer { min: hi, max: lo } }
    }

    pub fn disabled() -> Self {
        Pacer { min: Duration::ZERO, max: Duration::ZERO }
    }

    pub fn window(&self) -> (Duration, Duration) { (self.min, self.max) }

    pub fn next_delay(&self) -> Duration {
        if self.max.is_zero() || self.min == self.max {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(thread_rng().gen_range(lo..=hi))
    }

    /// Sleep for one drawn delay and return it.
    pub async fn pause(&self) -> Duration {
        let d = self.next_delay();
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
        d
    }
}
