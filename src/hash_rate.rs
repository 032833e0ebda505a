use super::*;

pub const SHORT_WINDOW: Duration = Duration::from_secs(60);
pub const MEDIUM_WINDOW: Duration = Duration::from_secs(600);
pub const LONG_WINDOW: Duration = Duration::from_secs(12 * 60 * 60);
pub const EXTRA_LONG_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Hash-rate estimator fed by accepted share difficulties.
///
/// Keeps the instantaneous rate of the latest update plus four
/// exponentially-weighted averages over the windows above. Each update blends
/// the instantaneous rate in with weight `elapsed / window`, where the window
/// shrinks to the calculator's age while it is younger than the window, so
/// fresh calculators converge quickly.
#[derive(Debug, Clone)]
pub struct HashRateCalculator {
    init: Instant,
    last_update: Instant,
    total_hashes: u64,
    last_rate: f64,
    short: f64,
    medium: f64,
    long: f64,
    extra_long: f64,
}

impl Default for HashRateCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl HashRateCalculator {
    pub fn new() -> Self {
        Self::with_start_time(Instant::now())
    }

    pub(crate) fn with_start_time(start: Instant) -> Self {
        Self {
            init: start,
            last_update: start,
            total_hashes: 0,
            last_rate: 0.0,
            short: 0.0,
            medium: 0.0,
            long: 0.0,
            extra_long: 0.0,
        }
    }

    pub fn add_hashes(&mut self, hashes: u64) {
        self.add_hashes_at(hashes, Instant::now());
    }

    /// Credits a constant `rate` for the time elapsed since the last update.
    pub fn add_hash_rate(&mut self, rate: f64) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_update).as_millis() as f64;
        self.add_hashes_at((rate * elapsed_ms / 1000.0) as u64, now);
    }

    pub(crate) fn add_hashes_at(&mut self, hashes: u64, now: Instant) {
        let since_init = now.duration_since(self.init);
        let since_update = now.duration_since(self.last_update);
        self.last_update = now;

        self.total_hashes += hashes;

        if since_init.as_millis() == 0 || since_update.as_millis() == 0 {
            return;
        }

        self.last_rate = (hashes as f64) * 1000.0 / since_update.as_millis() as f64;

        let rate = self.last_rate;
        for (average, window) in [
            (&mut self.short, SHORT_WINDOW),
            (&mut self.medium, MEDIUM_WINDOW),
            (&mut self.long, LONG_WINDOW),
            (&mut self.extra_long, EXTRA_LONG_WINDOW),
        ] {
            blend(average, rate, window, since_update, since_init);
        }
    }

    pub fn total_hashes(&self) -> u64 {
        self.total_hashes
    }

    pub fn last_rate(&self) -> f64 {
        self.last_rate
    }

    pub fn average_short(&self) -> f64 {
        self.short
    }

    pub fn average_medium(&self) -> f64 {
        self.medium
    }

    pub fn average_long(&self) -> f64 {
        self.long
    }

    pub fn average_extra_long(&self) -> f64 {
        self.extra_long
    }

    pub fn age(&self) -> Duration {
        self.init.elapsed()
    }
}

fn blend(average: &mut f64, rate: f64, window: Duration, elapsed: Duration, age: Duration) {
    if *average == 0.0 {
        *average = rate;
        return;
    }

    let effective_window = window.min(age).as_millis() as f64;
    let fraction = (elapsed.as_millis() as f64 / effective_window).min(1.0);
    *average = *average * (1.0 - fraction) + rate * fraction;
}

impl AddAssign<&HashRateCalculator> for HashRateCalculator {
    fn add_assign(&mut self, other: &HashRateCalculator) {
        self.total_hashes += other.total_hashes;
        self.short += other.short;
        self.medium += other.medium;
        self.long += other.long;
        self.extra_long += other.extra_long;
    }
}
