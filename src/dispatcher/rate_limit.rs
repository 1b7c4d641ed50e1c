use std::time::{Duration, Instant};

pub const DEFAULT_BUCKET_CAPACITY: u32 = 5;
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// Token bucket: starts full, gains one token per elapsed refill interval up
/// to `capacity`, and is only mutated by acquisition attempts.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    tokens: u32,
    refill_interval: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self::starting_at(capacity, refill_interval, Instant::now())
    }

    pub fn starting_at(capacity: u32, refill_interval: Duration, now: Instant) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tokens: capacity,
            refill_interval,
            last_refill: now,
        }
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }

    pub fn available(&self) -> u32 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        if self.refill_interval.is_zero() {
            self.tokens = self.capacity;
            self.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals = elapsed.as_nanos() / self.refill_interval.as_nanos();
        if intervals == 0 {
            return;
        }
        if self.tokens == self.capacity {
            self.last_refill = now;
            return;
        }
        let gained = u32::try_from(intervals).unwrap_or(u32::MAX);
        self.tokens = self.tokens.saturating_add(gained).min(self.capacity);
        if self.tokens == self.capacity {
            self.last_refill = now;
        } else {
            // Keep the fractional remainder toward the next token.
            self.last_refill += self.refill_interval * gained;
        }
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_CAPACITY, DEFAULT_REFILL_INTERVAL)
    }
}
