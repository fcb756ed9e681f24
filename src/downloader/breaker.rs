/// Consecutive-failure counter with a threshold that depends on whether any
/// page has been downloaded yet.
///
/// Before the first success a long run of failures is tolerated (the episode
/// may still be propagating); afterwards a short run means the content ended.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    cold_threshold: u32,
    warm_threshold: u32,
    consecutive: u32,
    successes: u32,
}

impl CircuitBreaker {
    pub fn new(cold_threshold: u32, warm_threshold: u32) -> Self {
        Self {
            cold_threshold: cold_threshold.max(1),
            warm_threshold: warm_threshold.max(1),
            consecutive: 0,
            successes: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
        self.successes += 1;
    }

    pub fn record_failure(&mut self) {
        self.consecutive += 1;
    }

    pub fn threshold(&self) -> u32 {
        if self.has_succeeded() {
            self.warm_threshold
        } else {
            self.cold_threshold
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.consecutive >= self.threshold()
    }

    pub fn has_succeeded(&self) -> bool {
        self.successes > 0
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive
    }
}
