use std::time::Duration;

// -----------------------------------------------------------------------------
// ----- ReconnectPolicy -------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Never,
    Backoff { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Backoff {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Backoff ---------------------------------------------------------------

/// Consecutive-failure counter behind `ReconnectPolicy`. Delay doubles per
/// failure up to `max`; a successful connect resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    /// Delay before the next attempt, or `None` when we never retry.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let ReconnectPolicy::Backoff { initial, max } = self.policy else {
            return None;
        };

        let delay = match self.current {
            None => initial,
            Some(prev) => prev.saturating_mul(2),
        }
        .min(max);

        self.current = Some(delay);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_never_retries() {
        let mut backoff = Backoff::new(ReconnectPolicy::Never);
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn doubles_up_to_max_and_resets() {
        let mut backoff = Backoff::new(ReconnectPolicy::Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
        });

        let delays: Vec<_> = (0..4).filter_map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
