use std::time::Duration;

use super::Mediator;
use crate::error::TransportError;
use crate::message::Envelope;

/// Bounded retry with exponential backoff for `send`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(200))
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: usize, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }

    /// Send `envelope`, retrying failures until the attempts run out.
    /// Returns the last error when every attempt failed.
    pub async fn send(&self, mediator: &dyn Mediator, envelope: Envelope) -> Result<(), TransportError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match mediator.send(envelope.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageContext, WorkRequest, WorkResult};
    use crate::params::GridParams;
    use crate::transport::{NetworkMode, PollOptions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` sends
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Mediator for Flaky {
        fn mode(&self) -> NetworkMode { NetworkMode::Wan }
        async fn connect(&self) -> Result<(), TransportError> { Ok(()) }
        async fn disconnect(&self) -> Result<(), TransportError> { Ok(()) }
        async fn send(&self, _envelope: Envelope) -> Result<(), TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures { Err(TransportError::Rejected(503)) } else { Ok(()) }
        }
        async fn get_message(
            &self,
            _context: &MessageContext,
            _poll: &PollOptions,
        ) -> Result<Option<Envelope>, TransportError> {
            Ok(None)
        }
        async fn stop(&self) {}
        async fn backup_result(&self, _: &WorkResult, _: &str, _: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn envelope() -> Envelope {
        Envelope::request(WorkRequest::template("s", "sphere", GridParams::default()))
    }

    #[test]
    fn test_delays_double_and_cap() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(500),
            ..RetryPolicy::exponential(5, Duration::from_millis(100))
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let flaky = Flaky { failures: 2, calls: AtomicUsize::new(0) };
        let policy = RetryPolicy::exponential(3, Duration::from_millis(1));
        assert!(policy.send(&flaky, envelope()).await.is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let flaky = Flaky { failures: 10, calls: AtomicUsize::new(0) };
        let policy = RetryPolicy::exponential(3, Duration::from_millis(1));
        let err = policy.send(&flaky, envelope()).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(503)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }
}
