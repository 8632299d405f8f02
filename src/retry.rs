use crate::config::RetryConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_elapsed: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for Backoff {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
            multiplier: cfg.multiplier,
            max_elapsed: Duration::from_secs(cfg.max_elapsed_secs),
        }
    }
}

pub fn next_delay(current: Duration, backoff: &Backoff) -> Duration {
    let next_ms = (current.as_millis() as f64 * backoff.multiplier) as u64;
    Duration::from_millis(next_ms).min(backoff.max_delay)
}

pub async fn retry<T, E, F, Fut>(
    backoff: &Backoff,
    what: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    let mut delay = backoff.initial_delay;
    let mut attempt = 0_u32;

    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !is_transient(&err) {
            return Err(err);
        }
        if started.elapsed() + delay > backoff.max_elapsed {
            warn!(what, attempt, error = %err, "retry window exhausted");
            return Err(err);
        }

        warn!(
            what,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
        delay = next_delay(delay, backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> Backoff {
        Backoff {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(5),
        }
    }

    #[test]
    fn default_matches_ten_minute_window() {
        let backoff = Backoff::default();
        assert_eq!(backoff.initial_delay, Duration::from_secs(1));
        assert_eq!(backoff.max_elapsed, Duration::from_secs(600));
    }

    #[test]
    fn full_backoff_sequence() {
        let backoff = Backoff::default();
        let mut delay = backoff.initial_delay;
        let expected = [1, 2, 4, 8, 16, 32, 60, 60];

        for &expected_secs in &expected {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &backoff);
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32, String> = retry(
            &fast(),
            "test",
            |_| true,
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("attempt {n} refused"))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = retry(
            &fast(),
            "test",
            |e: &String| e.contains("timeout"),
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("bad json".to_string())
                }
            },
        )
        .await;

        assert_eq!(result, Err("bad json".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_window() {
        let backoff = Backoff {
            max_elapsed: Duration::from_millis(20),
            ..fast()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = retry(&backoff, "test", |_| true, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("timeout".to_string())
            }
        })
        .await;

        assert!(result.is_err());
        let n = calls.load(Ordering::SeqCst);
        assert!(n >= 2, "retried at least once, got {n}");
    }
}
