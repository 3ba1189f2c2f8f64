use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards the notification broker. While open, publishes are rejected
// immediately instead of piling up behind a dead broker.
//
// States:
// - Closed: Normal operation, calls pass through
// - Open: Too many failures, calls rejected until the cool-down elapses
// - HalfOpen: Probing recovery; one failure reopens, enough successes close
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding exported through the `circuit_breaker_state` gauge
    pub fn as_gauge(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Cool-down before a half-open trial call is allowed
    pub cool_down: Duration,
    /// Successes in half-open needed to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

type TransitionListener = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
    listener: Option<TransitionListener>,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "circuit breaker is open"),
            CircuitBreakerError::OperationFailed(e) => write!(f, "operation failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for CircuitBreakerError<E> {}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            config,
            listener: None,
        }
    }

    /// Register a callback invoked on every state change (old, new)
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == CircuitState::Open {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cool_down)
                    .unwrap_or(true);
                if !cooled {
                    return Err(CircuitBreakerError::CircuitOpen);
                }
                inner.success_count = 0;
                self.transition(&mut inner, CircuitState::HalfOpen);
            }
        }

        match operation.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = None;
        self.transition(&mut inner, CircuitState::Closed);
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count += 1;

        let should_open = match inner.state {
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if should_open {
            inner.opened_at = Some(Instant::now());
            inner.success_count = 0;
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut BreakerState, next: CircuitState) {
        let previous = inner.state;
        if previous == next {
            return;
        }
        inner.state = next;

        match next {
            CircuitState::Open => tracing::warn!(
                failures = inner.failure_count,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!("Circuit breaker half-open, probing"),
            CircuitState::Closed => tracing::info!("Circuit breaker closed"),
        }

        if let Some(listener) = &self.listener {
            listener(previous, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(failure_threshold: u32, cool_down: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            cool_down,
            success_threshold: 1,
        }
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects() {
        let cb = CircuitBreaker::new(config(3, Duration::from_secs(60)));

        for _ in 0..3 {
            let result = cb.call(async { Err::<(), _>("broker down") }).await;
            assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
        }

        assert_eq!(cb.state().await, CircuitState::Open);

        let result = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_half_open_trial_closes_on_success() {
        let cb = CircuitBreaker::new(config(2, Duration::from_millis(20)));

        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), _>("broker down") }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cb.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_listener_sees_transitions() {
        let transitions = Arc::new(AtomicU32::new(0));
        let seen = transitions.clone();
        let cb = CircuitBreaker::new(config(1, Duration::from_secs(60))).with_listener(
            move |_from, to| {
                if to == CircuitState::Open {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        let _ = cb.call(async { Err::<(), _>("broker down") }).await;
        assert_eq!(transitions.load(Ordering::SeqCst), 1);

        cb.reset().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }
}
