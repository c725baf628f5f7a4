//! Single-slot time-boxed cache used by every polling point.
//!
//! A [`CacheValue`] memoizes the result of an expensive read (an external
//! command, a sysfs file, `/proc/diskstats`) for a validity window. Fills are
//! read-through and coalesced: the slot lock is held while the origin runs,
//! so concurrent callers wait for the first fill instead of starting their
//! own.

use std::{future::Future, time::Duration};

use tokio::{sync::Mutex, time::Instant};

/// Validity applied when a cache is created with a zero duration.
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    last_filled: Option<Instant>,
}

impl<T> Slot<T> {
    fn is_fresh(&self, validity: Duration) -> bool {
        self.last_filled
            .is_some_and(|last| last + validity > Instant::now())
    }

    fn fill(&mut self, value: T) {
        self.value = Some(value);
        self.last_filled = Some(Instant::now());
    }
}

/// Time-boxed memoized value with single-flight refill.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use hw_eventsd::cache::CacheValue;
///
/// # async fn example() -> Result<(), std::io::Error> {
/// let cache = CacheValue::new(Duration::from_secs(30));
/// let temp = cache
///     .get(|| async { tokio::fs::read_to_string("/sys/class/hwmon/hwmon0/temp1_input").await })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CacheValue<T> {
    slot: Mutex<Slot<T>>,
    validity: Duration,
}

impl<T: Clone> CacheValue<T> {
    /// Creates an empty cache. A zero `validity` falls back to one minute.
    pub fn new(validity: Duration) -> Self {
        let validity = if validity.is_zero() {
            DEFAULT_VALIDITY
        } else {
            validity
        };
        Self {
            slot: Mutex::new(Slot {
                value: None,
                last_filled: None,
            }),
            validity,
        }
    }

    pub async fn has_value(&self) -> bool {
        self.slot.lock().await.is_fresh(self.validity)
    }

    /// Stores `value` with a fresh timestamp.
    pub async fn set(&self, value: T) {
        self.slot.lock().await.fill(value);
    }

    /// Returns the value only if it is still within its validity window.
    pub async fn get_cached(&self) -> Option<T> {
        let slot = self.slot.lock().await;
        if slot.is_fresh(self.validity) {
            slot.value.clone()
        } else {
            None
        }
    }

    /// Returns the cached value, or calls `origin` to refill it.
    ///
    /// The lock is held for the whole call, `origin` included, so at most one
    /// origin runs per cache at any time. A failing origin leaves the slot
    /// exactly as it was.
    pub async fn get<F, Fut, E>(&self, origin: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if slot.is_fresh(self.validity) {
            if let Some(value) = &slot.value {
                return Ok(value.clone());
            }
        }
        let value = origin().await?;
        slot.fill(value.clone());
        Ok(value)
    }
}

impl<T: Clone> Default for CacheValue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };
    use tokio::time::{advance, sleep};

    #[tokio::test(start_paused = true)]
    async fn set_then_get_cached_within_validity() {
        let cache = CacheValue::new(Duration::from_secs(10));
        assert!(!cache.has_value().await);
        assert_eq!(cache.get_cached().await, None);

        cache.set(42).await;
        assert!(cache.has_value().await);
        assert_eq!(cache.get_cached().await, Some(42));

        advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get_cached().await, Some(42));

        advance(Duration::from_secs(1)).await;
        assert!(!cache.has_value().await);
        assert_eq!(cache.get_cached().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_validity_defaults_to_one_minute() {
        let cache = CacheValue::new(Duration::ZERO);
        cache.set(7u8).await;
        advance(DEFAULT_VALIDITY - Duration::from_secs(1)).await;
        assert_eq!(cache.get_cached().await, Some(7));
        advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get_cached().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn get_calls_origin_once_while_fresh() {
        let cache = CacheValue::new(Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let value: Result<i32, ()> = cache
                .get(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
            assert_eq!(value, Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        advance(Duration::from_secs(61)).await;
        let _: Result<i32, ()> = cache
            .get(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(8)
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get_cached().await, Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_origin_does_not_fill() {
        let cache = CacheValue::<i32>::new(Duration::from_secs(60));
        let result = cache.get(|| async { Err("sensor offline") }).await;
        assert_eq!(result, Err("sensor offline"));
        assert!(!cache.has_value().await);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_origin_keeps_previous_value() {
        let cache = CacheValue::new(Duration::from_secs(10));
        cache.set(30).await;
        advance(Duration::from_secs(11)).await;

        let result = cache.get(|| async { Err("timeout") }).await;
        assert_eq!(result, Err("timeout"));
        assert_eq!(cache.get_cached().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_are_coalesced() {
        let cache = Arc::new(CacheValue::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get(|| async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            sleep(Duration::from_secs(2)).await;
                            Ok::<_, ()>(55)
                        })
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            assert_eq!(result.unwrap(), Ok(55));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
