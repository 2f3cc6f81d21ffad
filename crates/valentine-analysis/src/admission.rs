//! Weighted admission control between the I/O and CPU pools.
//!
//! Every loaded target holds a permit for its weight until its CPU task has
//! finished. The I/O task suspends while admitting the next target would push
//! the outstanding weight over the limit. A target heavier than the limit is
//! admitted alone, once nothing else is outstanding.
//!
//! Weights are mapped onto semaphore permits in units of `limit / u32::MAX`
//! (rounded up), so byte limits above 4 GiB stay representable. A weight takes
//! its unit count rounded up while the capacity is rounded down, so the
//! permits held never stand for more than `limit`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Weight limiter shared by the executor's pools.
#[derive(Debug)]
pub struct AdmissionControl {
    semaphore: Arc<Semaphore>,
    limit: u64,
    unit: u64,
    capacity: u32,
    outstanding: AtomicU64,
    peak: AtomicU64,
}

impl AdmissionControl {
    /// Creates a limiter admitting at most `limit` outstanding weight.
    #[must_use]
    pub fn new(limit: u64) -> Arc<Self> {
        let limit = limit.max(1);
        let unit = limit.div_ceil(u64::from(u32::MAX)).max(1);
        let capacity = u32::try_from(limit / unit).unwrap_or(u32::MAX);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            limit,
            unit,
            capacity,
            outstanding: AtomicU64::new(0),
            peak: AtomicU64::new(0),
        })
    }

    /// The configured limit.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Weight currently admitted and not yet released.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Largest outstanding weight observed so far.
    #[must_use]
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }

    fn permits_for(&self, weight: u64) -> u32 {
        let units = weight.div_ceil(self.unit).clamp(1, u64::from(self.capacity));
        u32::try_from(units).unwrap_or(self.capacity)
    }

    /// Suspends until `weight` can be admitted.
    ///
    /// Returns `None` only if the limiter was closed.
    pub async fn admit(self: &Arc<Self>, weight: u64) -> Option<AdmissionPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_many_owned(self.permits_for(weight))
            .await
            .ok()?;
        let now = self.outstanding.fetch_add(weight, Ordering::AcqRel) + weight;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Some(AdmissionPermit {
            control: self.clone(),
            weight,
            _permit: permit,
        })
    }

    /// Suspends until every admitted weight has been released.
    pub async fn wait_idle(&self) {
        // Holding every permit at once is only possible when none is outstanding.
        if let Ok(all) = self.semaphore.acquire_many(self.capacity).await {
            drop(all);
        }
    }
}

/// Admission of one target; releases its weight on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    control: Arc<AdmissionControl>,
    weight: u64,
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    /// The admitted weight.
    #[must_use]
    pub fn weight(&self) -> u64 {
        self.weight
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.control.outstanding.fetch_sub(self.weight, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn admits_up_to_the_limit_then_waits() {
        let control = AdmissionControl::new(100);
        let first = control.admit(60).await.unwrap();
        let _second = control.admit(40).await.unwrap();
        assert_eq!(control.outstanding(), 100);

        let waiting = {
            let control = control.clone();
            tokio::spawn(async move { control.admit(30).await.map(|p| p.weight()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(first);
        assert_eq!(waiting.await.unwrap(), Some(30));
        assert_eq!(control.peak(), 100);
    }

    #[tokio::test]
    async fn oversized_weight_is_admitted_alone() {
        let control = AdmissionControl::new(10);
        let big = control.admit(25).await.unwrap();
        assert_eq!(control.outstanding(), 25);

        let small = {
            let control = control.clone();
            tokio::spawn(async move { control.admit(1).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!small.is_finished());
        drop(big);
        assert!(small.await.unwrap());
    }

    #[tokio::test]
    async fn wait_idle_is_a_barrier() {
        let control = AdmissionControl::new(4);
        let permit = control.admit(1).await.unwrap();
        let released = Arc::new(AtomicU64::new(0));

        let task = {
            let released = released.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                released.store(1, Ordering::Release);
                drop(permit);
            })
        };
        control.wait_idle().await;
        assert_eq!(released.load(Ordering::Acquire), 1);
        assert_eq!(control.outstanding(), 0);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn quantized_limit_is_never_exceeded() {
        let limit = 10 * (1u64 << 30);
        let control = AdmissionControl::new(limit);
        assert!(u64::from(control.capacity) * control.unit <= limit);

        let half = 3 * 1_789_569_707;
        let first = control.admit(half).await.unwrap();
        let second = {
            let control = control.clone();
            tokio::spawn(async move { control.admit(half).await.map(|p| p.weight()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());
        assert!(control.outstanding() <= limit);

        drop(first);
        assert_eq!(second.await.unwrap(), Some(half));
        assert!(control.peak() <= limit);
    }

    #[tokio::test]
    async fn weight_at_a_quantized_limit_is_admitted() {
        let limit = 10 * (1u64 << 30);
        let control = AdmissionControl::new(limit);
        let whole = control.admit(limit).await.unwrap();
        assert_eq!(control.outstanding(), limit);
        drop(whole);
        assert_eq!(control.outstanding(), 0);
    }

    #[test]
    fn huge_limits_are_quantized() {
        let control = AdmissionControl::new(u64::MAX);
        assert_eq!(control.permits_for(1), 1);
        assert_eq!(control.permits_for(u64::MAX), control.capacity);
    }
}
