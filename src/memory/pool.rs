//! Pool of per-execution memory regions
//!
//! The pool allocates N device regions once, each large enough for the
//! transient memory model, and leases them out as [`MemoryManager`]s. A lease
//! returns its region when dropped, so aborted executions never leak one.
//!
//! Waiters are served in arrival order: every blocked caller takes a ticket
//! and only the oldest ticket may claim a freed region.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{DeviceMemBlock, MemoryManager, MemoryModel};
use crate::device::{DeviceBuffer, SharedDevice};
use crate::error::{ForgeResult, MemForgeError};

#[derive(Debug)]
struct PoolState {
    /// Free region indices
    available: VecDeque<usize>,
    /// Tickets of blocked callers, oldest first
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

impl PoolState {
    fn enqueue(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiters.push_back(ticket);
        ticket
    }

    /// Claim a region if `ticket` is at the head of the queue
    fn claim(&mut self, ticket: u64) -> Option<usize> {
        if self.waiters.front() != Some(&ticket) {
            return None;
        }
        let slot = self.available.pop_front()?;
        self.waiters.pop_front();
        Some(slot)
    }

    fn abandon(&mut self, ticket: u64) {
        self.waiters.retain(|&t| t != ticket);
    }
}

/// Fixed set of memory managers shared by concurrent executions
///
/// Owns the constant block, the memory model and N private regions for the
/// whole lifetime of the compiled network.
#[derive(Debug)]
pub struct MemoryManagerPool {
    constants: DeviceMemBlock,
    model: MemoryModel,
    regions: Vec<DeviceBuffer>,
    state: Mutex<PoolState>,
    released: Condvar,
}

impl MemoryManagerPool {
    /// Allocate `num_streams` regions sized to `model` on `device`
    ///
    /// # Errors
    /// - `InvalidConfiguration` if `num_streams` is zero
    /// - `ModelNotLoaded` if the model has no bytes
    /// - `Device` if a region cannot be allocated (already allocated regions
    ///   are released)
    pub fn new(
        num_streams: usize,
        constants: DeviceMemBlock,
        model: MemoryModel,
        device: &SharedDevice,
    ) -> ForgeResult<Self> {
        if num_streams == 0 {
            return Err(MemForgeError::InvalidConfiguration(
                "memory manager pool needs at least one stream".to_string(),
            ));
        }
        let region_size = model.device_memory_block_size();
        if region_size == 0 {
            return Err(MemForgeError::ModelNotLoaded);
        }

        let regions = (0..num_streams)
            .map(|_| DeviceBuffer::new(device, region_size))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            "MemoryManagerPool created: {} regions x {} bytes, constant block {} bytes",
            num_streams,
            region_size,
            constants.size()
        );

        Ok(Self {
            constants,
            model,
            regions,
            state: Mutex::new(PoolState {
                available: (0..num_streams).collect(),
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            released: Condvar::new(),
        })
    }

    /// Number of managers (N)
    pub fn size(&self) -> usize {
        self.regions.len()
    }

    /// Number of managers not currently leased
    pub fn available(&self) -> usize {
        self.lock_state().available.len()
    }

    /// Number of callers blocked in `acquire`
    pub fn waiting(&self) -> usize {
        self.lock_state().waiters.len()
    }

    pub fn constant_block(&self) -> &DeviceMemBlock {
        &self.constants
    }

    pub fn memory_model(&self) -> &MemoryModel {
        &self.model
    }

    /// Lease a manager, blocking until one is free
    pub fn acquire(&self) -> ForgeResult<MemoryManager<'_>> {
        let mut state = self.lock_state();
        let ticket = state.enqueue();
        loop {
            if let Some(slot) = state.claim(ticket) {
                self.wake_next(&state);
                return Ok(self.lease(slot));
            }
            state = self.wait(state);
        }
    }

    /// Lease a manager, giving up after `timeout`
    pub fn acquire_timeout(&self, timeout: Duration) -> ForgeResult<Option<MemoryManager<'_>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state();
        let ticket = state.enqueue();
        loop {
            if let Some(slot) = state.claim(ticket) {
                self.wake_next(&state);
                return Ok(Some(self.lease(slot)));
            }

            let now = Instant::now();
            if now >= deadline {
                state.abandon(ticket);
                // The next waiter may be able to proceed now that we left the head
                self.wake_next(&state);
                tracing::debug!("MemoryManagerPool: acquire timed out after {:?}", timeout);
                return Ok(None);
            }
            state = self.wait_timeout(state, deadline - now);
        }
    }

    /// Lease a manager if one is free and nobody is waiting
    pub fn try_acquire(&self) -> ForgeResult<Option<MemoryManager<'_>>> {
        let mut state = self.lock_state();
        if !state.waiters.is_empty() {
            return Ok(None);
        }
        Ok(state.available.pop_front().map(|slot| self.lease(slot)))
    }

    /// Return a manager to the pool
    ///
    /// Equivalent to dropping the lease.
    pub fn release(&self, manager: MemoryManager<'_>) {
        if !manager.belongs_to(self) {
            tracing::warn!(
                "MemoryManagerPool::release: manager {} belongs to another pool",
                manager.slot()
            );
        }
        drop(manager);
    }

    pub(crate) fn region(&self, slot: usize) -> Option<&DeviceBuffer> {
        self.regions.get(slot)
    }

    /// Put `slot` back into the available set and wake waiters
    pub(crate) fn return_slot(&self, slot: usize) {
        let mut state = self.lock_state();
        debug_assert!(!state.available.contains(&slot), "slot {} released twice", slot);
        state.available.push_back(slot);
        tracing::trace!(
            "MemoryManagerPool: released slot {} ({} available)",
            slot,
            state.available.len()
        );
        self.wake_next(&state);
    }

    fn lease(&self, slot: usize) -> MemoryManager<'_> {
        tracing::trace!("MemoryManagerPool: leased slot {}", slot);
        MemoryManager::new(self, slot)
    }

    fn wake_next(&self, state: &PoolState) {
        if !state.waiters.is_empty() && !state.available.is_empty() {
            self.released.notify_all();
        }
    }

    /// Lock the state, recovering from poisoning
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("MemoryManagerPool: state lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Block on `released`, keeping the guard if another holder panicked
    fn wait<'a>(&self, state: MutexGuard<'a, PoolState>) -> MutexGuard<'a, PoolState> {
        match self.released.wait(state) {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("MemoryManagerPool: state lock poisoned while waiting, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn wait_timeout<'a>(
        &self,
        state: MutexGuard<'a, PoolState>,
        timeout: Duration,
    ) -> MutexGuard<'a, PoolState> {
        match self.released.wait_timeout(state, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => {
                tracing::error!("MemoryManagerPool: state lock poisoned while waiting, recovering");
                poisoned.into_inner().0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostDevice;
    use crate::memory::{BufferId, MemoryModelBuilder};
    use std::sync::Arc;

    fn model(size: usize) -> MemoryModel {
        let mut builder = MemoryModelBuilder::new();
        builder.add_allocation(BufferId(0), 0, 0, size).unwrap();
        builder.build()
    }

    fn pool(n: usize) -> (Arc<HostDevice>, MemoryManagerPool) {
        let device = Arc::new(HostDevice::new(1 << 20));
        let shared: SharedDevice = device.clone();
        let pool = MemoryManagerPool::new(n, DeviceMemBlock::empty(), model(64), &shared).unwrap();
        (device, pool)
    }

    #[test]
    fn test_allocates_one_region_per_stream() {
        let (device, pool) = pool(3);
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.available(), 3);
        assert_eq!(device.live_allocations(), 3);
        drop(pool);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_zero_streams_rejected() {
        let device: SharedDevice = Arc::new(HostDevice::new(1 << 20));
        let result = MemoryManagerPool::new(0, DeviceMemBlock::empty(), model(64), &device);
        assert!(matches!(result, Err(MemForgeError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_empty_model_rejected() {
        let device: SharedDevice = Arc::new(HostDevice::new(1 << 20));
        let result =
            MemoryManagerPool::new(2, DeviceMemBlock::empty(), MemoryModel::default(), &device);
        assert!(matches!(result, Err(MemForgeError::ModelNotLoaded)));
    }

    #[test]
    fn test_allocation_failure_releases_partial_regions() {
        let device = Arc::new(HostDevice::new(100));
        let shared: SharedDevice = device.clone();
        let result = MemoryManagerPool::new(3, DeviceMemBlock::empty(), model(40), &shared);
        assert!(matches!(result, Err(MemForgeError::Device(_))));
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_leases_are_distinct() {
        let (_device, pool) = pool(2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.slot(), b.slot());
        assert_ne!(a.region_ptr(), b.region_ptr());
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().unwrap().is_none());
    }

    #[test]
    fn test_drop_returns_manager() {
        let (_device, pool) = pool(1);
        {
            let _lease = pool.acquire().unwrap();
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);

        let lease = pool.try_acquire().unwrap().unwrap();
        pool.release(lease);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_acquire_timeout_expires() {
        let (_device, pool) = pool(1);
        let _held = pool.acquire().unwrap();
        let start = Instant::now();
        let result = pool.acquire_timeout(Duration::from_millis(30)).unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(pool.waiting(), 0);
    }

    #[test]
    fn test_acquire_timeout_succeeds_when_free() {
        let (_device, pool) = pool(1);
        let lease = pool.acquire_timeout(Duration::from_millis(10)).unwrap();
        assert!(lease.is_some());
    }

    #[test]
    fn test_blocked_acquire_wakes_on_release() {
        let (_device, pool) = pool(1);
        let held = pool.acquire().unwrap();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| pool.acquire().map(|lease| lease.slot()));
            while pool.waiting() == 0 {
                std::thread::yield_now();
            }
            drop(held);
            assert_eq!(waiter.join().unwrap().unwrap(), 0);
        });
        assert_eq!(pool.available(), 1);
    }

    /// Panic while holding the state lock
    fn poison(pool: &MemoryManagerPool) {
        let result = std::thread::scope(|s| {
            s.spawn(|| {
                let _state = pool.state.lock().unwrap();
                panic!("holder aborted");
            })
            .join()
        });
        assert!(result.is_err());
        assert!(pool.state.is_poisoned());
    }

    #[test]
    fn test_poisoned_state_still_leases() {
        let (_device, pool) = pool(1);
        poison(&pool);

        let lease = pool.acquire().unwrap();
        assert!(pool.try_acquire().unwrap().is_none());
        drop(lease);
        assert!(pool.acquire_timeout(Duration::from_millis(10)).unwrap().is_some());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_waiter_survives_poisoning_while_blocked() {
        let (_device, pool) = pool(1);
        let held = pool.acquire().unwrap();

        std::thread::scope(|s| {
            let blocking = s.spawn(|| pool.acquire().map(|lease| lease.slot()));
            let timed = s.spawn(|| {
                pool.acquire_timeout(Duration::from_secs(10))
                    .map(|lease| lease.map(|lease| lease.slot()))
            });
            while pool.waiting() < 2 {
                std::thread::yield_now();
            }
            poison(&pool);
            drop(held);

            assert_eq!(blocking.join().unwrap().unwrap(), 0);
            assert_eq!(timed.join().unwrap().unwrap(), Some(0));
        });
        assert_eq!(pool.waiting(), 0);
        assert_eq!(pool.available(), 1);
    }
}
