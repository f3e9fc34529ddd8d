//! Handle pool
//!
//! A fixed arena of handle slots. A slot is either idle or in use, and an
//! in-use slot owns the job bound to it, so a handle can never sit in both
//! states and a job can never be bound to two handles. Transport contexts
//! are created lazily on first use and kept across jobs.
//!
//! The pool is owned by the event loop thread and is not shared.

/// Index of a slot in the pool
pub(crate) type SlotId = usize;

enum SlotState<J> {
    Idle,
    InUse(J),
}

struct Slot<C, J> {
    connection: Option<C>,
    state: SlotState<J>,
}

/// Result of trying to bind a job to a handle
pub(crate) enum Acquire<J, E> {
    Bound(SlotId),
    /// Every handle is busy; the job is handed back
    Full(J),
    /// Creating the transport context failed; the job is handed back
    Failed(J, E),
}

pub(crate) struct HandlePool<C, J> {
    slots: Vec<Slot<C, J>>,
    peak_in_use: usize,
}

impl<C, J> HandlePool<C, J> {
    pub(crate) fn new(max_handles: usize) -> Self {
        let slots = (0..max_handles)
            .map(|_| Slot {
                connection: None,
                state: SlotState::Idle,
            })
            .collect();
        Self {
            slots,
            peak_in_use: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::InUse(_)))
            .count()
    }

    pub(crate) fn peak_in_use(&self) -> usize {
        self.peak_in_use
    }

    pub(crate) fn has_idle(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| matches!(slot.state, SlotState::Idle))
    }

    /// Number of slots holding a live transport context
    pub(crate) fn connected(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.connection.is_some())
            .count()
    }

    /// Bind `job` to an idle handle, preferring one that is already connected.
    pub(crate) fn acquire<E>(
        &mut self,
        job: J,
        connect: impl FnOnce() -> Result<C, E>,
    ) -> Acquire<J, E> {
        let idle = |slot: &Slot<C, J>| matches!(slot.state, SlotState::Idle);
        let candidate = self
            .slots
            .iter()
            .position(|slot| idle(slot) && slot.connection.is_some())
            .or_else(|| self.slots.iter().position(idle));

        let Some(id) = candidate else {
            return Acquire::Full(job);
        };

        let slot = &mut self.slots[id];
        if slot.connection.is_none() {
            match connect() {
                Ok(connection) => slot.connection = Some(connection),
                Err(e) => return Acquire::Failed(job, e),
            }
        }
        slot.state = SlotState::InUse(job);

        let in_use = self.in_use();
        self.peak_in_use = self.peak_in_use.max(in_use);
        Acquire::Bound(id)
    }

    /// The connection and job of an in-use slot
    pub(crate) fn get_mut(&mut self, id: SlotId) -> Option<(&C, &mut J)> {
        let slot = self.slots.get_mut(id)?;
        match (&slot.connection, &mut slot.state) {
            (Some(connection), SlotState::InUse(job)) => Some((connection, job)),
            _ => None,
        }
    }

    /// Return a handle to the idle set, handing back its job.
    pub(crate) fn release(&mut self, id: SlotId) -> Option<J> {
        let slot = self.slots.get_mut(id)?;
        match std::mem::replace(&mut slot.state, SlotState::Idle) {
            SlotState::InUse(job) => Some(job),
            SlotState::Idle => None,
        }
    }

    /// Release every in-use handle whose job matches `predicate`.
    pub(crate) fn release_matching(&mut self, mut predicate: impl FnMut(&J) -> bool) -> Vec<J> {
        let ids: Vec<SlotId> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| match &slot.state {
                SlotState::InUse(job) => predicate(job),
                SlotState::Idle => false,
            })
            .map(|(id, _)| id)
            .collect();

        ids.into_iter().filter_map(|id| self.release(id)).collect()
    }

    /// Drop all transport contexts. Returns how many were closed.
    pub(crate) fn close_connections(&mut self) -> usize {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.connection.take())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_ok() -> Result<&'static str, ()> {
        Ok("conn")
    }

    #[test]
    fn test_acquire_until_full() {
        let mut pool: HandlePool<&str, u32> = HandlePool::new(2);
        assert_eq!(pool.capacity(), 2);

        assert!(matches!(pool.acquire(1, connect_ok), Acquire::Bound(_)));
        assert!(matches!(pool.acquire(2, connect_ok), Acquire::Bound(_)));
        assert!(matches!(pool.acquire(3, connect_ok), Acquire::Full(3)));

        assert_eq!(pool.in_use(), 2);
        assert!(!pool.has_idle());
        assert_eq!(pool.peak_in_use(), 2);
    }

    #[test]
    fn test_release_returns_job_and_frees_slot() {
        let mut pool: HandlePool<&str, u32> = HandlePool::new(1);
        let Acquire::Bound(id) = pool.acquire(7, connect_ok) else {
            panic!("expected a bound handle");
        };

        assert_eq!(pool.release(id), Some(7));
        assert_eq!(pool.release(id), None);
        assert_eq!(pool.in_use(), 0);
        assert!(pool.has_idle());
    }

    #[test]
    fn test_connection_reused_across_jobs() {
        let mut pool: HandlePool<u32, u32> = HandlePool::new(4);
        let mut connects = 0;

        for job in 0..10 {
            let result = pool.acquire(job, || {
                connects += 1;
                Ok::<_, ()>(connects)
            });
            let Acquire::Bound(id) = result else {
                panic!("expected a bound handle");
            };
            pool.release(id);
        }

        assert_eq!(connects, 1);
        assert_eq!(pool.connected(), 1);
    }

    #[test]
    fn test_connect_failure_hands_job_back() {
        let mut pool: HandlePool<&str, u32> = HandlePool::new(1);
        let result = pool.acquire(5, || Err("boom"));
        assert!(matches!(result, Acquire::Failed(5, "boom")));
        assert_eq!(pool.in_use(), 0);
        assert!(pool.has_idle());
    }

    #[test]
    fn test_get_mut_only_for_in_use_slots() {
        let mut pool: HandlePool<&str, u32> = HandlePool::new(2);
        let Acquire::Bound(id) = pool.acquire(1, connect_ok) else {
            panic!("expected a bound handle");
        };

        let (connection, job) = pool.get_mut(id).unwrap();
        assert_eq!(*connection, "conn");
        *job = 42;

        assert_eq!(pool.release(id), Some(42));
        assert!(pool.get_mut(id).is_none());
        assert!(pool.get_mut(99).is_none());
    }

    #[test]
    fn test_release_matching() {
        let mut pool: HandlePool<&str, u32> = HandlePool::new(4);
        for job in [1, 2, 3, 4] {
            pool.acquire(job, connect_ok);
        }

        let mut released = pool.release_matching(|job| job % 2 == 0);
        released.sort();
        assert_eq!(released, vec![2, 4]);
        assert_eq!(pool.in_use(), 2);
        assert_eq!(pool.peak_in_use(), 4);
    }

    #[test]
    fn test_close_connections() {
        let mut pool: HandlePool<&str, u32> = HandlePool::new(3);
        for job in [1, 2] {
            if let Acquire::Bound(id) = pool.acquire(job, connect_ok) {
                pool.release(id);
            }
        }
        // Second job reused the first connection
        assert_eq!(pool.close_connections(), 1);
        assert_eq!(pool.connected(), 0);
    }
}
