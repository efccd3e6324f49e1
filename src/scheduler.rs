//! Lane chaining on top of the locker.
//!
//! ```
//! use worklock::locker::LockerConfig;
//! use worklock::scheduler::Scheduler;
//! use worklock::store::MemoryStore;
//! use std::time::Duration;
//!
//! let store = MemoryStore::new();
//! let config = LockerConfig::default().timeout(Duration::from_secs(10));
//!
//! let scheduler = Scheduler::new(store.clone(), config) << vec!["a", "b"] << vec!["c"];
//! let done: Vec<&str> = scheduler.into_iter().collect::<Result<_, _>>().unwrap();
//! assert_eq!(done, vec!["a", "b", "c"]);
//! ```

use std::collections::VecDeque;
use std::ops::Shl;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;
use crate::locker::{Locker, LockerConfig, Tally};
use crate::store::Store;

type Lane<T> = Box<dyn Iterator<Item = T> + Send>;

/// Ordered list of lanes run one after another through a shared locker
/// configuration. Append lanes with `<<` or [`Scheduler::lane`].
pub struct Scheduler<T, S> {
    store: Arc<S>,
    config: LockerConfig,
    lanes: VecDeque<Lane<T>>,
}

impl<T, S> Scheduler<T, S>
where
    T: Serialize + 'static,
    S: Store + 'static,
{
    pub fn new(store: S, config: LockerConfig) -> Self {
        Self::shared(Arc::new(store), config)
    }

    pub fn shared(store: Arc<S>, config: LockerConfig) -> Self {
        Self {
            store,
            config,
            lanes: VecDeque::new(),
        }
    }

    /// Append a lane.
    pub fn lane<L>(mut self, lane: L) -> Self
    where
        L: IntoIterator<Item = T>,
        L::IntoIter: Send + 'static,
    {
        self.lanes.push_back(Box::new(lane.into_iter()));
        self
    }

    /// Lease length for every lane.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn log_step(mut self, log_step: Option<usize>) -> Self {
        self.config.log_step = log_step;
        self
    }

    pub fn mark_as_done(mut self, mark_as_done: bool) -> Self {
        self.config.mark_as_done = mark_as_done;
        self
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub fn config(&self) -> &LockerConfig {
        &self.config
    }
}

impl<T, S, L> Shl<L> for Scheduler<T, S>
where
    T: Serialize + 'static,
    S: Store + 'static,
    L: IntoIterator<Item = T>,
    L::IntoIter: Send + 'static,
{
    type Output = Self;

    fn shl(self, lane: L) -> Self {
        self.lane(lane)
    }
}

impl<T, S> IntoIterator for Scheduler<T, S>
where
    T: Serialize + 'static,
    S: Store + 'static,
{
    type Item = Result<T>;
    type IntoIter = SchedulerIter<T, S>;

    fn into_iter(self) -> SchedulerIter<T, S> {
        SchedulerIter {
            store: self.store,
            config: self.config,
            lanes: self.lanes,
            current: None,
            finished: Tally::default(),
        }
    }
}

/// Items from every lane, in lane order. Lane N+1 is not touched until
/// lane N is exhausted.
pub struct SchedulerIter<T, S> {
    store: Arc<S>,
    config: LockerConfig,
    lanes: VecDeque<Lane<T>>,
    current: Option<Locker<Lane<T>, S>>,
    /// Decisions of lanes already drained.
    finished: Tally,
}

impl<T, S> SchedulerIter<T, S>
where
    T: Serialize + 'static,
    S: Store + 'static,
{
    /// Decision counts so far, across lanes.
    pub fn tally(&self) -> Tally {
        let mut tally = self.finished;
        if let Some(locker) = &self.current {
            tally.merge(locker.tally());
        }
        tally
    }

    /// Finalize the item handed out last without pulling the next one.
    pub fn finish(&mut self) -> Result<()> {
        match self.current.as_mut() {
            Some(locker) => locker.finish(),
            None => Ok(()),
        }
    }

    /// Lanes not started yet.
    pub fn remaining_lanes(&self) -> usize {
        self.lanes.len()
    }
}

impl<T, S> Iterator for SchedulerIter<T, S>
where
    T: Serialize + 'static,
    S: Store + 'static,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        loop {
            if let Some(locker) = self.current.as_mut() {
                if let Some(item) = locker.next() {
                    return Some(item);
                }
                self.finished.merge(locker.tally());
                self.current = None;
            }

            let lane = self.lanes.pop_front()?;
            self.current = Some(Locker::shared(
                lane,
                Arc::clone(&self.store),
                self.config.clone(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locker::Jitter;
    use crate::store::MemoryStore;

    fn config() -> LockerConfig {
        LockerConfig::default().jitter(Jitter::none())
    }

    #[test]
    fn shl_and_lane_append_in_order() {
        let scheduler = Scheduler::new(MemoryStore::new(), config())
            .lane(vec![1, 2])
            << vec![3]
            << (4..6);
        assert_eq!(scheduler.len(), 3);

        let items: Vec<i32> = scheduler.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn empty_scheduler_yields_nothing() {
        let scheduler: Scheduler<String, _> = Scheduler::new(MemoryStore::new(), config());
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.into_iter().count(), 0);
    }

    #[test]
    fn setters_update_the_shared_config() {
        let scheduler: Scheduler<&str, _> = Scheduler::new(MemoryStore::new(), config())
            .with_timeout(Duration::from_secs(30))
            .log_step(Some(5))
            .mark_as_done(false);

        let config = scheduler.config();
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.log_step, Some(5));
        assert!(!config.mark_as_done);
        assert_eq!(config.jitter, Jitter::none());
    }

    #[test]
    fn release_setter_reaches_every_lane() {
        let store = MemoryStore::new();
        let scheduler = Scheduler::new(store.clone(), config()).mark_as_done(false)
            << vec!["a"]
            << vec!["b"];
        assert_eq!(scheduler.into_iter().count(), 2);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn built_iterators_move_to_worker_threads() {
        let store = MemoryStore::new();
        let mut iter = (Scheduler::new(store.clone(), config()) << vec![1, 2] << (3..5)).into_iter();
        assert_eq!(iter.next().unwrap().unwrap(), 1);

        let rest = std::thread::spawn(move || {
            iter.map(|r| r.unwrap()).collect::<Vec<i32>>()
        })
        .join()
        .unwrap();
        assert_eq!(rest, vec![2, 3, 4]);
        assert_eq!(store.len().unwrap(), 4);
    }

    #[test]
    fn lanes_are_drained_one_at_a_time() {
        let scheduler = Scheduler::new(MemoryStore::new(), config()) << vec!["a", "b"] << vec!["c"];
        let mut iter = scheduler.into_iter();

        assert_eq!(iter.next().unwrap().unwrap(), "a");
        assert_eq!(iter.remaining_lanes(), 1);
        assert_eq!(iter.next().unwrap().unwrap(), "b");
        assert_eq!(iter.remaining_lanes(), 1);
        assert_eq!(iter.next().unwrap().unwrap(), "c");
        assert_eq!(iter.remaining_lanes(), 0);
        assert!(iter.next().is_none());
        assert_eq!(iter.tally().started, 3);
    }
}
