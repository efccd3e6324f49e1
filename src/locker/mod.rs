//! The work-claiming iterator.
//!
//! A [`Locker`] walks one sequence of items and hands the caller only those
//! no other worker has finished or is still holding. Workers coordinate
//! purely through the shared [`Store`]:
//!
//! - absent key: write our timestamp, pause, read it back; a different value
//!   means another worker claimed it in between, so we skip;
//! - done marker: skip;
//! - timestamp within `timeout`: skip, someone owns it;
//! - older timestamp: overwrite it and restart the item.
//!
//! Read-then-write is not atomic across workers, so two of them can still
//! both claim an item inside the jitter window. The window is tunable
//! through [`Jitter`] but never closed.
//!
//! While the caller holds an item a [`Heartbeat`] keeps its lease fresh.
//! Asking for the next item stops the heartbeat and marks the previous one
//! done (or deletes its key). Dropping the locker mid-item only stops the
//! heartbeat; the lease is left to expire so another worker can retry.

pub mod heartbeat;

use std::fmt;
use std::iter::Enumerate;
use std::ops::Range;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use opentelemetry::KeyValue;
use rand::Rng;
use serde::Serialize;
use tracing::{Span, debug, info, warn};

use crate::error::Result;
use crate::lease::{DONE_MARKER, LeaseRecord, encode_timestamp, is_live};
use crate::store::{ItemKey, Store};
use crate::telemetry::lease::{record_decision, start_item_span};
use crate::telemetry::metrics;

pub use heartbeat::{HEARTBEAT_TICK, Heartbeat};

/// What the store said about an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    IsNew,
    AlreadyDone,
    AlreadyStarted,
    Expired,
    /// Lost the claim race between our write and the read-back.
    JustStartedByOther,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsNew => "is new",
            Self::AlreadyDone => "already done",
            Self::AlreadyStarted => "already started",
            Self::Expired => "expired",
            Self::JustStartedByOther => "just started by other",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Starting,
    Restarting,
    Skipping,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Restarting => "restarting",
            Self::Skipping => "skipping",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub status: Status,
    pub action: Action,
}

impl Decision {
    const fn new(status: Status, action: Action) -> Self {
        Self { status, action }
    }

    pub fn claims(&self) -> bool {
        self.action != Action::Skipping
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.status, self.action)
    }
}

/// Randomized pauses that narrow the claim race.
///
/// `before_read` separates taking the timestamp from reading the store;
/// `before_verify` gives a concurrent claimer time to overwrite ours before
/// we read it back. Longer windows catch more races on slow stores at the
/// cost of latency per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jitter {
    pub before_read: Range<Duration>,
    pub before_verify: Range<Duration>,
}

impl Default for Jitter {
    fn default() -> Self {
        Self {
            before_read: Duration::from_millis(1)..Duration::from_millis(2),
            before_verify: Duration::from_millis(5)..Duration::from_millis(10),
        }
    }
}

impl Jitter {
    /// No pauses at all. Only safe with a single worker.
    pub fn none() -> Self {
        Self {
            before_read: Duration::ZERO..Duration::ZERO,
            before_verify: Duration::ZERO..Duration::ZERO,
        }
    }

    fn pause(range: &Range<Duration>) {
        let delay = if range.is_empty() {
            range.start
        } else {
            rand::rng().random_range(range.clone())
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// Settings shared by every locker a scheduler creates.
#[derive(Debug, Clone)]
pub struct LockerConfig {
    /// Lease length. `None` keeps a claim forever, so a crashed worker's
    /// items are never retried automatically.
    pub timeout: Option<Duration>,
    /// Log every Nth decision of a lane. `None` or `Some(0)` disables.
    pub log_step: Option<usize>,
    /// Write the done marker when an item finishes; otherwise delete its key.
    pub mark_as_done: bool,
    pub jitter: Jitter,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            log_step: Some(1),
            mark_as_done: true,
            jitter: Jitter::default(),
        }
    }
}

impl LockerConfig {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn log_step(mut self, log_step: Option<usize>) -> Self {
        self.log_step = log_step;
        self
    }

    pub fn mark_as_done(mut self, mark_as_done: bool) -> Self {
        self.mark_as_done = mark_as_done;
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    fn logs(&self, index: usize) -> bool {
        matches!(self.log_step, Some(step) if step > 0 && index % step == 0)
    }
}

/// Decision counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub started: usize,
    pub restarted: usize,
    pub already_done: usize,
    pub already_started: usize,
    pub lost_race: usize,
}

impl Tally {
    fn record(&mut self, status: Status) {
        match status {
            Status::IsNew => self.started += 1,
            Status::Expired => self.restarted += 1,
            Status::AlreadyDone => self.already_done += 1,
            Status::AlreadyStarted => self.already_started += 1,
            Status::JustStartedByOther => self.lost_race += 1,
        }
    }

    /// Items handed to the caller.
    pub fn claimed(&self) -> usize {
        self.started + self.restarted
    }

    pub fn skipped(&self) -> usize {
        self.already_done + self.already_started + self.lost_race
    }

    pub fn merge(&mut self, other: &Tally) {
        self.started += other.started;
        self.restarted += other.restarted;
        self.already_done += other.already_done;
        self.already_started += other.already_started;
        self.lost_race += other.lost_race;
    }
}

/// Run the claim protocol for one key and report the outcome.
///
/// When the decision claims the item, our timestamp is already in the store.
pub fn decide<S: Store + ?Sized>(
    store: &S,
    key: &str,
    timeout: Option<Duration>,
    jitter: &Jitter,
) -> Result<Decision> {
    let now = Utc::now();
    let stamp = encode_timestamp(now);
    Jitter::pause(&jitter.before_read);

    let Some(current) = store.get(key)? else {
        store.set(key, &stamp)?;
        Jitter::pause(&jitter.before_verify);
        let decision = if store.get(key)?.as_deref() == Some(stamp.as_slice()) {
            Decision::new(Status::IsNew, Action::Starting)
        } else {
            Decision::new(Status::JustStartedByOther, Action::Skipping)
        };
        return Ok(decision);
    };

    let decision = match LeaseRecord::decode(&current) {
        Some(LeaseRecord::Done) => Decision::new(Status::AlreadyDone, Action::Skipping),
        Some(LeaseRecord::Claimed(at)) if is_live(at, now, timeout) => {
            Decision::new(Status::AlreadyStarted, Action::Skipping)
        }
        Some(LeaseRecord::Claimed(_)) => {
            store.set(key, &stamp)?;
            Decision::new(Status::Expired, Action::Restarting)
        }
        None => {
            warn!(key, len = current.len(), "unreadable lease record, reclaiming");
            store.set(key, &stamp)?;
            Decision::new(Status::Expired, Action::Restarting)
        }
    };
    Ok(decision)
}

/// The item currently in the caller's hands.
struct Held {
    key: ItemKey,
    logged: bool,
    span: Span,
    heartbeat: Option<Heartbeat>,
    since: Instant,
}

impl Held {
    fn release<S: Store + ?Sized>(self, store: &S, mark_as_done: bool) -> Result<()> {
        let Held {
            key,
            logged,
            span,
            heartbeat,
            since,
        } = self;

        // Join before finalizing so no renewal can land after the marker.
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop();
        }

        let outcome = if mark_as_done {
            store.set(key.key(), DONE_MARKER)?;
            "done"
        } else {
            store.delete(key.key())?;
            "released"
        };

        metrics::lease_finalized().add(1, &[KeyValue::new("outcome", outcome)]);
        metrics::item_duration_ms().record(
            since.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("outcome", outcome)],
        );
        if logged {
            span.in_scope(|| info!("'{}' done", key.label()));
        }
        Ok(())
    }

    fn abandon(self) {
        if let Some(heartbeat) = self.heartbeat {
            heartbeat.stop();
        }
        self.span.in_scope(|| {
            debug!("'{}' abandoned, lease left to expire", self.key.label());
        });
    }
}

/// Iterator over the items of one sequence this worker should process.
///
/// Yields `Err` when a store operation fails for an item; iteration may
/// continue with the following items.
pub struct Locker<I, S> {
    items: Enumerate<I>,
    store: Arc<S>,
    config: LockerConfig,
    held: Option<Held>,
    tally: Tally,
}

impl<I, S> Locker<I, S>
where
    I: Iterator,
    I::Item: Serialize,
    S: Store + 'static,
{
    pub fn new(items: impl IntoIterator<IntoIter = I>, store: S, config: LockerConfig) -> Self {
        Self::shared(items, Arc::new(store), config)
    }

    /// Like [`Locker::new`] for a store already shared with other lockers.
    pub fn shared(
        items: impl IntoIterator<IntoIter = I>,
        store: Arc<S>,
        config: LockerConfig,
    ) -> Self {
        Self {
            items: items.into_iter().enumerate(),
            store,
            config,
            held: None,
            tally: Tally::default(),
        }
    }

    /// Finalize the item handed out last, without pulling the next one.
    ///
    /// Called by `next()` anyway; useful before a long pause between items.
    pub fn finish(&mut self) -> Result<()> {
        match self.held.take() {
            Some(held) => held.release(&*self.store, self.config.mark_as_done),
            None => Ok(()),
        }
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    pub fn config(&self) -> &LockerConfig {
        &self.config
    }

    /// Decide on one item; on a claim, start its heartbeat and hold it.
    fn claim(&mut self, index: usize, item: &I::Item) -> Result<bool> {
        let key = ItemKey::new(item)?;
        let span = start_item_span(key.key(), key.label());

        let decision = span.in_scope(|| {
            decide(&*self.store, key.key(), self.config.timeout, &self.config.jitter)
        })?;

        record_decision(&span, decision.status.as_str(), decision.action.as_str());
        metrics::lease_decisions().add(
            1,
            &[
                KeyValue::new("status", decision.status.as_str()),
                KeyValue::new("action", decision.action.as_str()),
            ],
        );
        self.tally.record(decision.status);

        let logged = self.config.logs(index);
        if logged {
            span.in_scope(|| info!("'{}' {}", key.label(), decision));
        }
        if !decision.claims() {
            return Ok(false);
        }

        // Unbounded leases never expire, and a lease too short to halve has
        // nothing worth renewing.
        let heartbeat = match self.config.timeout {
            Some(timeout) if !(timeout / 2).is_zero() => Some(Heartbeat::start(
                Arc::clone(&self.store),
                key.key().to_string(),
                timeout,
                span.clone(),
            )?),
            _ => None,
        };

        self.held = Some(Held {
            key,
            logged,
            span,
            heartbeat,
            since: Instant::now(),
        });
        Ok(true)
    }
}

impl<I, S> Iterator for Locker<I, S>
where
    I: Iterator,
    I::Item: Serialize,
    S: Store + 'static,
{
    type Item = Result<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.finish() {
            return Some(Err(e));
        }

        loop {
            let (index, item) = self.items.next()?;
            match self.claim(index, &item) {
                Ok(true) => return Some(Ok(item)),
                Ok(false) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<I, S> Drop for Locker<I, S> {
    fn drop(&mut self) {
        if let Some(held) = self.held.take() {
            held.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeDelta;

    #[test]
    fn decisions_render_as_log_phrases() {
        let decision = Decision::new(Status::JustStartedByOther, Action::Skipping);
        assert_eq!(decision.to_string(), "just started by other, skipping");
        assert_eq!(
            Decision::new(Status::Expired, Action::Restarting).to_string(),
            "expired, restarting"
        );
    }

    #[test]
    fn log_step_selects_every_nth_item() {
        let every_third = LockerConfig::default().log_step(Some(3));
        let logged: Vec<usize> = (0..7).filter(|i| every_third.logs(*i)).collect();
        assert_eq!(logged, vec![0, 3, 6]);

        assert!(!LockerConfig::default().log_step(None).logs(0));
        assert!(!LockerConfig::default().log_step(Some(0)).logs(0));
    }

    #[test]
    fn decide_claims_absent_keys() {
        let store = MemoryStore::new();
        let decision = decide(&store, "a", None, &Jitter::none()).unwrap();

        assert_eq!(decision, Decision::new(Status::IsNew, Action::Starting));
        let value = store.get("a").unwrap().unwrap();
        assert!(matches!(
            LeaseRecord::decode(&value),
            Some(LeaseRecord::Claimed(_))
        ));
    }

    #[test]
    fn decide_respects_live_and_expired_leases() {
        let store = MemoryStore::new();
        let timeout = Some(Duration::from_secs(10));

        store.set("live", &encode_timestamp(Utc::now())).unwrap();
        store
            .set("stale", &encode_timestamp(Utc::now() - TimeDelta::seconds(30)))
            .unwrap();

        let live = decide(&store, "live", timeout, &Jitter::none()).unwrap();
        assert_eq!(live, Decision::new(Status::AlreadyStarted, Action::Skipping));

        let stale = decide(&store, "stale", timeout, &Jitter::none()).unwrap();
        assert_eq!(stale, Decision::new(Status::Expired, Action::Restarting));
    }

    #[test]
    fn decide_reclaims_unreadable_records() {
        let store = MemoryStore::new();
        store.set("junk", b"not a lease").unwrap();

        let decision = decide(&store, "junk", None, &Jitter::none()).unwrap();
        assert_eq!(decision.status, Status::Expired);
        assert_eq!(store.get("junk").unwrap().unwrap().len(), 8);
    }

    #[test]
    fn tally_splits_claims_and_skips() {
        let mut tally = Tally::default();
        for status in [
            Status::IsNew,
            Status::Expired,
            Status::AlreadyDone,
            Status::AlreadyDone,
            Status::JustStartedByOther,
        ] {
            tally.record(status);
        }
        assert_eq!(tally.claimed(), 2);
        assert_eq!(tally.skipped(), 3);
    }
}
