// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! First-class synchronous events.
//!
//! A signal is a composable description of a synchronizable event with
//! three faces: `poll` (cheap readiness probe), `commit` (atomic attempt
//! to consume the event), and `block` (install a subscription for a
//! future firing). `sync` turns a signal into a task that suspends until
//! the signal fires and returns the delivered value.
//!
//! Composing never runs anything: `commit` and `block` hand back task
//! descriptions whose side effects only happen when a driver steps them.

use std::marker::PhantomData;
use std::sync;
use std::sync::{Arc, OnceLock};

use crate::claim::{Claim, ClaimRef, ClaimState};
use crate::task::{self, Task};

/// Cloneable delivery callback handing a fired signal's value to the
/// blocked syncer.
pub struct Deliver<A> {
    callback: Arc<dyn Fn(A) + Send + Sync>,
}

impl<A> Clone for Deliver<A> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
        }
    }
}

impl<A> Deliver<A> {
    pub fn new(f: impl Fn(A) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(f),
        }
    }

    pub fn call(&self, value: A) {
        (self.callback)(value)
    }
}

/// A synchronizable event.
pub trait Signal: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Best-effort, side-effect-free probe: could `commit` currently
    /// succeed?
    fn poll(&self) -> bool;

    /// Atomic attempt to consume the event. `Some` if the signal fired,
    /// `None` if it no longer could. Runs under the signal's own
    /// serialization (a channel signal holds the channel mutex).
    fn commit(&self) -> Task<Option<Self::Output>>;

    /// Register with the signal so a future firing transitions `claim`
    /// to `Synced` and delivers through `deliver`.
    fn block(&self, claim: ClaimRef, deliver: Deliver<Self::Output>) -> Task<()>;
}

/// Boxed object form, used to mix signal shapes in one selection.
pub type BoxSignal<A> = Box<dyn Signal<Output = A>>;

impl<S: Signal + ?Sized> Signal for Box<S> {
    type Output = S::Output;

    fn poll(&self) -> bool {
        (**self).poll()
    }

    fn commit(&self) -> Task<Option<S::Output>> {
        (**self).commit()
    }

    fn block(&self, claim: ClaimRef, deliver: Deliver<S::Output>) -> Task<()> {
        (**self).block(claim, deliver)
    }
}

/// Combinator methods available on every signal.
pub trait SignalExt: Signal + Sized {
    /// Transform the value the signal delivers.
    fn map<B, F>(self, transform: F) -> Map<Self, F>
    where
        B: Send + 'static,
        F: Fn(Self::Output) -> B + Send + Sync + 'static,
    {
        Map {
            inner: self,
            transform: Arc::new(transform),
        }
    }

    fn boxed(self) -> BoxSignal<Self::Output> {
        Box::new(self)
    }
}

impl<S: Signal> SignalExt for S {}

/// Signal that always fires immediately with a copy of its value.
pub struct Always<A> {
    value: A,
}

/// Build a signal that is always ready to fire with `value`.
pub fn always<A>(value: A) -> Always<A>
where
    A: Clone + Send + Sync + 'static,
{
    Always { value }
}

impl<A> Signal for Always<A>
where
    A: Clone + Send + Sync + 'static,
{
    type Output = A;

    fn poll(&self) -> bool {
        true
    }

    fn commit(&self) -> Task<Option<A>> {
        Task::done(Some(self.value.clone()))
    }

    fn block(&self, claim: ClaimRef, deliver: Deliver<A>) -> Task<()> {
        let value = self.value.clone();
        Task::delay(move || {
            if claim
                .transition(ClaimState::Waiting, ClaimState::Synced)
                .is_ok()
            {
                deliver.call(value);
            }
            Task::done(())
        })
    }
}

/// Signal that never fires.
pub struct Never<A> {
    marker: PhantomData<fn() -> A>,
}

pub fn never<A: Send + 'static>() -> Never<A> {
    Never {
        marker: PhantomData,
    }
}

impl<A: Send + 'static> Signal for Never<A> {
    type Output = A;

    fn poll(&self) -> bool {
        false
    }

    fn commit(&self) -> Task<Option<A>> {
        Task::done(None)
    }

    fn block(&self, _claim: ClaimRef, _deliver: Deliver<A>) -> Task<()> {
        Task::done(())
    }
}

/// See [`SignalExt::map`].
pub struct Map<S, F> {
    inner: S,
    transform: Arc<F>,
}

impl<S, F, B> Signal for Map<S, F>
where
    S: Signal,
    B: Send + 'static,
    F: Fn(S::Output) -> B + Send + Sync + 'static,
{
    type Output = B;

    fn poll(&self) -> bool {
        self.inner.poll()
    }

    fn commit(&self) -> Task<Option<B>> {
        let transform = self.transform.clone();
        self.inner
            .commit()
            .map(move |fired| fired.map(|value| transform(value)))
    }

    fn block(&self, claim: ClaimRef, deliver: Deliver<B>) -> Task<()> {
        let transform = self.transform.clone();
        self.inner.block(
            claim,
            Deliver::new(move |value| deliver.call(transform(value))),
        )
    }
}

/// Memoized lazily-built signal, so composing selections does not force
/// construction of every branch up front.
pub struct Lazy<S, F> {
    thunk: sync::Mutex<Option<F>>,
    slot: OnceLock<S>,
}

pub fn lazy<S, F>(build: F) -> Lazy<S, F>
where
    S: Signal,
    F: FnOnce() -> S + Send + 'static,
{
    Lazy {
        thunk: sync::Mutex::new(Some(build)),
        slot: OnceLock::new(),
    }
}

impl<S, F> Lazy<S, F>
where
    S: Signal,
    F: FnOnce() -> S + Send + 'static,
{
    fn force(&self) -> &S {
        self.slot.get_or_init(|| {
            let build = self
                .thunk
                .lock()
                .unwrap()
                .take()
                .expect("lazy signal thunk re-entered");
            build()
        })
    }
}

impl<S, F> Signal for Lazy<S, F>
where
    S: Signal,
    F: FnOnce() -> S + Send + 'static,
{
    type Output = S::Output;

    fn poll(&self) -> bool {
        self.force().poll()
    }

    fn commit(&self) -> Task<Option<S::Output>> {
        self.force().commit()
    }

    fn block(&self, claim: ClaimRef, deliver: Deliver<S::Output>) -> Task<()> {
        self.force().block(claim, deliver)
    }
}

/// Non-deterministic choice between two signals.
///
/// Both sides share the syncer's claim cell when blocked, so at most one
/// of them can ever fire on behalf of one sync.
pub struct Choose<A> {
    first: BoxSignal<A>,
    second: BoxSignal<A>,
}

/// Compose two signals; whichever fires first wins. The attempt order is
/// randomized once, at construction, so neither side is systematically
/// favored.
pub fn choose<A: Send + 'static>(left: BoxSignal<A>, right: BoxSignal<A>) -> Choose<A> {
    if coin_flip() {
        Choose {
            first: right,
            second: left,
        }
    } else {
        Choose {
            first: left,
            second: right,
        }
    }
}

impl<A: Send + 'static> Signal for Choose<A> {
    type Output = A;

    fn poll(&self) -> bool {
        self.first.poll() || self.second.poll()
    }

    fn commit(&self) -> Task<Option<A>> {
        let fallback = self.second.commit();
        self.first.commit().and_then(move |fired| match fired {
            Some(value) => Task::done(Some(value)),
            None => fallback,
        })
    }

    fn block(&self, claim: ClaimRef, deliver: Deliver<A>) -> Task<()> {
        let first = self.first.block(claim.clone(), deliver.clone());
        let second = self.second.block(claim, deliver);
        first.and_then(move |_| second)
    }
}

/// Choice over any number of signals: a left fold of [`choose`] over
/// [`never`].
pub fn select<A: Send + 'static>(arms: Vec<BoxSignal<A>>) -> BoxSignal<A> {
    arms.into_iter()
        .fold(never().boxed(), |acc, arm| choose(acc, arm).boxed())
}

/// Suspend until the signal fires; return the delivered value.
///
/// Fast path: if the signal polls ready, try to commit it outright.
/// Otherwise install a subscription under a fresh claim cell and yield
/// until some firing delivers into the result slot.
pub fn sync<S: Signal>(signal: S) -> Task<S::Output> {
    let signal = Arc::new(signal);
    Task::delay(move || {
        if signal.poll() {
            let fallback = signal.clone();
            signal.commit().and_then(move |fired| match fired {
                Some(value) => Task::done(value),
                None => enroll(fallback),
            })
        } else {
            enroll(signal)
        }
    })
}

fn enroll<S: Signal>(signal: Arc<S>) -> Task<S::Output> {
    Task::delay(move || {
        let claim: ClaimRef = Arc::new(Claim::new());
        let slot = Arc::new(sync::Mutex::new(None));
        let deliver = {
            let slot = slot.clone();
            Deliver::new(move |value| {
                *slot.lock().unwrap() = Some(value);
            })
        };
        signal
            .block(claim, deliver)
            .and_then(move |_| await_delivery(slot))
    })
}

fn await_delivery<A: Send + 'static>(slot: Arc<sync::Mutex<Option<A>>>) -> Task<A> {
    Task::delay(move || {
        let delivered = slot.lock().unwrap().take();
        match delivered {
            Some(value) => Task::done(value),
            None => task::yield_now().and_then(move |_| await_delivery(slot)),
        }
    })
}

/// One coin flip for [`choose`] branch ordering. Nanosecond clock mixed
/// with a stack address, whitened through xorshift.
fn coin_flip() -> bool {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mut x = nanos ^ (&nanos as *const u64 as u64);
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::coop;

    #[test]
    fn always_commits_its_value() {
        assert_eq!(coop::run(sync(always(42))).unwrap(), 42);
    }

    #[test]
    fn never_commit_declines() {
        let task = never::<i32>().commit();
        assert_eq!(coop::run(task).unwrap(), None);
    }

    #[test]
    fn map_transforms_delivery() {
        let doubled = sync(always(10).map(|v| v * 2));
        assert_eq!(coop::run(doubled).unwrap(), 20);
    }

    #[test]
    fn map_fusion() {
        // map(f) . map(g) commits the same value as map(f . g)
        let nested = coop::run(sync(always(3).map(|v| v + 1).map(|v| v * 10))).unwrap();
        let fused = coop::run(sync(always(3).map(|v| (v + 1) * 10))).unwrap();
        assert_eq!(nested, fused);
    }

    #[test]
    fn choose_never_is_identity() {
        // commit-order equivalence: the never arm can never win
        for _ in 0..8 {
            let picked = choose(never::<i32>().boxed(), always(7).boxed());
            assert_eq!(coop::run(sync(picked)).unwrap(), 7);
        }
    }

    #[test]
    fn choose_commits_exactly_one_side() {
        let picked = choose(always("left").boxed(), always("right").boxed());
        let value = coop::run(sync(picked)).unwrap();
        assert!(value == "left" || value == "right");
    }

    #[test]
    fn select_over_empty_list_never_polls_ready() {
        let empty = select::<i32>(Vec::new());
        assert!(!empty.poll());
    }

    #[test]
    fn select_fires_exactly_one_arm() {
        let hits = Arc::new(std::sync::Mutex::new(Vec::new()));
        let arm = |tag: &'static str, hits: &Arc<sync::Mutex<Vec<&'static str>>>| {
            let hits = hits.clone();
            always(()).map(move |_| {
                hits.lock().unwrap().push(tag);
                tag
            })
        };
        let picked = select(vec![
            arm("a", &hits).boxed(),
            arm("b", &hits).boxed(),
            arm("c", &hits).boxed(),
        ]);
        let value = coop::run(sync(picked)).unwrap();
        let hits = hits.lock().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0], value);
    }

    #[test]
    fn lazy_builds_at_most_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let builds = Arc::new(AtomicUsize::new(0));
        let signal = {
            let builds = builds.clone();
            lazy(move || {
                builds.fetch_add(1, Ordering::SeqCst);
                always(5)
            })
        };
        assert!(signal.poll());
        assert!(signal.poll());
        assert_eq!(coop::run(sync(signal)).unwrap(), 5);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blocked_sync_stays_suspended_until_delivery() {
        // a never-signal inside a choose leaves only the other side able
        // to fire; claim bookkeeping must not wedge the winner
        let picked = choose(never::<i32>().boxed(), always(1).boxed());
        assert_eq!(coop::run(sync(picked)).unwrap(), 1);
    }
}
