// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Tasks as pure effect descriptions.
//!
//! A `Task<A>` is an immutable description of a computation producing an
//! `A`. Stepping it once yields a `Step`: either the final value or a
//! scheduling node carrying the continuation. Drivers own the stepping
//! loop; user code only composes descriptions. Side effects belong inside
//! `Task::delay` thunks so that composing tasks never runs anything.

use std::time::Duration;

use crate::fault::Fault;
use crate::mutex::Mutex;
use crate::scope::Release;

/// Continuation applied by a driver when it grants a fresh mutex.
pub type LockCont<A> = Box<dyn FnOnce(Mutex) -> Task<A> + Send>;

type StepThunk<A> = Box<dyn FnOnce() -> Result<Step<A>, Fault> + Send>;

/// Result of stepping a task once. Everything except `Done` is a
/// scheduling node the driver must interpret.
pub enum Step<A> {
    /// Terminal: the task's value.
    Done(A),
    /// Spawn the first task as a sibling, continue as the second.
    Fork(Task<()>, Task<A>),
    /// Relinquish control voluntarily, resume as the given task.
    Yield(Task<A>),
    /// Resume no earlier than the duration from now.
    Wait(Duration, Task<A>),
    /// Request a fresh mutex from the driver; the continuation receives
    /// the handle.
    Lock(LockCont<A>),
}

/// An immutable description of a computation producing an `A`.
///
/// Stepping consumes the task, so a description can run at most once:
/// single ownership stands in for the usual "re-stepping must be
/// equivalent" rule.
pub struct Task<A> {
    thunk: StepThunk<A>,
}

impl<A: Send + 'static> Task<A> {
    pub(crate) fn from_fn(
        f: impl FnOnce() -> Result<Step<A>, Fault> + Send + 'static,
    ) -> Self {
        Task { thunk: Box::new(f) }
    }

    /// A task that steps straight to `Done(value)`.
    pub fn done(value: A) -> Self {
        Self::from_fn(move || Ok(Step::Done(value)))
    }

    /// Defer construction: when stepped, evaluate the thunk and step the
    /// task it produces. Control structures without a ready continuation
    /// are built through here so their side effects stay inside the step.
    pub fn delay(build: impl FnOnce() -> Task<A> + Send + 'static) -> Self {
        Self::from_fn(move || build().step())
    }

    /// A task that raises the given fault when stepped.
    pub fn fail(fault: Fault) -> Self {
        Self::from_fn(move || Err(fault))
    }

    /// Evaluate one step. Drivers call this; user code composes instead.
    pub fn step(self) -> Result<Step<A>, Fault> {
        (self.thunk)()
    }

    /// Sequential composition. A `Done` step continues straight into the
    /// continuation; every scheduling node is re-emitted with the
    /// continuation pushed into its own continuation.
    pub fn and_then<B, K>(self, continue_with: K) -> Task<B>
    where
        B: Send + 'static,
        K: FnOnce(A) -> Task<B> + Send + 'static,
    {
        Task::from_fn(move || match self.step()? {
            Step::Done(value) => continue_with(value).step(),
            Step::Fork(child, next) => Ok(Step::Fork(child, next.and_then(continue_with))),
            Step::Yield(next) => Ok(Step::Yield(next.and_then(continue_with))),
            Step::Wait(duration, next) => {
                Ok(Step::Wait(duration, next.and_then(continue_with)))
            }
            Step::Lock(grant) => Ok(Step::Lock(Box::new(move |lock| {
                grant(lock).and_then(continue_with)
            }))),
        })
    }

    pub fn map<B, F>(self, transform: F) -> Task<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        self.and_then(move |value| Task::done(transform(value)))
    }

    /// Intercept faults raised by this task or any of its continuations.
    /// Scheduling nodes pass through untouched; the handler itself runs
    /// unprotected.
    pub fn recover<H>(self, handler: H) -> Task<A>
    where
        H: FnOnce(Fault) -> Task<A> + Send + 'static,
    {
        Task::from_fn(move || match self.step() {
            Err(fault) => handler(fault).step(),
            Ok(Step::Done(value)) => Ok(Step::Done(value)),
            Ok(Step::Fork(child, next)) => Ok(Step::Fork(child, next.recover(handler))),
            Ok(Step::Yield(next)) => Ok(Step::Yield(next.recover(handler))),
            Ok(Step::Wait(duration, next)) => Ok(Step::Wait(duration, next.recover(handler))),
            Ok(Step::Lock(grant)) => Ok(Step::Lock(Box::new(move |lock| {
                grant(lock).recover(handler)
            }))),
        })
    }

    /// Run `cleanup` exactly once after this task, on both the success
    /// and the failure path. A fault re-raises after cleanup completes.
    pub fn finally(self, cleanup: Task<()>) -> Task<A> {
        Task::from_fn(move || match self.step() {
            Err(fault) => cleanup.and_then(move |_| Task::fail(fault)).step(),
            Ok(Step::Done(value)) => cleanup.map(move |_| value).step(),
            Ok(Step::Fork(child, next)) => Ok(Step::Fork(child, next.finally(cleanup))),
            Ok(Step::Yield(next)) => Ok(Step::Yield(next.finally(cleanup))),
            Ok(Step::Wait(duration, next)) => Ok(Step::Wait(duration, next.finally(cleanup))),
            Ok(Step::Lock(grant)) => Ok(Step::Lock(Box::new(move |lock| {
                grant(lock).finally(cleanup)
            }))),
        })
    }
}

/// Spawn `child` as a sibling and keep going.
pub fn fork(child: Task<()>) -> Task<()> {
    Task::from_fn(move || Ok(Step::Fork(child, Task::done(()))))
}

/// Relinquish control for one scheduling round.
pub fn yield_now() -> Task<()> {
    Task::from_fn(|| Ok(Step::Yield(Task::done(()))))
}

/// Request a fresh mutex from the driver running this task. The flavor
/// of the mutex (cooperative or blocking) matches the driver.
pub fn request_lock() -> Task<Mutex> {
    Task::from_fn(|| Ok(Step::Lock(Box::new(Task::done))))
}

/// Acquire a resource, run `body` with it, and release it exactly once
/// whether the body completes or faults.
pub fn using<R, A, F>(acquire: Task<R>, body: F) -> Task<A>
where
    R: Release + Send + 'static,
    A: Send + 'static,
    F: FnOnce(R) -> Task<A> + Send + 'static,
{
    acquire.and_then(move |resource| {
        let cleanup = resource.release();
        body(resource).finally(cleanup)
    })
}

/// Run `body` repeatedly while `condition` holds. The condition is
/// re-evaluated before each iteration, inside the task.
pub fn repeat_while<C, B>(condition: C, body: B) -> Task<()>
where
    C: Fn() -> bool + Send + 'static,
    B: Fn() -> Task<()> + Send + 'static,
{
    Task::delay(move || {
        if condition() {
            let iteration = body();
            iteration.and_then(move |_| repeat_while(condition, body))
        } else {
            Task::done(())
        }
    })
}

/// Run `visit` over every item of the sequence, one iteration per item.
pub fn for_each<I, F>(items: I, visit: F) -> Task<()>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
    F: Fn(I::Item) -> Task<()> + Send + 'static,
{
    step_items(items.into_iter(), visit)
}

fn step_items<It, F>(mut items: It, visit: F) -> Task<()>
where
    It: Iterator + Send + 'static,
    It::Item: Send + 'static,
    F: Fn(It::Item) -> Task<()> + Send + 'static,
{
    Task::delay(move || match items.next() {
        Some(item) => {
            let iteration = visit(item);
            iteration.and_then(move |_| step_items(items, visit))
        }
        None => Task::done(()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::coop;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn done_steps_to_value() {
        match Task::done(7).step().unwrap() {
            Step::Done(v) => assert_eq!(v, 7),
            _ => panic!("expected Done"),
        }
    }

    #[test]
    fn bind_left_identity() {
        // done(x).and_then(f) behaves as f(x)
        let direct = coop::run((|x: i32| Task::done(x * 2))(21)).unwrap();
        let bound = coop::run(Task::done(21).and_then(|x| Task::done(x * 2))).unwrap();
        assert_eq!(direct, bound);
    }

    #[test]
    fn bind_right_identity() {
        let plain = coop::run(Task::done(5)).unwrap();
        let bound = coop::run(Task::done(5).and_then(Task::done)).unwrap();
        assert_eq!(plain, bound);
    }

    #[test]
    fn bind_associativity() {
        let f = |x: i32| Task::done(x + 1);
        let g = |x: i32| Task::done(x * 3);
        let left = coop::run(Task::done(2).and_then(f).and_then(g)).unwrap();
        let right = coop::run(Task::done(2).and_then(move |x| f(x).and_then(g))).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn bind_commutes_past_yield() {
        let task = yield_now().and_then(|_| Task::done("after"));
        match task.step().unwrap() {
            Step::Yield(next) => assert_eq!(coop::run(next).unwrap(), "after"),
            _ => panic!("expected the yield to surface first"),
        }
    }

    #[test]
    fn delay_defers_side_effects() {
        let hits = Arc::new(AtomicUsize::new(0));
        let task = {
            let hits = hits.clone();
            Task::delay(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                Task::done(())
            })
        };
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        coop::run(task).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recover_catches_fault() {
        let task = Task::<i32>::fail(Fault::new("boom")).recover(|fault| {
            assert_eq!(fault.message(), "boom");
            Task::done(-1)
        });
        assert_eq!(coop::run(task).unwrap(), -1);
    }

    #[test]
    fn recover_catches_after_yield() {
        let task = yield_now()
            .and_then(|_| Task::<i32>::fail(Fault::new("late")))
            .recover(|_| Task::done(99));
        assert_eq!(coop::run(task).unwrap(), 99);
    }

    #[test]
    fn uncaught_fault_aborts_run() {
        let task = yield_now().and_then(|_| Task::<()>::fail(Fault::new("fatal")));
        let err = coop::run(task).unwrap_err();
        assert_eq!(err.message(), "fatal");
    }

    #[test]
    fn finally_runs_once_on_success() {
        let runs = Arc::new(AtomicUsize::new(0));
        let cleanup = {
            let runs = runs.clone();
            Task::delay(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                Task::done(())
            })
        };
        let value = coop::run(yield_now().map(|_| 10).finally(cleanup)).unwrap();
        assert_eq!(value, 10);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finally_runs_once_on_fault() {
        let runs = Arc::new(AtomicUsize::new(0));
        let cleanup = {
            let runs = runs.clone();
            Task::delay(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                Task::done(())
            })
        };
        let outcome = coop::run(Task::<()>::fail(Fault::new("die")).finally(cleanup));
        assert_eq!(outcome.unwrap_err().message(), "die");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeat_while_counts_down() {
        let remaining = Arc::new(AtomicUsize::new(5));
        let body_hits = Arc::new(AtomicUsize::new(0));
        let task = {
            let checked = remaining.clone();
            let decremented = remaining.clone();
            let body_hits = body_hits.clone();
            repeat_while(
                move || checked.load(Ordering::SeqCst) > 0,
                move || {
                    let remaining = decremented.clone();
                    let body_hits = body_hits.clone();
                    Task::delay(move || {
                        remaining.fetch_sub(1, Ordering::SeqCst);
                        body_hits.fetch_add(1, Ordering::SeqCst);
                        Task::done(())
                    })
                },
            )
        };
        coop::run(task).unwrap();
        assert_eq!(body_hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn for_each_visits_in_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let task = {
            let seen = seen.clone();
            for_each(vec![1, 2, 3], move |item| {
                let seen = seen.clone();
                Task::delay(move || {
                    seen.lock().unwrap().push(item);
                    Task::done(())
                })
            })
        };
        coop::run(task).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn fork_runs_child_after_pending_work() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let note = |order: &Arc<std::sync::Mutex<Vec<&'static str>>>, tag: &'static str| {
            let order = order.clone();
            Task::delay(move || {
                order.lock().unwrap().push(tag);
                Task::done(())
            })
        };
        let task = fork(note(&order, "child"))
            .and_then({
                let parent = note(&order, "parent");
                move |_| parent
            });
        coop::run(task).unwrap();
        // the forker keeps going; the child runs behind it
        assert_eq!(*order.lock().unwrap(), vec!["parent", "child"]);
    }
}
