use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{trace, warn};

/// A queued delivery: one registrant's callback bound to one value.
pub(crate) type Job = Box<dyn FnOnce()>;

/// Callback invoked before a delivery is queued.
pub(crate) type Invalidator = Rc<dyn Fn()>;

/// One of the scheduler's two delivery queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Plain subscribers, notified on every change.
    Subscribers,
    /// Conditioned subscribers, notified when the value matches their target.
    Conditioned,
}

#[derive(Default)]
struct SchedulerInner {
    subscribers: RefCell<Vec<Option<Job>>>,
    conditioned: RefCell<Vec<Option<Job>>>,
}

impl SchedulerInner {
    fn queue(&self, lane: Lane) -> &RefCell<Vec<Option<Job>>> {
        match lane {
            Lane::Subscribers => &self.subscribers,
            Lane::Conditioned => &self.conditioned,
        }
    }
}

/// Batches change notifications so delivery stays synchronous, FIFO and
/// duplicate-free even when a callback sets another value.
///
/// Every store captures a scheduler when it is created: the one passed in
/// its options, or else [`Scheduler::current`]. Stores sharing a scheduler
/// share its queues, so a reentrant `set` on any of them joins the flush
/// already in progress instead of starting its own.
///
/// # Examples
///
/// Using the default thread scheduler:
///
/// ```
/// use quiver::Writable;
///
/// let count = Writable::new(0);
/// count.set(1);
/// assert_eq!(quiver::get(&count), 1);
/// ```
///
/// Using a scoped scheduler for isolation:
///
/// ```
/// use quiver::runtime::Scheduler;
/// use quiver::Writable;
///
/// Scheduler::scope(|| {
///     let count = Writable::new(0);
///     count.set(1);
///     assert_eq!(quiver::get(&count), 1);
/// });
/// ```
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

// Thread-local default and stack for scoped schedulers
thread_local! {
    static THREAD_DEFAULT: Scheduler = Scheduler::new();
    static SCHEDULER_STACK: RefCell<Vec<Scheduler>> = const { RefCell::new(Vec::new()) };
}

impl Scheduler {
    /// Create a new scheduler with empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a function with a fresh scheduler as the current one.
    ///
    /// Stores created inside `f` use the fresh scheduler for their whole
    /// lifetime, including calls made after `scope` returns.
    pub fn scope<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        Self::with_scheduler(Self::new(), f)
    }

    /// The scheduler used when no scoped scheduler is active.
    pub fn thread_default() -> Self {
        THREAD_DEFAULT.with(Clone::clone)
    }

    /// Get the current scheduler (innermost scope, or the thread default).
    pub fn current() -> Self {
        SCHEDULER_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .cloned()
                .unwrap_or_else(Self::thread_default)
        })
    }

    /// Run a function with `scheduler` as the current scheduler.
    ///
    /// ```
    /// use quiver::runtime::Scheduler;
    ///
    /// let scheduler = Scheduler::new();
    /// Scheduler::with_scheduler(scheduler.clone(), || {
    ///     assert!(Scheduler::current().ptr_eq(&scheduler));
    /// });
    /// ```
    pub fn with_scheduler<F, R>(scheduler: Scheduler, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        SCHEDULER_STACK.with(|stack| {
            stack.borrow_mut().push(scheduler);
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        SCHEDULER_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Whether two handles refer to the same scheduler.
    pub fn ptr_eq(&self, other: &Scheduler) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of entries currently sitting in a lane, drained or not.
    ///
    /// Non-zero only while a flush is in progress.
    pub fn queued(&self, lane: Lane) -> usize {
        self.inner.queue(lane).borrow().len()
    }

    /// Whether a flush of `lane` is in progress.
    pub fn is_flushing(&self, lane: Lane) -> bool {
        self.queued(lane) > 0
    }

    /// Invalidate and enqueue every entry, then drain the lane if this call
    /// found it empty.
    ///
    /// A call that finds the lane non-empty is nested inside another
    /// flush. It only appends; the outer flush reaches the new entries
    /// because it drains up to the lane's length at each step.
    pub(crate) fn dispatch<I>(&self, lane: Lane, entries: I)
    where
        I: IntoIterator<Item = (Invalidator, Job)>,
    {
        let queue = self.inner.queue(lane);
        let owner = queue.borrow().is_empty();

        for (invalidate, job) in entries {
            invalidate();
            queue.borrow_mut().push(Some(job));
        }

        if owner {
            self.flush(lane);
        }
    }

    fn flush(&self, lane: Lane) {
        let queue = self.inner.queue(lane);
        let guard = FlushGuard { lane, queue };

        let mut index = 0;
        loop {
            // The borrow ends before the job runs so it can enqueue more.
            let job = match queue.borrow_mut().get_mut(index) {
                Some(slot) => slot.take(),
                None => break,
            };
            index += 1;
            if let Some(job) = job {
                job();
            }
        }

        trace!(?lane, delivered = index, "flushed notification lane");
        drop(guard);
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("subscribers", &self.queued(Lane::Subscribers))
            .field("conditioned", &self.queued(Lane::Conditioned))
            .finish()
    }
}

/// Empties the lane when the flush owner returns or unwinds.
struct FlushGuard<'a> {
    lane: Lane,
    queue: &'a RefCell<Vec<Option<Job>>>,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        let mut queue = self.queue.borrow_mut();
        if std::thread::panicking() {
            let undelivered = queue.iter().filter(|job| job.is_some()).count();
            if undelivered > 0 {
                warn!(lane = ?self.lane, undelivered, "dropping notifications after a callback panicked");
            }
        }
        queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn entry(log: &Rc<RefCell<Vec<String>>>, name: &'static str) -> (Invalidator, Job) {
        let invalidate_log = log.clone();
        let run_log = log.clone();
        (
            Rc::new(move || invalidate_log.borrow_mut().push(format!("invalidate {name}"))),
            Box::new(move || run_log.borrow_mut().push(format!("run {name}"))),
        )
    }

    #[test]
    fn invalidations_precede_runs() {
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        scheduler.dispatch(Lane::Subscribers, vec![entry(&log, "a"), entry(&log, "b")]);

        assert_eq!(
            *log.borrow(),
            vec!["invalidate a", "invalidate b", "run a", "run b"]
        );
        assert_eq!(scheduler.queued(Lane::Subscribers), 0);
    }

    #[test]
    fn nested_dispatch_joins_outer_flush() {
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let nested = {
            let scheduler = scheduler.clone();
            let log = log.clone();
            Box::new(move || {
                log.borrow_mut().push("run outer".to_string());
                assert!(scheduler.is_flushing(Lane::Subscribers));
                scheduler.dispatch(Lane::Subscribers, vec![entry(&log, "nested")]);
                // Not drained yet: the outer flush owns the lane.
                log.borrow_mut().push("outer returns".to_string());
            }) as Job
        };

        scheduler.dispatch(
            Lane::Subscribers,
            vec![(Rc::new(|| {}) as Invalidator, nested), entry(&log, "second")],
        );

        assert_eq!(
            *log.borrow(),
            vec![
                "invalidate second",
                "run outer",
                "invalidate nested",
                "outer returns",
                "run second",
                "run nested",
            ]
        );
    }

    #[test]
    fn lanes_flush_independently() {
        let scheduler = Scheduler::new();
        let ran = Rc::new(Cell::new(false));

        let job = {
            let scheduler = scheduler.clone();
            let ran = ran.clone();
            Box::new(move || {
                let flag = ran.clone();
                scheduler.dispatch(
                    Lane::Conditioned,
                    vec![(Rc::new(|| {}) as Invalidator, Box::new(move || flag.set(true)) as Job)],
                );
                // Conditioned lane was empty, so it drained immediately.
                assert!(ran.get());
            }) as Job
        };

        scheduler.dispatch(Lane::Subscribers, vec![(Rc::new(|| {}) as Invalidator, job)]);
        assert!(ran.get());
    }

    #[test]
    fn panicking_job_leaves_lane_empty() {
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scheduler.dispatch(
                Lane::Subscribers,
                vec![
                    (Rc::new(|| {}) as Invalidator, Box::new(|| panic!("boom")) as Job),
                    entry(&log, "never"),
                ],
            );
        }));

        assert!(result.is_err());
        assert_eq!(scheduler.queued(Lane::Subscribers), 0);

        scheduler.dispatch(Lane::Subscribers, vec![entry(&log, "after")]);
        assert_eq!(
            *log.borrow(),
            vec!["invalidate never", "invalidate after", "run after"]
        );
    }

    #[test]
    fn scope_installs_fresh_scheduler() {
        let outer = Scheduler::current();
        Scheduler::scope(|| {
            assert!(!Scheduler::current().ptr_eq(&outer));
        });
        assert!(Scheduler::current().ptr_eq(&outer));
    }
}
