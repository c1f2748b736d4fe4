use std::cell::{Cell, UnsafeCell};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use parking_lot::Mutex;

use ember_container::IntrusiveList;

use crate::context::{self, ContextHandle, TransferParams};
use crate::fiber::{FiberHandle, FiberPool};
use crate::job::{AffinityMask, Job, JobPriority};
use crate::sync::{Semaphore, SpinLock};
use crate::wait_group::{FiberWaitEntry, WaitGroup};

pub const MAX_WORKER_COUNT: usize = 64;

pub struct JobSystemDesc {
    pub worker_count: usize,
}

impl Default for JobSystemDesc {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get_physical().min(MAX_WORKER_COUNT),
        }
    }
}

/// One ready/waiting queue pair per priority.
struct JobQueueInner {
    jobs: IntrusiveList<Job>,
    /// Fibers whose wait group signaled, waiting to be resumed.
    ready_fibers: IntrusiveList<FiberWaitEntry>,
}

struct JobQueue {
    inner: SpinLock<JobQueueInner>,
}

impl JobQueue {
    fn new() -> Self {
        Self {
            inner: SpinLock::new(JobQueueInner {
                jobs: IntrusiveList::new(),
                ready_fibers: IntrusiveList::new(),
            }),
        }
    }
}

struct WorkerState {
    /// Fiber to return to the pool after the next switch completes. Deferring
    /// the return keeps a fiber from being rented while we still execute on
    /// its stack.
    prev_fiber: FiberHandle,
    current_fiber: FiberHandle,
    last_wait_entry: *mut FiberWaitEntry,
    /// Context of the worker's OS thread, the way out on shutdown.
    exit_context: ContextHandle,
    /// Priority / affinity of the job the worker currently runs; inherited by
    /// wait entries when that job suspends.
    priority: JobPriority,
    affinity: AffinityMask,
}

#[repr(align(64))]
struct Worker {
    state: UnsafeCell<WorkerState>,
}

// a worker's state is only ever accessed from the thread driving that worker
unsafe impl Send for Worker {}
unsafe impl Sync for Worker {}

impl Worker {
    fn new() -> Self {
        Self {
            state: UnsafeCell::new(WorkerState {
                prev_fiber: FiberHandle::INVALID,
                current_fiber: FiberHandle::INVALID,
                last_wait_entry: std::ptr::null_mut(),
                exit_context: ContextHandle::null(),
                priority: JobPriority::Normal,
                affinity: AffinityMask::ALL,
            }),
        }
    }
}

enum Work {
    ReadyFiber(NonNull<FiberWaitEntry>),
    Job(NonNull<Job>),
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<(NonNull<JobSystem>, usize)>> = Cell::new(None);
}

/// Cooperative fiber scheduler over a fixed set of worker threads.
///
/// Jobs run on pooled fibers so that a job blocked on a [`WaitGroup`] yields
/// its worker instead of the OS thread. A suspended fiber is resumed by
/// whichever worker pops it from a ready queue next, so a job may migrate
/// between threads across suspension points.
pub struct JobSystem {
    queues: [JobQueue; JobPriority::COUNT],
    workers: Vec<Worker>,
    fiber_pool: FiberPool,

    semaphore: Semaphore,
    should_exit: AtomicBool,
    sleeping_worker_count: AtomicI32,

    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl JobSystem {
    pub fn new(desc: JobSystemDesc) -> Arc<Self> {
        let worker_count = desc.worker_count.clamp(1, MAX_WORKER_COUNT);

        Arc::new(Self {
            queues: std::array::from_fn(|_| JobQueue::new()),
            workers: (0..worker_count).map(|_| Worker::new()).collect(),
            fiber_pool: FiberPool::new(fiber_entry),

            semaphore: Semaphore::new(0),
            should_exit: AtomicBool::new(false),
            sleeping_worker_count: AtomicI32::new(0),

            threads: Mutex::new(Vec::new()),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Spawn the worker threads.
    pub fn start(self: &Arc<Self>) {
        let mut threads = self.threads.lock();
        assert!(threads.is_empty(), "Job system already started!");

        for worker_index in 0..self.workers.len() {
            let system = self.clone();
            let thread = std::thread::Builder::new()
                .name(format!("Worker {}", worker_index))
                .spawn(move || system.thread_proc(worker_index))
                .expect("Failed to spawn worker thread!");

            threads.push(thread);
        }

        log::debug!("job system started with {} workers", self.workers.len());
    }

    /// Ask all workers to exit and join them. Jobs still in the queues are
    /// dropped without running.
    pub fn stop(&self) {
        if self.should_exit.swap(true, Ordering::SeqCst) {
            return;
        }

        self.semaphore.release(self.workers.len());

        let threads = std::mem::take(&mut *self.threads.lock());
        for thread in threads {
            thread.join().expect("Worker thread panicked!");
        }

        for queue in &self.queues {
            let mut inner = queue.inner.lock();
            while let Some(job) = inner.jobs.pop_front() {
                drop(unsafe { Box::from_raw(job.as_ptr()) });
            }
        }

        log::debug!("job system stopped");
    }

    /// Queue a job. Its closure runs exactly once on some worker allowed by
    /// the job's affinity mask; jobs of equal priority leave a single worker
    /// in FIFO order.
    pub fn schedule(&self, job: Box<Job>) {
        debug_assert!(!self.should_exit.load(Ordering::Relaxed));

        let priority = job.priority;
        let job = NonNull::from(Box::leak(job));

        self.queues[priority.index()].inner.lock().jobs.push_back(job);
        self.wake_one_worker();
    }

    pub fn spawn(&self, priority: JobPriority, func: impl FnOnce() + Send + 'static) {
        self.schedule(Job::new(priority, AffinityMask::ALL, None, func));
    }

    pub fn spawn_signaling(
        &self,
        priority: JobPriority,
        wait_group: &Arc<WaitGroup>,
        func: impl FnOnce() + Send + 'static,
    ) {
        self.schedule(Job::new(priority, AffinityMask::ALL, Some(wait_group.clone()), func));
    }

    /// Index of the worker driving the calling thread, if any.
    pub fn current_worker_index() -> Option<usize> {
        Self::current().map(|(_, worker_index)| worker_index)
    }

    pub(crate) fn current() -> Option<(NonNull<JobSystem>, usize)> {
        CURRENT_WORKER.with(|current| current.get())
    }

    pub(crate) fn worker_wait_info(&self, worker_index: usize) -> (FiberHandle, JobPriority, AffinityMask) {
        let state = self.worker_state(worker_index);
        (state.current_fiber, state.priority, state.affinity)
    }

    /// Move a signaled waiter into the ready-fiber queue of its priority.
    pub(crate) fn add_ready_fiber(&self, entry: *mut FiberWaitEntry) {
        let priority = unsafe { (*entry).priority };

        self.queues[priority.index()]
            .inner
            .lock()
            .ready_fibers
            .push_back(NonNull::new(entry).unwrap());

        self.wake_one_worker();
    }

    /// Park the current fiber behind `entry` and keep the worker going on a
    /// fresh fiber. Returns once another worker resumed the parked fiber.
    pub(crate) fn switch_from_waiting_fiber(&self, worker_index: usize, entry: &FiberWaitEntry) {
        {
            let state = self.worker_state_mut(worker_index);
            state.last_wait_entry = entry as *const FiberWaitEntry as *mut FiberWaitEntry;
            state.prev_fiber = state.current_fiber;
            state.current_fiber = self.fiber_pool.rent(false);
        }

        let current_fiber = self.worker_state(worker_index).current_fiber;
        let transfer = unsafe {
            self.fiber_pool.switch_to(current_fiber, self as *const JobSystem as usize)
        };

        // we may be on a different worker thread from here on
        self.cleanup_after_switch(transfer.context);
    }

    fn thread_proc(self: Arc<Self>, worker_index: usize) {
        CURRENT_WORKER.with(|current| {
            current.set(Some((NonNull::from(self.as_ref()), worker_index)));
        });

        let first_fiber = self.fiber_pool.rent(false);
        self.worker_state_mut(worker_index).current_fiber = first_fiber;

        let transfer = unsafe {
            self.fiber_pool.switch_to(first_fiber, self.as_ref() as *const JobSystem as usize)
        };

        // a fiber switched back here: the worker is shutting down
        let last_fiber = self.worker_state(worker_index).current_fiber;
        self.fiber_pool.update(last_fiber, transfer.context);
        self.fiber_pool.return_fiber(last_fiber);
    }

    /// Body of every pooled fiber. Fresh fibers enter here; recycled fibers
    /// resume inside `worker_loop` at their old switch point instead.
    fn fiber_proc(&self, from_context: ContextHandle) -> ! {
        {
            let (_, worker_index) = Self::current().unwrap();
            let state = self.worker_state_mut(worker_index);

            if state.exit_context.is_null() {
                // first fiber entered from the worker thread itself,
                // remember the way back
                state.exit_context = from_context;
            } else {
                self.cleanup_after_switch(from_context);
            }
        }

        self.worker_loop();

        let (_, worker_index) = Self::current().unwrap();
        let exit_context = self.worker_state(worker_index).exit_context;
        debug_assert!(!exit_context.is_null());

        unsafe {
            context::switch(exit_context, 0);
        }
        unreachable!()
    }

    fn worker_loop(&self) {
        loop {
            if self.should_exit.load(Ordering::Acquire) {
                return;
            }

            match self.try_pop_work() {
                Some(Work::ReadyFiber(entry)) => self.resume_ready_fiber(entry),
                Some(Work::Job(job)) => self.execute_job(job),
                None => self.sleep_until_work(),
            }
        }
    }

    /// Pop the highest-priority available item, preferring resumed waiters
    /// over fresh jobs. Affinity mismatches go back on the queue tail.
    fn try_pop_work(&self) -> Option<Work> {
        let (_, worker_index) = Self::current().unwrap();

        for priority_index in 0..JobPriority::COUNT {
            let mut queue = self.queues[priority_index].inner.lock();

            if let Some(entry) = queue.ready_fibers.pop_front() {
                if !unsafe { entry.as_ref() }.affinity.allows(worker_index) {
                    queue.ready_fibers.push_back(entry);
                    drop(queue);
                    self.wake_one_worker();
                    continue;
                }
                return Some(Work::ReadyFiber(entry));
            }

            if let Some(job) = queue.jobs.pop_front() {
                if !unsafe { job.as_ref() }.affinity.allows(worker_index) {
                    queue.jobs.push_back(job);
                    drop(queue);
                    self.wake_one_worker();
                    continue;
                }
                return Some(Work::Job(job));
            }
        }

        None
    }

    fn resume_ready_fiber(&self, entry: NonNull<FiberWaitEntry>) {
        let entry_ref = unsafe { entry.as_ref() };

        // the suspending worker may still be saving the fiber's context
        while !entry_ref.switch_completed.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }

        let fiber = entry_ref.fiber.get();
        let priority = entry_ref.priority;
        let affinity = entry_ref.affinity;

        let (_, worker_index) = Self::current().unwrap();
        {
            let state = self.worker_state_mut(worker_index);
            state.prev_fiber = state.current_fiber;
            state.current_fiber = fiber;
            state.priority = priority;
            state.affinity = affinity;
        }

        // the entry dies the moment the resumed fiber returns from wait()
        let transfer = unsafe { self.fiber_pool.switch_to(fiber, 0) };

        self.cleanup_after_switch(transfer.context);
    }

    fn execute_job(&self, job: NonNull<Job>) {
        let mut job = unsafe { Box::from_raw(job.as_ptr()) };

        {
            let (_, worker_index) = Self::current().unwrap();
            let state = self.worker_state_mut(worker_index);
            state.priority = job.priority;
            state.affinity = job.affinity;
        }

        let func = job.func.take().unwrap();
        func();

        if let Some(wait_group) = job.wait_group.take() {
            wait_group.signal();
        }
    }

    /// Finish the half-open switch we just returned from: persist the
    /// previous fiber's context, then either publish its wait entry or hand
    /// the fiber back to the pool.
    ///
    /// Publishing `switch_completed` strictly after the context store is what
    /// keeps another worker from resuming a waiter whose saved context is not
    /// valid yet.
    fn cleanup_after_switch(&self, returned_context: ContextHandle) {
        let (_, worker_index) = Self::current().unwrap();
        let state = self.worker_state_mut(worker_index);

        self.fiber_pool.update(state.prev_fiber, returned_context);

        if !state.last_wait_entry.is_null() {
            let entry = state.last_wait_entry;
            state.last_wait_entry = std::ptr::null_mut();

            unsafe {
                (*entry).switch_completed.store(true, Ordering::Release);
            }
        } else if state.prev_fiber.is_valid() {
            self.fiber_pool.return_fiber(state.prev_fiber);
        }

        state.prev_fiber = FiberHandle::INVALID;
    }

    fn sleep_until_work(&self) {
        self.sleeping_worker_count.fetch_add(1, Ordering::SeqCst);

        // re-check after raising the sleeper count so a concurrent schedule()
        // either sees us sleeping or we see its job
        if !self.has_pending_work() && !self.should_exit.load(Ordering::Acquire) {
            self.semaphore.wait();
        }

        self.sleeping_worker_count.fetch_sub(1, Ordering::SeqCst);
    }

    fn has_pending_work(&self) -> bool {
        self.queues.iter().any(|queue| {
            let inner = queue.inner.lock();
            !inner.jobs.is_empty() || !inner.ready_fibers.is_empty()
        })
    }

    fn wake_one_worker(&self) {
        if self.sleeping_worker_count.load(Ordering::SeqCst) > 0 {
            self.semaphore.release(1);
        }
    }

    fn worker_state(&self, worker_index: usize) -> &WorkerState {
        unsafe { &*self.workers[worker_index].state.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn worker_state_mut(&self, worker_index: usize) -> &mut WorkerState {
        unsafe { &mut *self.workers[worker_index].state.get() }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

extern "C" fn fiber_entry(transfer: TransferParams) -> ! {
    let system = unsafe { &*(transfer.user_data as *const JobSystem) };
    system.fiber_proc(transfer.context)
}
