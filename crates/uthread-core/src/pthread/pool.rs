//! Thread pool.
//!
//! A fixed set of workers draining a FIFO task queue, dispatched by one
//! mutex + condition variable pair. Tasks submitted from a single submitter
//! run in submission order; concurrent submitters are serialized by the pool
//! mutex. Shutdown is graceful (residual tasks run in order) or immediate
//! (residual tasks dropped).

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::errno;
use crate::pthread::cond::Cond;
use crate::pthread::mutex::Mutex;
use crate::pthread::thread::{self, Tid};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Task>,
    shutdown: bool,
}

struct PoolInner {
    lock: Mutex,
    notify: Cond,
    state: UnsafeCell<PoolState>,
}

// SAFETY: `state` is only touched while `lock` is held; the mutex provides
// the exclusion and the ordering.
unsafe impl Sync for PoolInner {}
// SAFETY: tasks are `Send` and the queue moves between threads only under
// the lock.
unsafe impl Send for PoolInner {}

/// A fixed-size worker pool over a FIFO task queue.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: Vec<Tid>,
    started: usize,
}

fn worker_loop(inner: &PoolInner) -> usize {
    loop {
        if inner.lock.lock().is_err() {
            return 1;
        }
        loop {
            let (empty, shutdown) = {
                // SAFETY: pool lock held.
                let state = unsafe { &*inner.state.get() };
                (state.queue.is_empty(), state.shutdown)
            };
            if shutdown {
                let _ = inner.lock.unlock();
                return 0;
            }
            if !empty {
                break;
            }
            if inner.notify.wait(&inner.lock).is_err() {
                let _ = inner.lock.unlock();
                return 1;
            }
        }
        let task = {
            // SAFETY: pool lock held.
            let state = unsafe { &mut *inner.state.get() };
            state.queue.pop_front()
        };
        let _ = inner.lock.unlock();

        if let Some(task) = task {
            task();
        }
    }
}

impl ThreadPool {
    /// Create a pool of `thread_count` workers; counts below 1 are clamped
    /// to a single worker.
    ///
    /// If any worker fails to spawn, the ones already running are shut down
    /// and the creation fails with `EAGAIN`.
    pub fn create(thread_count: usize) -> Result<ThreadPool, i32> {
        let thread_count = thread_count.max(1);

        let inner = Arc::new(PoolInner {
            lock: Mutex::new(),
            notify: Cond::new(),
            state: UnsafeCell::new(PoolState {
                queue: VecDeque::new(),
                shutdown: false,
            }),
        });
        inner.lock.init(None)?;
        if let Err(e) = inner.notify.init() {
            let _ = inner.lock.destroy();
            return Err(e);
        }

        let mut pool = ThreadPool {
            inner,
            workers: Vec::with_capacity(thread_count),
            started: 0,
        };

        for _ in 0..thread_count {
            let worker_inner = Arc::clone(&pool.inner);
            match thread::create(None, move || worker_loop(worker_inner.as_ref())) {
                Ok(tid) => {
                    pool.workers.push(tid);
                    pool.started += 1;
                }
                Err(_) => {
                    let _ = pool.destroy(true);
                    return Err(errno::EAGAIN);
                }
            }
        }
        Ok(pool)
    }

    /// Append a task to the queue tail and wake one worker.
    ///
    /// `EINVAL` once shutdown has begun — no new tasks are accepted.
    pub fn add<F>(&self, task: F) -> Result<(), i32>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.lock.lock()?;
        {
            // SAFETY: pool lock held.
            let state = unsafe { &mut *self.inner.state.get() };
            if state.shutdown {
                let _ = self.inner.lock.unlock();
                return Err(errno::EINVAL);
            }
            state.queue.push_back(Box::new(task));
        }
        let _ = self.inner.notify.signal();
        self.inner.lock.unlock()?;
        Ok(())
    }

    /// Number of workers that started successfully.
    #[must_use]
    pub fn started(&self) -> usize {
        self.started
    }

    /// Shut the pool down and reclaim it.
    ///
    /// Workers are woken, joined, and the primitives destroyed; then the
    /// residual queue is processed — executed in submission order when
    /// `graceful`, dropped otherwise.
    pub fn destroy(&mut self, graceful: bool) -> Result<(), i32> {
        self.inner.lock.lock()?;
        {
            // SAFETY: pool lock held.
            let state = unsafe { &mut *self.inner.state.get() };
            state.shutdown = true;
        }
        let _ = self.inner.notify.broadcast();
        self.inner.lock.unlock()?;

        for tid in self.workers.drain(..) {
            let _ = thread::join(tid);
        }

        let _ = self.inner.lock.destroy();
        let _ = self.inner.notify.destroy();

        // Workers are gone; the queue is ours alone now.
        let residue = {
            // SAFETY: no other reference to the state can exist here.
            let state = unsafe { &mut *self.inner.state.get() };
            std::mem::take(&mut state.queue)
        };
        for task in residue {
            if graceful {
                task();
            }
        }
        Ok(())
    }
}
