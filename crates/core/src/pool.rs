//! Fixed-size worker pool on plain OS threads.
//!
//! Both the notification fan-out of the dispatcher and the job execution of a
//! service run on a `WorkerPool`, which bounds how many callbacks or jobs can
//! execute at once. Tasks are pulled in FIFO order from a shared channel.
//!
//! A task that panics is contained: the panic is logged and the worker thread
//! keeps serving the queue.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use tracing::{debug, error};

use crate::sync::lock;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    EmptyPool,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
    #[error("worker pool is shut down")]
    ShutDown,
}

/// A bounded set of worker threads executing submitted closures.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    size: usize,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    busy: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `size` worker threads named `<name>-<index>`.
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::EmptyPool);
        }

        let name = name.into();
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));
        let busy = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = rx.clone();
            let busy = busy.clone();
            let pool = name.clone();
            let join = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&pool, &rx, &busy))
                .map_err(|e| PoolError::Spawn(e.to_string()))?;
            workers.push(join);
        }

        debug!(pool = %name, size, "worker pool started");

        Ok(Self {
            name,
            size,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            busy,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of tasks currently executing.
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Queue a task for execution on the next free worker.
    pub fn execute<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = lock(&self.sender);
        let tx = sender.as_ref().ok_or(PoolError::ShutDown)?;
        tx.send(Box::new(task)).map_err(|_| PoolError::ShutDown)
    }

    /// Stop accepting tasks, let queued tasks finish, and join the workers.
    ///
    /// Idempotent. When called from one of the pool's own threads that thread
    /// is not joined.
    pub fn shutdown(&self) {
        let sender = lock(&self.sender).take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }

        debug!(pool = %self.name, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(pool: &str, rx: &Mutex<mpsc::Receiver<Task>>, busy: &AtomicUsize) {
    loop {
        let task = {
            let rx = lock(rx);
            rx.recv()
        };

        let Ok(task) = task else {
            break;
        };

        busy.fetch_add(1, Ordering::SeqCst);
        if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
            error!(pool, panic = %panic_message(payload.as_ref()), "worker task panicked");
        }
        busy.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
