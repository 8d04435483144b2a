//! Execution strategies: how one pass's chunks are spread over threads.

use std::collections::VecDeque;
use std::sync::mpsc::channel;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use ember_core::ExecutionStrategy;
use rayon::prelude::*;

use crate::chunk::{render_chunk, Chunk, ChunkResult};
use crate::job::Snapshot;
use crate::RenderError;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    tasks: VecDeque<Task>,
    shutdown: bool,
}

#[derive(Default)]
struct PoolShared {
    queue: Mutex<Queue>,
    available: Condvar,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed set of persistent threads pulling tasks from a FIFO queue.
///
/// Idle workers block on a condition variable. Dropping the pool lets the
/// workers drain whatever is queued, then joins them.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers; 0 means one per available core.
    pub fn new(threads: usize) -> Result<Self, RenderError> {
        let threads = if threads == 0 {
            std::thread::available_parallelism().map_or(1, usize::from)
        } else {
            threads
        };

        let shared = Arc::new(PoolShared::default());
        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("EmberWorker-{}", index))
                .spawn(move || worker_loop(&shared))
                .map_err(RenderError::Spawn)?;
            handles.push(handle);
        }

        log::debug!("Worker pool started with {} threads", threads);
        Ok(Self { shared, handles })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Queue a task; an idle worker picks it up in FIFO order.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.lock().tasks.push_back(Box::new(task));
        self.shared.available.notify_one();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut queue = shared.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break Some(task);
                }
                if queue.shutdown {
                    break None;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        match task {
            Some(task) => task(),
            None => return,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.available.notify_all();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
    }
}

/// Render `chunks` of one pass with the configured strategy.
///
/// `Serial` ignores the chunk list and renders the whole image as one
/// chunk on the calling thread. `WorkerPool` needs `pool`.
pub fn execute(
    strategy: ExecutionStrategy,
    chunks: Vec<Chunk>,
    snapshot: &Arc<Snapshot>,
    pass: u32,
    pool: Option<&WorkerPool>,
) -> Vec<ChunkResult> {
    let config = &snapshot.config;
    match strategy {
        ExecutionStrategy::Serial => {
            let chunk = Chunk::full(config.width, config.height);
            vec![render_chunk(chunk, &snapshot.world(), &snapshot.camera, config, pass)]
        }
        ExecutionStrategy::Parallel => chunks
            .into_par_iter()
            .map(|chunk| render_chunk(chunk, &snapshot.world(), &snapshot.camera, config, pass))
            .collect(),
        ExecutionStrategy::WorkerPool { .. } => match pool {
            Some(pool) => execute_on_pool(pool, chunks, snapshot, pass),
            None => panic!("worker pool strategy dispatched without a pool"),
        },
    }
}

fn execute_on_pool(pool: &WorkerPool, chunks: Vec<Chunk>, snapshot: &Arc<Snapshot>, pass: u32) -> Vec<ChunkResult> {
    let expected = chunks.len();
    let (tx, rx) = channel();

    for chunk in chunks {
        let tx = tx.clone();
        let snapshot = Arc::clone(snapshot);
        pool.submit(move || {
            let result = render_chunk(chunk, &snapshot.world(), &snapshot.camera, &snapshot.config, pass);
            // Receiver only disappears if the pass itself was abandoned
            let _ = tx.send(result);
        });
    }
    drop(tx);

    // Ends early only if a task died without sending
    let results: Vec<ChunkResult> = rx.iter().collect();
    assert_eq!(
        results.len(),
        expected,
        "worker pool returned {} of {} chunks",
        results.len(),
        expected
    );
    results
}
