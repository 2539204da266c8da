//! Serialized delivery of listener callbacks.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::config::DeliveryMode;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    running: bool,
}

/// Runs submitted jobs one at a time, in submission order.
///
/// Inline mode drains on the submitting thread; a job submitted from inside
/// a running job is queued and picked up by the same drain loop. Threaded
/// mode drains on a spawned thread that exits once the queue is empty.
pub(crate) struct Dispatcher {
    name: String,
    mode: DeliveryMode,
    queue: Arc<Mutex<Queue>>,
}

impl Dispatcher {
    pub(crate) fn new(name: String, mode: DeliveryMode) -> Self {
        Self {
            name,
            mode,
            queue: Arc::new(Mutex::new(Queue::default())),
        }
    }

    pub(crate) fn submit(&self, job: Job) {
        {
            let mut queue = self.queue.lock();
            queue.jobs.push_back(job);
            if queue.running {
                return;
            }
            queue.running = true;
        }

        match self.mode {
            DeliveryMode::Inline => drain(&self.queue, &self.name),
            DeliveryMode::Threaded => {
                let queue = Arc::clone(&self.queue);
                let name = self.name.clone();
                let spawned = thread::Builder::new()
                    .name(self.name.clone())
                    .spawn(move || drain(&queue, &name));
                if let Err(err) = spawned {
                    error!(
                        dispatcher = %self.name,
                        error = %err,
                        "failed to spawn delivery thread; delivering inline"
                    );
                    drain(&self.queue, &self.name);
                }
            }
        }
    }
}

fn drain(queue: &Mutex<Queue>, name: &str) {
    loop {
        let job = {
            let mut queue = queue.lock();
            match queue.jobs.pop_front() {
                Some(job) => job,
                None => {
                    queue.running = false;
                    return;
                }
            }
        };
        trace!(dispatcher = name, "delivering");
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(dispatcher = name, "listener panicked");
        }
    }
}
