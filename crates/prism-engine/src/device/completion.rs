use std::sync::mpsc;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs completion work on a dedicated thread, strictly in enqueue order.
///
/// Backends push one job per committed command buffer, which gives handlers the
/// same ordering as the queue and keeps them off the committing thread. The
/// thread exits once the last handle to the worker is gone.
pub(crate) struct CompletionWorker {
    tx: mpsc::Sender<Job>,
}

impl CompletionWorker {
    pub(crate) fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
                log::trace!("completion worker exiting");
            })?;
        Ok(Self { tx })
    }

    /// Queues `job`. Hands it back if the worker thread is gone.
    pub(crate) fn enqueue(&self, job: Job) -> Result<(), Job> {
        self.tx.send(job).map_err(|e| e.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn jobs_run_in_order_off_the_caller_thread() {
        let worker = CompletionWorker::spawn("test completion").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let caller = thread::current().id();
        let (done_tx, done_rx) = mpsc::channel();

        for i in 0..8 {
            let seen = Arc::clone(&seen);
            let done_tx = done_tx.clone();
            worker
                .enqueue(Box::new(move || {
                    assert_ne!(thread::current().id(), caller);
                    seen.lock().unwrap().push(i);
                    if i == 7 {
                        done_tx.send(()).unwrap();
                    }
                }))
                .map_err(|_| "worker gone")
                .unwrap();
        }

        done_rx.recv().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }
}
