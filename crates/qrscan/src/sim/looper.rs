//! Single-threaded callback context for the simulated camera.
//!
//! Real camera stacks deliver every callback on one dedicated thread. The
//! looper reproduces that: jobs run one at a time, in post order, never on
//! the caller's thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::trace;

type Job = Box<dyn FnOnce() + Send>;

pub struct Looper {
    jobs: mpsc::Sender<Job>,
    /// Posted but not yet started.
    pending: Arc<AtomicUsize>,
    gate: Mutex<Option<mpsc::Sender<()>>>,
}

impl Looper {
    pub fn spawn() -> Self {
        let (jobs, rx) = mpsc::channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pending);
        thread::spawn(move || {
            for job in rx {
                counter.fetch_sub(1, Ordering::SeqCst);
                job();
            }
            trace!("sim looper exiting");
        });
        Self {
            jobs,
            pending,
            gate: Mutex::new(None),
        }
    }

    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.jobs.send(Box::new(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Block until every posted job, including jobs posted by those jobs,
    /// has run. Must not be called from the looper itself or while paused.
    pub fn flush(&self) {
        loop {
            let (tx, rx) = mpsc::channel();
            self.post(move || {
                let _ = tx.send(());
            });
            if rx.recv().is_err() || self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
        }
    }

    /// Hold back every job posted from now on until [`Looper::resume`].
    pub fn pause(&self) {
        let (tx, rx) = mpsc::channel::<()>();
        *self.gate.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);
        self.post(move || {
            let _ = rx.recv();
        });
    }

    pub fn resume(&self) {
        self.gate.lock().unwrap_or_else(|p| p.into_inner()).take();
    }
}
