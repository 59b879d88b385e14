//! Deferred refresh of a device session after hardware notifications.
//!
//! Notifications arrive on a hardware-owned thread and may come in bursts.
//! Listeners only post a signal; a dedicated worker waits until the burst
//! has been quiet for the debounce window and then runs the refresh once.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Changed,
    Shutdown,
}

/// Cheap handle that listener closures hold to request a refresh.
#[derive(Debug, Clone)]
pub struct RefreshNotifier {
    tx: Sender<Signal>,
}

impl RefreshNotifier {
    /// Never blocks. A full queue already holds a pending refresh.
    pub fn notify(&self) {
        let _ = self.tx.try_send(Signal::Changed);
    }
}

pub struct RefreshWorker {
    tx: Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshWorker {
    /// Starts the worker. `refresh` returns false once its target is gone,
    /// which ends the thread.
    pub fn spawn<F>(name: &str, debounce: Duration, refresh: F) -> std::io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (tx, rx) = bounded(4);
        let handle = thread::Builder::new()
            .name(format!("iohal-refresh-{name}"))
            .spawn(move || run(rx, debounce, refresh))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub fn notifier(&self) -> RefreshNotifier {
        RefreshNotifier {
            tx: self.tx.clone(),
        }
    }

    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(Signal::Shutdown);
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("refresh worker panicked");
        }
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<F>(rx: Receiver<Signal>, debounce: Duration, mut refresh: F)
where
    F: FnMut() -> bool,
{
    loop {
        match rx.recv() {
            Ok(Signal::Changed) => {}
            Ok(Signal::Shutdown) | Err(_) => return,
        }
        let mut deadline = Instant::now() + debounce;
        loop {
            match rx.recv_deadline(deadline) {
                Ok(Signal::Changed) => deadline = Instant::now() + debounce,
                Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => break,
            }
        }
        debug!("running debounced refresh");
        if !refresh() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_worker(debounce_ms: u64) -> (RefreshWorker, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let worker = RefreshWorker::spawn("test", Duration::from_millis(debounce_ms), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            true
        })
        .expect("spawn refresh worker");
        (worker, count)
    }

    #[test]
    fn coalesces_a_burst() {
        let (worker, count) = counting_worker(30);
        let notifier = worker.notifier();
        for _ in 0..50 {
            notifier.notify();
        }
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        notifier.notify();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn shutdown_discards_pending_refresh() {
        let (mut worker, count) = counting_worker(500);
        worker.notifier().notify();
        worker.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        worker.notifier().notify();
    }

    #[test]
    fn stops_when_target_is_gone() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let worker = RefreshWorker::spawn("gone", Duration::from_millis(5), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            false
        })
        .expect("spawn refresh worker");
        worker.notifier().notify();
        thread::sleep(Duration::from_millis(100));
        worker.notifier().notify();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
