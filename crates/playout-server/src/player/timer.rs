//! Cancellable thread-backed timers for the worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A one-shot or periodic timer firing a callback from its own thread.
///
/// Cancelling is cooperative: the flag is checked before every firing, so
/// a cancelled timer never fires again but the thread may linger one
/// interval. Dropping cancels.
pub struct Timer {
    cancelled: Arc<AtomicBool>,
}

impl Timer {
    /// Fires `f` once after `delay` unless cancelled first.
    pub fn one_shot(delay: Duration, f: impl FnOnce() + Send + 'static) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        thread::Builder::new()
            .name("playout-timer".into())
            .spawn(move || {
                thread::sleep(delay);
                if !flag.load(Ordering::SeqCst) {
                    f();
                }
            })
            .expect("spawning a timer thread");
        Self { cancelled }
    }

    /// Fires `f` every `interval` until cancelled.
    pub fn periodic(interval: Duration, f: impl Fn() + Send + 'static) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        thread::Builder::new()
            .name("playout-timer".into())
            .spawn(move || loop {
                thread::sleep(interval);
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                f();
            })
            .expect("spawning a timer thread");
        Self { cancelled }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn one_shot_fires_once() {
        let (tx, rx) = mpsc::channel();
        let _timer = Timer::one_shot(Duration::from_millis(5), move || {
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let (tx, rx) = mpsc::channel();
        let timer = Timer::one_shot(Duration::from_millis(50), move || {
            let _ = tx.send(());
        });
        timer.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn periodic_fires_until_cancelled() {
        let (tx, rx) = mpsc::channel();
        let timer = Timer::periodic(Duration::from_millis(5), move || {
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        timer.cancel();
    }
}
