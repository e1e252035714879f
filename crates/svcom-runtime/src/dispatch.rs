//! Ordered, per-connector callback delivery.
//!
//! Every connector owns one [`Dispatcher`]: a thread draining a crossbeam
//! channel of messages. Messages of one dispatcher are handled one at a time
//! in send order, so callbacks of the same connector never overlap.
//!
//! [`CallbackCell`] holds callbacks that may be cancelled from any thread
//! while a delivery is in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

enum Envelope<M> {
    Deliver(M),
    Wake,
}

/// Sending half of a dispatcher queue.
pub(crate) struct DispatchSender<M> {
    tx: Sender<Envelope<M>>,
    stopped: Arc<AtomicBool>,
}

impl<M> Clone for DispatchSender<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<M> DispatchSender<M> {
    /// Queue a message. Returns false once the dispatcher has stopped.
    pub fn send(&self, message: M) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(Envelope::Deliver(message)).is_ok()
    }
}

/// A queue whose dispatcher thread has not been started yet.
pub(crate) struct DispatchQueue<M> {
    sender: DispatchSender<M>,
    rx: Receiver<Envelope<M>>,
}

/// Create a queue; messages sent before [`DispatchQueue::spawn`] are kept.
pub(crate) fn queue<M>() -> (DispatchSender<M>, DispatchQueue<M>) {
    let (tx, rx) = channel::unbounded();
    let sender = DispatchSender {
        tx,
        stopped: Arc::new(AtomicBool::new(false)),
    };
    (sender.clone(), DispatchQueue { sender, rx })
}

impl<M> DispatchQueue<M> {
    /// Pop a queued message without a dispatcher thread.
    #[cfg(test)]
    pub fn try_next(&self) -> Option<M> {
        loop {
            match self.rx.try_recv() {
                Ok(Envelope::Deliver(message)) => return Some(message),
                Ok(Envelope::Wake) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl<M: Send + 'static> DispatchQueue<M> {
    /// Start the dispatcher thread.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to create a thread, like [`std::thread::spawn`].
    pub fn spawn<H>(
        self,
        name: String,
        slow_threshold: Option<Duration>,
        handler: H,
    ) -> Dispatcher<M>
    where
        H: FnMut(M) + Send + 'static,
    {
        let DispatchQueue { sender, rx } = self;
        let stopped = sender.stopped.clone();
        let thread_name = name.clone();
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(rx, &stopped, &thread_name, slow_threshold, handler));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => panic!("failed to spawn dispatcher thread {name}: {err}"),
        };

        Dispatcher {
            sender,
            thread: Some(thread),
            name,
        }
    }
}

fn run<M, H>(
    rx: Receiver<Envelope<M>>,
    stopped: &AtomicBool,
    name: &str,
    slow_threshold: Option<Duration>,
    mut handler: H,
) where
    H: FnMut(M),
{
    for envelope in rx.iter() {
        if stopped.load(Ordering::Acquire) {
            break;
        }
        let Envelope::Deliver(message) = envelope else {
            continue;
        };

        let started = Instant::now();
        handler(message);

        if let Some(threshold) = slow_threshold {
            let elapsed = started.elapsed();
            if elapsed > threshold {
                tracing::warn!(
                    dispatcher = name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow callback"
                );
            }
        }
    }
    tracing::trace!(dispatcher = name, "dispatcher stopped");
}

/// A running dispatcher thread.
///
/// Dropping it stops delivery: the callback currently running completes,
/// queued messages are discarded, and the drop waits for the thread unless
/// it happens on the dispatcher thread itself.
pub(crate) struct Dispatcher<M> {
    sender: DispatchSender<M>,
    thread: Option<JoinHandle<()>>,
    name: String,
}

impl<M> Dispatcher<M> {
    pub fn sender(&self) -> DispatchSender<M> {
        self.sender.clone()
    }

    pub fn send(&self, message: M) -> bool {
        self.sender.send(message)
    }
}

impl<M> Drop for Dispatcher<M> {
    fn drop(&mut self) {
        self.sender.stopped.store(true, Ordering::Release);
        let _ = self.sender.tx.send(Envelope::Wake);

        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            tracing::error!(
                dispatcher = %self.name,
                "connector dropped from its own callback; not waiting for the dispatcher"
            );
            return;
        }
        if thread.join().is_err() {
            tracing::error!(dispatcher = %self.name, "dispatcher thread panicked");
        }
    }
}

struct CellState<F> {
    callback: Option<F>,
    cancelled: bool,
    running: Option<ThreadId>,
}

/// A callback that can be invoked from a dispatcher and cancelled from any
/// thread.
///
/// After [`CallbackCell::cancel`] returns, the callback is not running on any
/// other thread and will never run again.
pub(crate) struct CallbackCell<F> {
    state: Mutex<CellState<F>>,
    idle: Condvar,
}

impl<F> CallbackCell<F> {
    pub fn new(callback: F) -> Self {
        Self {
            state: Mutex::new(CellState {
                callback: Some(callback),
                cancelled: false,
                running: None,
            }),
            idle: Condvar::new(),
        }
    }

    /// Run `f` with the callback, keeping it for later invocations.
    ///
    /// Returns false if the cell was cancelled.
    pub fn invoke(&self, f: impl FnOnce(&mut F)) -> bool {
        let Some(callback) = self.begin() else {
            return false;
        };
        let mut running = Running {
            cell: self,
            callback: Some(callback),
        };
        if let Some(callback) = running.callback.as_mut() {
            f(callback);
        }
        true
    }

    /// Run `f` with the callback, consuming it.
    pub fn invoke_once(&self, f: impl FnOnce(F)) -> bool {
        let Some(callback) = self.begin() else {
            return false;
        };
        let _running = Running {
            cell: self,
            callback: None,
        };
        f(callback);
        true
    }

    fn begin(&self) -> Option<F> {
        let mut state = self.state.lock();
        if state.cancelled {
            return None;
        }
        let callback = state.callback.take()?;
        state.running = Some(thread::current().id());
        Some(callback)
    }

    /// Prevent further invocations and wait for one running on another thread.
    pub fn cancel(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        state.cancelled = true;
        let callback = state.callback.take();
        while state.running.is_some_and(|thread| thread != me) {
            self.idle.wait(&mut state);
        }
        drop(state);
        drop(callback);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

/// Marks a [`CallbackCell`] idle again when an invocation ends, including by
/// unwinding. A callback that panicked is not put back.
struct Running<'a, F> {
    cell: &'a CallbackCell<F>,
    callback: Option<F>,
}

impl<F> Drop for Running<'_, F> {
    fn drop(&mut self) {
        let mut state = self.cell.state.lock();
        state.running = None;
        let leftover = if state.cancelled || thread::panicking() {
            self.callback.take()
        } else {
            state.callback = self.callback.take();
            None
        };
        drop(state);
        self.cell.idle.notify_all();
        drop(leftover);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn messages_are_handled_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (sender, queue) = queue::<u32>();
        for i in 0..3 {
            assert!(sender.send(i));
        }
        let sink = seen.clone();
        let dispatcher = queue.spawn("test-order".to_string(), None, move |m| sink.lock().push(m));
        for i in 3..100 {
            assert!(dispatcher.send(i));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < 100 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        drop(dispatcher);
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn drop_waits_for_running_callback_and_discards_the_rest() {
        let (entered_tx, entered_rx) = channel::bounded(1);
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = handled.clone();
        let (sender, queue) = queue::<()>();
        let dispatcher = queue.spawn("test-drop".to_string(), None, move |()| {
            let _ = entered_tx.try_send(());
            thread::sleep(Duration::from_millis(50));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..10 {
            sender.send(());
        }
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("first callback should start");

        drop(dispatcher);
        let after_drop = handled.load(Ordering::SeqCst);
        assert!(after_drop >= 1);
        assert!(after_drop < 10);
        assert!(!sender.send(()));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(handled.load(Ordering::SeqCst), after_drop);
    }

    #[test]
    fn cancelled_cell_is_not_invoked() {
        let cell = CallbackCell::new(|x: u32| x + 1);
        cell.cancel();
        assert!(!cell.invoke(|_| panic!("cancelled callback should not run")));
        assert!(cell.is_cancelled());
    }

    #[test]
    fn invoke_once_consumes_the_callback() {
        let cell = CallbackCell::new(Box::new(|| ()) as Box<dyn FnOnce() + Send>);
        assert!(cell.invoke_once(|f| f()));
        assert!(!cell.invoke_once(|f| f()));
    }

    #[test]
    fn cancel_waits_for_delivery_on_another_thread() {
        let cell = Arc::new(CallbackCell::new(()));
        let finished = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = channel::bounded(1);

        let worker = {
            let cell = cell.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                cell.invoke(|_| {
                    entered_tx.send(()).expect("test should be listening");
                    thread::sleep(Duration::from_millis(50));
                    finished.store(true, Ordering::SeqCst);
                });
            })
        };

        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("callback should start");
        cell.cancel();
        assert!(finished.load(Ordering::SeqCst));
        worker.join().expect("worker should not panic");
    }

    #[test]
    fn cancel_from_inside_the_callback_does_not_deadlock() {
        let cell = Arc::new(CallbackCell::new(()));
        let inner = cell.clone();
        assert!(cell.invoke(move |_| inner.cancel()));
        assert!(cell.is_cancelled());
    }

    #[test]
    fn panicking_callback_leaves_the_cell_cancellable() {
        let cell = Arc::new(CallbackCell::new(()));
        let worker = {
            let cell = cell.clone();
            thread::spawn(move || {
                cell.invoke(|_| panic!("callback failure"));
            })
        };
        assert!(worker.join().is_err());
        assert!(!cell.invoke(|_| panic!("a panicked callback should not run again")));

        let (done_tx, done_rx) = channel::bounded(1);
        let canceller = {
            let cell = cell.clone();
            thread::spawn(move || {
                cell.cancel();
                let _ = done_tx.send(());
            })
        };
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("cancel should return after a panicked callback");
        canceller.join().expect("canceller should not panic");
    }
}
