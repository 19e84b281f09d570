//! Out-of-band data relay at the portal.
//!
//! Inbound data messages addressed to a peer are queued here instead of
//! being sent inline, so RPC connection threads never block on a slow
//! downstream send. A single worker drains the queue with a timed pop and
//! observes the stop flag between pops.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use logger::Logger;
use overlay_protocol::messages::data::DataMessage;

const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// The sending side the worker uses to relay a message; supplied by the
/// engine so the queue stays ignorant of peer stubs.
pub type RelaySender = Arc<dyn Fn(&DataMessage) -> Result<(), String> + Send + Sync>;

struct QueueInner {
    queue: Mutex<VecDeque<DataMessage>>,
    available: Condvar,
    stopped: AtomicBool,
    capacity: usize,
}

pub struct ForwardingQueue {
    inner: Arc<QueueInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ForwardingQueue {
    pub fn new(capacity: usize) -> Self {
        ForwardingQueue {
            inner: Arc::new(QueueInner {
                queue: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                stopped: AtomicBool::new(false),
                capacity,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Starts the single worker. Relay failures are logged and the message
    /// dropped; the queue never retries.
    pub fn start(&self, sender: RelaySender, logger: Logger) {
        let inner = Arc::clone(&self.inner);
        let handle = thread::spawn(move || {
            while !inner.stopped.load(Ordering::SeqCst) {
                let message = {
                    let mut queue = match inner.queue.lock() {
                        Ok(queue) => queue,
                        Err(_) => break,
                    };
                    if queue.is_empty() {
                        let (guard, _) = match inner.available.wait_timeout(queue, POP_TIMEOUT) {
                            Ok(result) => result,
                            Err(_) => break,
                        };
                        queue = guard;
                    }
                    queue.pop_front()
                };

                if let Some(message) = message {
                    if let Err(reason) = sender(&message) {
                        logger
                            .warn(&format!(
                                "dropping data message {} for {}: {}",
                                message.message_id, message.destination, reason
                            ))
                            .ok();
                    }
                }
            }
        });

        if let Ok(mut slot) = self.worker.lock() {
            *slot = Some(handle);
        }
    }

    /// Enqueues a message. Returns `false` (message dropped) when the queue
    /// is full or stopped.
    pub fn push(&self, message: DataMessage) -> bool {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(mut queue) = self.inner.queue.lock() else {
            return false;
        };
        if queue.len() >= self.inner.capacity {
            return false;
        }
        queue.push_back(message);
        self.inner.available.notify_one();
        true
    }

    /// Flags the worker to stop; it exits after its current pop.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.available.notify_all();
        if let Ok(mut slot) = self.worker.lock() {
            if let Some(handle) = slot.take() {
                handle.join().ok();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ForwardingQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Instant;

    fn test_logger(tag: &str) -> Logger {
        Logger::new(Path::new("/tmp/overlay_forwarding_tests"), tag).expect("logger")
    }

    fn message(id: &str) -> DataMessage {
        DataMessage::new(id, "A", "B", vec![1])
    }

    #[test]
    fn test_worker_drains_in_fifo_order() {
        let queue = ForwardingQueue::new(16);
        let relayed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&relayed);
        queue.start(
            Arc::new(move |m: &DataMessage| {
                sink.lock().unwrap().push(m.message_id.clone());
                Ok(())
            }),
            test_logger("fifo"),
        );

        assert!(queue.push(message("m-1")));
        assert!(queue.push(message("m-2")));

        let deadline = Instant::now() + Duration::from_secs(2);
        while relayed.lock().unwrap().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(
            relayed.lock().unwrap().as_slice(),
            ["m-1".to_string(), "m-2".to_string()]
        );
        queue.stop();
    }

    #[test]
    fn test_bounded_push_drops_overflow() {
        let queue = ForwardingQueue::new(2);
        // No worker running, so the queue fills.
        assert!(queue.push(message("m-1")));
        assert!(queue.push(message("m-2")));
        assert!(!queue.push(message("m-3")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_stop_terminates_worker_and_rejects_pushes() {
        let queue = ForwardingQueue::new(4);
        queue.start(Arc::new(|_: &DataMessage| Ok(())), test_logger("stop"));

        queue.stop();

        assert!(!queue.push(message("m-late")));
    }

    #[test]
    fn test_send_failure_is_swallowed() {
        let queue = ForwardingQueue::new(4);
        queue.start(
            Arc::new(|_: &DataMessage| Err("peer not connected".to_string())),
            test_logger("failure"),
        );

        assert!(queue.push(message("m-1")));
        thread::sleep(Duration::from_millis(150));
        assert!(queue.is_empty());

        queue.stop();
    }
}
