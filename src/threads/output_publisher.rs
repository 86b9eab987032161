//! Output publisher thread.
//!
//! A single background thread owns the latest output snapshot and the
//! user-registered callback. Ingest hands over a snapshot under a mutex and
//! signals a condition variable; if the previous snapshot has not been
//! consumed yet it is overwritten with a warning: the publisher is lossy
//! and never blocks ingest.
//!
//! Ordering guarantee: the snapshot delivered for sweep `n` is the engine
//! state at the end of sweep `n`'s optimization; a sweep whose snapshot is
//! overwritten before consumption is silently dropped, and no cross-sweep
//! interleaving is visible to the consumer.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::core::types::{PointXyzir, Se3, Twist};

/// Callback invoked on the publisher thread for each consumed snapshot.
pub type OutputCallback = Box<dyn FnMut(&OutputSnapshot) + Send>;

/// Engine state published after a successful sweep.
#[derive(Debug, Clone)]
pub struct OutputSnapshot {
    /// Timestamp of the previous sweep end, microseconds.
    pub undistorted_stamp: u64,
    /// Map-frame sweep-end pose.
    pub undistort_transform: Se3,
    /// Body twist at sweep end.
    pub undistort_velocity: Twist,
    /// The sweep's point cloud undistorted into the sweep-end sensor frame.
    pub undistorted_cloud: Vec<PointXyzir>,
}

struct Slot {
    snapshot: Option<OutputSnapshot>,
    fresh: bool,
    running: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    available: Condvar,
}

/// Handle to the publisher thread. Dropping it requests shutdown and joins.
pub struct OutputPublisher {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl OutputPublisher {
    /// Spawn the publisher thread with the user callback.
    pub fn spawn(mut callback: OutputCallback) -> Self {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                snapshot: None,
                fresh: false,
                running: true,
            }),
            available: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("odom-output".into())
            .spawn(move || {
                log::info!("Output publisher thread starting");
                loop {
                    let snapshot = {
                        let mut slot = thread_shared.slot.lock().unwrap();
                        // Condition variables can wake spuriously.
                        while !slot.fresh && slot.running {
                            slot = thread_shared.available.wait(slot).unwrap();
                        }
                        if !slot.running {
                            break;
                        }
                        slot.fresh = false;
                        slot.snapshot.take()
                    };
                    if let Some(snapshot) = snapshot {
                        callback(&snapshot);
                    }
                }
                log::info!("Output publisher thread stopping");
            })
            .expect("Failed to spawn output publisher thread");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Hand over a snapshot. Never blocks on the consumer: an unconsumed
    /// previous snapshot is overwritten with a warning.
    pub fn publish(&self, snapshot: OutputSnapshot) {
        {
            let mut slot = self.shared.slot.lock().unwrap();
            if slot.fresh {
                log::warn!("Overwriting previous output");
            }
            slot.snapshot = Some(snapshot);
            slot.fresh = true;
        }
        self.shared.available.notify_one();
    }
}

impl Drop for OutputPublisher {
    fn drop(&mut self) {
        {
            let mut slot = self.shared.slot.lock().unwrap();
            slot.running = false;
        }
        self.shared.available.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn snapshot(stamp: u64) -> OutputSnapshot {
        OutputSnapshot {
            undistorted_stamp: stamp,
            undistort_transform: Se3::identity(),
            undistort_velocity: Twist::zeros(),
            undistorted_cloud: Vec::new(),
        }
    }

    #[test]
    fn test_callback_receives_snapshot() {
        let (tx, rx) = mpsc::channel();
        let publisher = OutputPublisher::spawn(Box::new(move |snap| {
            tx.send(snap.undistorted_stamp).unwrap();
        }));

        publisher.publish(snapshot(42));
        let stamp = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(stamp, 42);
    }

    #[test]
    fn test_overwrite_drops_older_snapshot() {
        // Block the consumer until both publishes have happened, then
        // verify only the newer snapshot is delivered.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (tx, rx) = mpsc::channel();
        let gate_rx = std::sync::Mutex::new(gate_rx);
        let first = AtomicUsize::new(0);
        let publisher = OutputPublisher::spawn(Box::new(move |snap| {
            if first.fetch_add(1, Ordering::SeqCst) == 0 {
                // Hold the thread before it can consume anything else.
                let _ = gate_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
            }
            tx.send(snap.undistorted_stamp).unwrap();
        }));

        publisher.publish(snapshot(1));
        // Give the consumer time to pick up snapshot 1 and block.
        std::thread::sleep(Duration::from_millis(100));
        publisher.publish(snapshot(2));
        publisher.publish(snapshot(3)); // overwrites 2 with a warning
        gate_tx.send(()).unwrap();

        let mut received = Vec::new();
        while let Ok(stamp) = rx.recv_timeout(Duration::from_millis(500)) {
            received.push(stamp);
        }
        assert_eq!(received, vec![1, 3]);
    }

    #[test]
    fn test_drop_joins_cleanly() {
        let publisher = OutputPublisher::spawn(Box::new(|_| {}));
        publisher.publish(snapshot(7));
        drop(publisher); // must not hang
    }
}
