use std::sync::{Arc, Mutex};
use std::time::Duration;

use shellmux::clock::Clock;
use shellmux::engine::CoordinatorEvent;
use tokio::sync::mpsc;

/// A clock that never fires by itself.
///
/// Scheduled events are recorded; the test decides when (and whether) to
/// deliver them with [`ManualClock::fire_next`].
#[derive(Clone, Default)]
pub struct ManualClock {
    pending: Arc<Mutex<Vec<(Duration, CoordinatorEvent)>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events scheduled and not yet fired.
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Delays requested so far for the events still pending.
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending.lock().unwrap().iter().map(|(d, _)| *d).collect()
    }

    /// Deliver the oldest pending event into the coordinator's queue.
    ///
    /// Returns `false` if nothing was pending.
    pub async fn fire_next(&self, tx: &mpsc::Sender<CoordinatorEvent>) -> bool {
        let next = {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        match next {
            Some((_, event)) => {
                tx.send(event).await.expect("coordinator queue closed");
                true
            }
            None => false,
        }
    }
}

impl Clock for ManualClock {
    fn schedule(&mut self, delay: Duration, event: CoordinatorEvent) {
        self.pending.lock().unwrap().push((delay, event));
    }
}
