// src/clock.rs

//! Delayed event delivery.
//!
//! The coordinator never sleeps. When it needs a `RefreshTick` later it asks
//! a [`Clock`] to post the event into its inbound queue after a delay.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::trace;

use crate::engine::CoordinatorEvent;

/// "Deliver this event to the coordinator no earlier than `delay` from now."
pub trait Clock: Send {
    fn schedule(&mut self, delay: Duration, event: CoordinatorEvent);
}

/// Clock backed by Tokio timers.
///
/// Holds only a weak sender, so an armed timer does not keep the inbound
/// queue open once every submitter is gone. Ticks that can no longer be
/// posted are raised by the runtime from its own deadline.
#[derive(Debug, Clone)]
pub struct TokioClock {
    runtime: Handle,
    target: mpsc::WeakSender<CoordinatorEvent>,
}

impl TokioClock {
    pub fn new(runtime: Handle, target: mpsc::WeakSender<CoordinatorEvent>) -> Self {
        Self { runtime, target }
    }
}

impl Clock for TokioClock {
    fn schedule(&mut self, delay: Duration, event: CoordinatorEvent) {
        let target = self.target.clone();
        self.runtime.spawn(async move {
            sleep(delay).await;
            match target.upgrade() {
                Some(tx) => {
                    if tx.send(event).await.is_err() {
                        trace!("coordinator gone before timer fired");
                    }
                }
                None => trace!("coordinator gone before timer fired"),
            }
        });
    }
}
