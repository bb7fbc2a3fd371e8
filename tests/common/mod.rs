#![allow(dead_code)]

pub use shellmux_test_utils::builders;
pub use shellmux_test_utils::{init_tracing, with_timeout};

use std::sync::Arc;

use shellmux::types::ProcessUpdate;
use tokio::sync::mpsc;

/// A caller endpoint plus the receiver the test reads updates from.
pub fn caller() -> (
    Arc<mpsc::UnboundedSender<ProcessUpdate>>,
    mpsc::UnboundedReceiver<ProcessUpdate>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}

/// Receive updates until (and including) the terminal one.
pub async fn collect_until_terminal(
    rx: &mut mpsc::UnboundedReceiver<ProcessUpdate>,
) -> Vec<ProcessUpdate> {
    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        let terminal = update.is_terminal();
        updates.push(update);
        if terminal {
            break;
        }
    }
    updates
}
