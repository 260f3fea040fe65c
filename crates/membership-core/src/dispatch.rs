//! Event handler loops, one per gossip view.
//!
//! Each loop processes its view's events strictly in delivery order, one at
//! a time, and returns as soon as shutdown is signalled. Events still queued
//! at that point are dropped.

use crate::gossip::{MembershipEvent, View};
use crate::reconciler::Reconciler;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Capacity for the per-view event channels created by callers.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

impl Reconciler {
    /// Run the LAN event handler until shutdown or until the source closes.
    pub async fn lan_event_handler(self, events: mpsc::Receiver<MembershipEvent>) {
        self.event_loop(View::Lan, events).await;
    }

    /// Run the WAN event handler until shutdown or until the source closes.
    pub async fn wan_event_handler(self, events: mpsc::Receiver<MembershipEvent>) {
        self.event_loop(View::Wan, events).await;
    }

    /// Spawn both handlers onto the runtime.
    pub fn spawn_handlers(
        &self,
        lan: mpsc::Receiver<MembershipEvent>,
        wan: mpsc::Receiver<MembershipEvent>,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        (
            tokio::spawn(self.clone().lan_event_handler(lan)),
            tokio::spawn(self.clone().wan_event_handler(wan)),
        )
    }

    async fn event_loop(&self, view: View, mut events: mpsc::Receiver<MembershipEvent>) {
        info!("{} event handler started", view);
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    debug!("{} event handler shutting down", view);
                    return;
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("{} event source closed", view);
                        return;
                    };
                    match view {
                        // Join tasks run detached; nothing here waits on them.
                        View::Lan => drop(self.handle_lan_event(event)),
                        View::Wan => self.handle_wan_event(event),
                    }
                }
            }
        }
    }
}
