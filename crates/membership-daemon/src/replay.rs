//! Replay of recorded gossip events.
//!
//! The event file is JSON lines, one event per line, tagged with its view:
//!
//! ```text
//! {"view":"lan","event":{"type":"memberJoin","members":[{"name":"s2","addr":"10.0.0.2","role":"consul:dc1:8300"}]}}
//! {"view":"wan","event":{"type":"memberFailed","members":[{"name":"r1.dc2","addr":"10.1.0.1","role":"consul:dc2:8300"}]}}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use membership_core::{MembershipEvent, StaticMembers, View};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to read event file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid event on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} event handler is no longer accepting events")]
    ChannelClosed(View),
}

/// An event tagged with the gossip view it was delivered on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEvent {
    pub view: View,
    pub event: MembershipEvent,
}

/// Parse a JSON-lines event log.
pub fn parse_events(text: &str) -> Result<Vec<ViewEvent>, ReplayError> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line, text)| {
            serde_json::from_str(text).map_err(|source| ReplayError::Parse { line, source })
        })
        .collect()
}

/// Load an event log from disk.
pub async fn load_events(path: &Path) -> Result<Vec<ViewEvent>, ReplayError> {
    let text = tokio::fs::read_to_string(path).await?;
    parse_events(&text)
}

/// Feed events to the handlers in file order.
///
/// LAN events are folded into the LAN snapshot before being delivered, so
/// join tasks see the members they were told about as alive.
/// Returns the number of events delivered.
pub async fn feed(
    events: Vec<ViewEvent>,
    lan_members: &StaticMembers,
    lan_tx: &mpsc::Sender<MembershipEvent>,
    wan_tx: &mpsc::Sender<MembershipEvent>,
) -> Result<usize, ReplayError> {
    let mut delivered = 0;
    for ViewEvent { view, event } in events {
        debug!("Replaying {} {} event", view, event.kind());
        match view {
            View::Lan => {
                lan_members.apply(&event);
                lan_tx
                    .send(event)
                    .await
                    .map_err(|_| ReplayError::ChannelClosed(View::Lan))?;
            }
            View::Wan => {
                wan_tx
                    .send(event)
                    .await
                    .map_err(|_| ReplayError::ChannelClosed(View::Wan))?;
            }
        }
        delivered += 1;
    }
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use membership_core::{MemberSource, MemberStatus};

    const LOG: &str = r#"
# a server joins locally, a remote one fails
{"view":"lan","event":{"type":"memberJoin","members":[{"name":"s2","addr":"10.0.0.2","role":"consul:dc1:8300"}]}}

{"view":"wan","event":{"type":"memberFailed","members":[{"name":"r1.dc2","addr":"10.1.0.1","role":"consul:dc2:8300"}]}}
"#;

    #[test]
    fn test_parse_skips_blanks_and_comments() {
        let events = parse_events(LOG).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].view, View::Lan);
        assert_eq!(events[1].view, View::Wan);
        assert_eq!(events[1].event.kind(), "member-failed");
    }

    #[test]
    fn test_parse_reports_line_number() {
        let text = "{\"view\":\"lan\",\"event\":{\"type\":\"user\",\"name\":\"x\"}}\n\nnot json\n";

        match parse_events(text) {
            Err(ReplayError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_feed_updates_lan_snapshot() {
        let members = StaticMembers::new();
        let (lan_tx, mut lan_rx) = mpsc::channel(8);
        let (wan_tx, mut wan_rx) = mpsc::channel(8);

        let delivered = feed(parse_events(LOG).unwrap(), &members, &lan_tx, &wan_tx)
            .await
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(members.status_of("s2"), MemberStatus::Alive);
        assert_eq!(members.status_of("r1.dc2"), MemberStatus::None);
        assert_eq!(lan_rx.recv().await.unwrap().kind(), "member-join");
        assert_eq!(wan_rx.recv().await.unwrap().kind(), "member-failed");
    }

    #[tokio::test]
    async fn test_feed_fails_when_handler_gone() {
        let members = StaticMembers::new();
        let (lan_tx, lan_rx) = mpsc::channel(8);
        let (wan_tx, _wan_rx) = mpsc::channel(8);
        drop(lan_rx);

        let err = feed(parse_events(LOG).unwrap(), &members, &lan_tx, &wan_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::ChannelClosed(View::Lan)));
    }
}
