//! Standalone server-to-client event stream for listen exchanges.

use crate::session::SseEvent;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Buffered server-initiated messages per listen stream.
pub(crate) const OUTBOUND_CAPACITY: usize = 64;

struct StreamState {
    rx: mpsc::Receiver<Value>,
    keep_alive: Option<Duration>,
    closed: CancellationToken,
    next_id: u64,
}

/// Turn a session's outbound queue into an SSE stream.
///
/// The stream ends when the session closes or the sender side goes away.
/// Between messages it emits keep-alive comments every `keep_alive`.
pub(crate) fn event_stream(
    rx: mpsc::Receiver<Value>,
    keep_alive: Option<Duration>,
    closed: CancellationToken,
) -> BoxStream<'static, SseEvent> {
    let state = StreamState {
        rx,
        keep_alive,
        closed,
        next_id: 0,
    };
    stream::unfold(state, |mut state| async move {
        let keep_alive = state.keep_alive;
        let tick = async move {
            match keep_alive {
                Some(period) => tokio::time::sleep(period).await,
                None => std::future::pending::<()>().await,
            }
        };
        let next = tokio::select! {
            biased;
            _ = state.closed.cancelled() => Next::Closed,
            msg = state.rx.recv() => Next::Message(msg),
            _ = tick => Next::KeepAlive,
        };
        match next {
            Next::Closed | Next::Message(None) => None,
            Next::Message(Some(msg)) => {
                state.next_id += 1;
                let event = SseEvent::Message {
                    id: Some(state.next_id.to_string()),
                    data: msg.to_string(),
                };
                Some((event, state))
            }
            Next::KeepAlive => Some((SseEvent::KeepAlive, state)),
        }
    })
    .boxed()
}

enum Next {
    Closed,
    Message(Option<Value>),
    KeepAlive,
}
