//! Server-Sent Events (SSE) utilities
//!
//! Broadcast channels are delivered to browsers as SSE streams: one stream per
//! subscribed channel name, heartbeat comments every 15 seconds.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::events::{ChannelName, EventBus};

const HEARTBEAT: Duration = Duration::from_secs(15);

/// SSE stream forwarding the events on `channel` that `user_id` may see
///
/// The first frame is a `ConnectionStatus` event carrying the channel name.
/// Lagging subscribers skip the events they missed and keep streaming.
pub fn channel_event_stream(
    bus: &EventBus,
    channel: ChannelName,
    user_id: i64,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = bus.subscribe();
    let channel_name = channel.as_string();
    info!(channel = %channel_name, "SSE client subscribed");

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data(format!("subscribed:{}", channel_name)));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.channel() != channel || !event.visible_to(user_id) {
                        continue;
                    }
                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            debug!(channel = %channel_name, event_type, "SSE: broadcasting event");
                            yield Ok(Event::default().event(event_type).data(json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %channel_name, skipped, "SSE: subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT).text("heartbeat"))
}
