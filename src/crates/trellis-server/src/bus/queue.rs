//! Per-run message queue
//!
//! FIFO of `{topic, data}` messages with a timeout- and cancel-aware
//! dequeue. Waiters deregister synchronously on timeout or cancellation
//! (the select drops the notified future), so abandoned subscribers never
//! leak wakeups.

use super::control::CancelSignal;
use crate::errors::{Result, ServerError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// A message published to a run's queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Full topic, `run:<run_id>:stream:<subtopic>` or `run:<run_id>:control`
    pub topic: String,
    /// Message payload
    pub data: Value,
}

impl StreamMessage {
    /// A payload message under a stream subtopic
    pub fn stream(run_id: Uuid, subtopic: &str, data: Value) -> Self {
        Self {
            topic: format!("run:{run_id}:stream:{subtopic}"),
            data,
        }
    }

    /// An in-band control message
    pub fn control(run_id: Uuid, data: Value) -> Self {
        Self {
            topic: format!("run:{run_id}:control"),
            data,
        }
    }

    /// The sentinel terminating a subscriber
    pub fn done(run_id: Uuid) -> Self {
        Self::control(run_id, Value::String("done".to_string()))
    }

    /// Whether this is a control-topic message
    pub fn is_control(&self) -> bool {
        self.topic.ends_with(":control")
    }

    /// Whether this is the terminating sentinel
    pub fn is_done(&self) -> bool {
        self.is_control() && self.data.as_str() == Some("done")
    }

    /// The stream subtopic, or `"control"` for control messages
    pub fn event_name(&self) -> &str {
        if self.is_control() {
            return "control";
        }
        self.topic
            .rsplit_once(":stream:")
            .map(|(_, subtopic)| subtopic)
            .unwrap_or(self.topic.as_str())
    }
}

/// FIFO queue connecting one run's executor output to its subscribers
#[derive(Default)]
pub struct MessageQueue {
    items: Mutex<VecDeque<StreamMessage>>,
    notify: Notify,
}

impl MessageQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and wake all waiters
    pub fn push(&self, message: StreamMessage) {
        self.items.lock().push_back(message);
        self.notify.notify_waiters();
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Dequeue the next message, failing with [`ServerError::Timeout`] after
    /// `timeout`, or [`ServerError::Cancelled`] when `cancel` fires first.
    pub async fn get(
        &self,
        timeout: Duration,
        cancel: Option<&CancelSignal>,
    ) -> Result<StreamMessage> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register before checking the queue so a push between the check
            // and the await still wakes us.
            let notified = self.notify.notified();

            if let Some(message) = self.items.lock().pop_front() {
                return Ok(message);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ServerError::Timeout);
            }

            match cancel {
                Some(signal) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(remaining) => return Err(ServerError::Timeout),
                        _ = signal.cancelled() => return Err(ServerError::Cancelled),
                    }
                }
                None => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(remaining) => return Err(ServerError::Timeout),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MessageQueue::new();
        let run_id = Uuid::new_v4();
        queue.push(StreamMessage::stream(run_id, "values", json!(1)));
        queue.push(StreamMessage::stream(run_id, "values", json!(2)));

        let first = queue.get(Duration::from_millis(50), None).await.unwrap();
        let second = queue.get(Duration::from_millis(50), None).await.unwrap();
        assert_eq!(first.data, json!(1));
        assert_eq!(second.data, json!(2));
    }

    #[tokio::test]
    async fn test_get_times_out() {
        let queue = MessageQueue::new();
        let err = queue.get(Duration::from_millis(20), None).await.unwrap_err();
        assert!(matches!(err, ServerError::Timeout));
    }

    #[tokio::test]
    async fn test_get_wakes_on_push() {
        let queue = Arc::new(MessageQueue::new());
        let run_id = Uuid::new_v4();

        let getter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get(Duration::from_secs(5), None).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(StreamMessage::stream(run_id, "values", json!("hi")));

        let message = getter.await.unwrap().unwrap();
        assert_eq!(message.data, json!("hi"));
    }

    #[tokio::test]
    async fn test_get_cancelled() {
        let queue = Arc::new(MessageQueue::new());
        let cancel = CancelSignal::new();

        let getter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.get(Duration::from_secs(5), Some(&cancel)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.fire();
        let err = getter.await.unwrap().unwrap_err();
        assert!(matches!(err, ServerError::Cancelled));

        // A pre-fired signal cancels immediately.
        let err = queue
            .get(Duration::from_secs(1), Some(&cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Cancelled));
    }

    #[test]
    fn test_sentinel_and_event_names() {
        let run_id = Uuid::new_v4();
        let done = StreamMessage::done(run_id);
        assert!(done.is_done());
        assert_eq!(done.event_name(), "control");

        let values = StreamMessage::stream(run_id, "values", json!({}));
        assert!(!values.is_done());
        assert_eq!(values.event_name(), "values");
        assert_eq!(values.topic, format!("run:{run_id}:stream:values"));
    }
}
