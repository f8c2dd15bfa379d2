//! In-process notifications for completed upload sessions.

use stitch_core::UploadCompleted;
use tokio::sync::broadcast;

/// Fan-out of [`UploadCompleted`] events.
///
/// Handlers publish only when the metadata store reports that their call
/// performed the session transition, so each session produces one event.
#[derive(Clone, Debug)]
pub struct CompletionNotifier {
    sender: broadcast::Sender<UploadCompleted>,
}

impl CompletionNotifier {
    /// Create a notifier buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadCompleted> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn publish(&self, event: UploadCompleted) -> usize {
        tracing::info!(
            upload_id = %event.upload_id,
            file_name = %event.file_name,
            version = event.version,
            chunks_total = event.chunks_total,
            "upload completed"
        );
        // No subscribers is not an error.
        self.sender.send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_core::UploadId;
    use time::OffsetDateTime;

    fn event() -> UploadCompleted {
        UploadCompleted {
            upload_id: UploadId::new(),
            file_name: "a.txt".to_string(),
            version: 1,
            chunks_total: 2,
            completed_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let notifier = CompletionNotifier::new(4);
        let mut rx = notifier.subscribe();
        let sent = event();

        assert_eq!(notifier.publish(sent.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), sent);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let notifier = CompletionNotifier::new(0);
        assert_eq!(notifier.publish(event()), 0);
    }
}
