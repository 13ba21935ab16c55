use trek_shared::models::events::NotificationEvent;

/// Outbound notifications. Implementations must not block the caller:
/// delivery happens in the background and failures are only logged.
pub trait NotificationPort: Send + Sync {
    fn notify(&self, event: NotificationEvent);
}
