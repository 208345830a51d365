//! Metrics emission for the write path.
//!
//! Events are recorded through the `metrics` facade. Without an installed
//! recorder every event is a no-op, so embedding applications decide where
//! the numbers go.

pub mod events;

/// Emit an internal event.
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding metric.
///
/// # Example
///
/// ```ignore
/// use snowdrift::metrics::events::FileCommitted;
///
/// emit!(FileCommitted { recovered: true });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
