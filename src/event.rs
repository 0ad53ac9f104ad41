// MIT License - Copyright (c) 2026 Peter Wright

use crate::alarm::AlarmStatusFlags;
use crate::auth::OtpPhone;

/// All events that can be emitted by the cloud client.
///
/// Users subscribe via `client.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<CloudEvent>`.
#[derive(Debug, Clone)]
pub enum CloudEvent {
    /// A session was obtained (login, OTP verification, or resume).
    Authenticated { user: String },
    /// The session was dropped by logout.
    LoggedOut,
    /// The persisted/held session aged out; a new login is needed.
    SessionExpired,
    /// Login paused: the account owner must pick a phone and verify an OTP.
    OtpRequired { phones: Vec<OtpPhone> },
    /// A status poll observed a different alarm state than the previous one.
    AlarmStatusChanged {
        installation_id: String,
        old_status: AlarmStatusFlags,
        new_status: AlarmStatusFlags,
    },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<CloudEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<CloudEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
