use atl_schemas::ErrorKind;

/// A best-effort delivery failed. Logged and recorded, never propagated to
/// the business operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    Realtime(String),
    /// The push provider could not be reached or answered with a non-2xx.
    PushTransport { status: Option<u16>, message: String },
    /// The push provider rejected one message (e.g. `DeviceNotRegistered`).
    PushRejected { message: String },
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DependencyFailure
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Realtime(m) => write!(f, "realtime publish failed: {m}"),
            DeliveryError::PushTransport {
                status: Some(s),
                message,
            } => write!(f, "push transport failed (http {s}): {message}"),
            DeliveryError::PushTransport {
                status: None,
                message,
            } => write!(f, "push transport failed: {message}"),
            DeliveryError::PushRejected { message } => write!(f, "push rejected: {message}"),
        }
    }
}

impl std::error::Error for DeliveryError {}
