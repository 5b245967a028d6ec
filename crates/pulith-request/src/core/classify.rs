use crate::error::{ClassifiedError, ErrorKind, TransportFailure};

/// Normalize a raw transport failure into the fixed error taxonomy.
///
/// Once a response exists its status decides the kind; the cancellation and
/// timeout markers only matter when nothing was received.
pub fn classify(failure: &TransportFailure) -> ClassifiedError {
    let kind = match failure.status {
        None if failure.cancelled => ErrorKind::Cancelled,
        None if failure.timed_out => ErrorKind::Timeout,
        None => ErrorKind::Network,
        Some(401 | 403) => ErrorKind::Auth,
        Some(status) if status >= 500 => ErrorKind::Server,
        Some(400..=499) => ErrorKind::Client,
        Some(_) => ErrorKind::Unknown,
    };

    ClassifiedError::new(kind, failure.status, failure.message.clone(), failure.cause.clone())
}
