//! Generic error handling utilities
//!
//! Separates errors the operator can act on (bad registrations, bad config
//! files) from system failures (broker unreachable, topology rejected), so the
//! host can log them at the right level of detail.

/// Trait for errors that can distinguish between user-actionable and system errors
///
/// When `is_user_actionable()` returns `true`, `user_message()` should return
/// `Some(message)`; otherwise it should return `None`.
pub trait ContextualError: std::error::Error {
    /// Returns true if this error carries a message the operator can act on directly
    ///
    /// Examples: duplicate producer registration, zero concurrent consumers,
    /// invalid configuration values.
    fn is_user_actionable(&self) -> bool;

    /// Returns the specific user message if this is a user-actionable error
    fn user_message(&self) -> Option<String>;
}

/// Log errors with appropriate detail level based on error specificity
///
/// User-actionable errors are logged with their own message, system errors
/// with the operation context. Full details always go to debug level.
///
/// # Examples
/// ```rust,no_run
/// # use artemis_host::core::error_handling::log_error_with_context;
/// # use artemis_host::client::ClientError;
/// let error = ClientError::InvalidRegistration {
///     message: "concurrent_consumers must be at least 1".to_string(),
/// };
/// log_error_with_context(&error, "Client startup");
/// // Logs: "FATAL: concurrent_consumers must be at least 1"
/// ```
pub fn log_error_with_context<E: ContextualError + std::fmt::Display + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    match error.user_message() {
        Some(user_msg) if error.is_user_actionable() => {
            log::error!("FATAL: {}", user_msg);
        }
        _ => {
            log::error!("FATAL: {}: {}", operation_context, error);
        }
    }
    log::debug!("DETAIL: {}", error);
    log::debug!("DEBUG_DETAILS: {:?}", error);
}
