use std::fmt;

/// Error types for the print notifier.
///
/// Only configuration errors are fatal. Everything else is reported by the
/// component that hit it and degrades the affected feature for one event,
/// one webhook, or one print job.

/// Main error type for print notifier operations.
#[derive(Debug)]
pub enum NotifyError {
    /// Errors raised while loading configuration at startup.
    ConfigError(ConfigError),

    /// Errors raised while posting to a webhook.
    DeliveryError(DeliveryError),

    /// Errors raised while rendering a message template.
    RenderError(RenderError),

    /// Errors raised by the per-job print log.
    PrintLogError(PrintLogError),
}

/// Errors related to configuration and application setup.
#[derive(Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    MissingEnvVar { var_name: String },

    /// Configuration file could not be read or parsed.
    FileReadError { path: String, reason: String },

    /// Invalid configuration values provided.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors specific to webhook delivery.
#[derive(Debug)]
pub enum DeliveryError {
    /// The request could not be sent or no response was received.
    RequestFailed { url: String, reason: String },

    /// The webhook answered with a status other than 200 or 204.
    Rejected { url: String, status: u16, body: String },
}

/// Errors raised while rendering notification text.
#[derive(Debug)]
pub enum RenderError {
    /// Template references a placeholder that does not exist.
    UnknownPlaceholder { event: String, name: String },

    /// Template opens a placeholder with `{{` but never closes it.
    Unterminated { event: String },
}

/// Errors raised by the print log writer.
#[derive(Debug)]
pub enum PrintLogError {
    /// Log directory or file could not be created.
    OpenFailed { path: String, reason: String },

    /// An entry could not be serialized or written.
    WriteFailed { path: String, reason: String },
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::ConfigError(e) => write!(f, "Configuration error: {}", e),
            NotifyError::DeliveryError(e) => write!(f, "Delivery error: {}", e),
            NotifyError::RenderError(e) => write!(f, "Render error: {}", e),
            NotifyError::PrintLogError(e) => write!(f, "Print log error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingEnvVar { var_name } => {
                write!(f, "Required environment variable '{}' is not set", var_name)
            }
            ConfigError::FileReadError { path, reason } => {
                write!(
                    f,
                    "Failed to read configuration file '{}': {}",
                    path, reason
                )
            }
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for field '{}': {}",
                    value, field, reason
                )
            }
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::RequestFailed { url, reason } => {
                write!(f, "Webhook request to '{}' failed: {}", url, reason)
            }
            DeliveryError::Rejected { url, status, body } => {
                write!(f, "Webhook '{}' answered HTTP {}: {}", url, status, body)
            }
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::UnknownPlaceholder { event, name } => {
                write!(
                    f,
                    "Template for '{}' uses unknown placeholder '{{{{{}}}}}'",
                    event, name
                )
            }
            RenderError::Unterminated { event } => {
                write!(f, "Template for '{}' has an unterminated placeholder", event)
            }
        }
    }
}

impl fmt::Display for PrintLogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrintLogError::OpenFailed { path, reason } => {
                write!(f, "Failed to open print log '{}': {}", path, reason)
            }
            PrintLogError::WriteFailed { path, reason } => {
                write!(f, "Failed to write print log '{}': {}", path, reason)
            }
        }
    }
}

impl std::error::Error for NotifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NotifyError::ConfigError(e) => Some(e),
            NotifyError::DeliveryError(e) => Some(e),
            NotifyError::RenderError(e) => Some(e),
            NotifyError::PrintLogError(e) => Some(e),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for DeliveryError {}
impl std::error::Error for RenderError {}
impl std::error::Error for PrintLogError {}

impl From<ConfigError> for NotifyError {
    fn from(err: ConfigError) -> Self {
        NotifyError::ConfigError(err)
    }
}

impl From<DeliveryError> for NotifyError {
    fn from(err: DeliveryError) -> Self {
        NotifyError::DeliveryError(err)
    }
}

impl From<RenderError> for NotifyError {
    fn from(err: RenderError) -> Self {
        NotifyError::RenderError(err)
    }
}

impl From<PrintLogError> for NotifyError {
    fn from(err: PrintLogError) -> Self {
        NotifyError::PrintLogError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn wraps_each_error_kind_with_its_source() {
        let errors: Vec<NotifyError> = vec![
            ConfigError::MissingEnvVar {
                var_name: "WEBHOOK".to_string(),
            }
            .into(),
            DeliveryError::Rejected {
                url: "http://hook".to_string(),
                status: 429,
                body: "slow down".to_string(),
            }
            .into(),
            RenderError::Unterminated {
                event: "print_start".to_string(),
            }
            .into(),
            PrintLogError::OpenFailed {
                path: "/logs/print.log".to_string(),
                reason: "denied".to_string(),
            }
            .into(),
        ];

        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "Configuration error: Required environment variable 'WEBHOOK' is not set",
                "Delivery error: Webhook 'http://hook' answered HTTP 429: slow down",
                "Render error: Template for 'print_start' has an unterminated placeholder",
                "Print log error: Failed to open print log '/logs/print.log': denied",
            ]
        );
        assert!(errors.iter().all(|e| e.source().is_some()));
    }

    #[test]
    fn unknown_placeholder_is_shown_in_braces() {
        let err = RenderError::UnknownPlaceholder {
            event: "print_finish".to_string(),
            name: "NOPE".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Template for 'print_finish' uses unknown placeholder '{{NOPE}}'"
        );
    }
}
