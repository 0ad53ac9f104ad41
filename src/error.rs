// MIT License - Copyright (c) 2026 Peter Wright

use std::fmt;

/// Error codes returned by the My Verisure cloud in GraphQL error extensions.
///
/// Login failures carry an `err` field (5-digit codes), device validation
/// failures carry an `auth-code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    /// 60091 - Invalid user or password
    InvalidCredentials,
    /// 60022 - Account temporarily locked
    AccountLocked,
    /// 10001 - OTP authentication required for this device
    OtpRequired,
    /// 10010 - Device not authorized
    DeviceUnauthorized,
}

impl AuthErrorCode {
    /// Parse a vendor error code string (e.g., "60091", "10001").
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "60091" => Some(Self::InvalidCredentials),
            "60022" => Some(Self::AccountLocked),
            "10001" => Some(Self::OtpRequired),
            "10010" => Some(Self::DeviceUnauthorized),
            _ => None,
        }
    }

    /// The wire string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "60091",
            Self::AccountLocked => "60022",
            Self::OtpRequired => "10001",
            Self::DeviceUnauthorized => "10010",
        }
    }

    /// Human-readable description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid user or password",
            Self::AccountLocked => "Account temporarily locked",
            Self::OtpRequired => "OTP authentication required",
            Self::DeviceUnauthorized => "Device not authorized",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.as_str(), self.description())
    }
}

/// All errors that can occur in the verisure-cloud-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum VerisureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request timeout: {operation}")]
    RequestTimeout { operation: String },

    #[error("Authentication failed: {message}")]
    Authentication {
        message: String,
        code: Option<AuthErrorCode>,
    },

    #[error("Not authenticated. Please login first.")]
    NotAuthenticated,

    #[error("Session expired (age: {age_secs}s)")]
    SessionExpired { age_secs: i64 },

    #[error("OTP error: {message}")]
    Otp { message: String },

    #[error("No phone with id {id} in the OTP challenge")]
    InvalidPhoneSelection { id: i32 },

    #[error("Malformed response: {details}")]
    InvalidResponse { details: String },

    #[error("API error: {message}")]
    Api { message: String },

    #[error("Command '{request}' did not complete: {message}")]
    CommandFailed { request: String, message: String },

    #[error("Installation ID is required")]
    MissingInstallation,
}

impl VerisureError {
    /// Whether this error is transient and the request can be retried.
    ///
    /// Authentication and OTP failures need new input from the caller and
    /// are never retryable; connectivity failures are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VerisureError::Io(_)
                | VerisureError::Http(_)
                | VerisureError::RequestTimeout { .. }
                | VerisureError::SessionExpired { .. }
        )
    }

    /// Shorthand for an authentication error without a vendor code.
    pub fn auth(message: impl Into<String>) -> Self {
        VerisureError::Authentication {
            message: message.into(),
            code: None,
        }
    }

    /// Shorthand for an OTP error.
    pub fn otp(message: impl Into<String>) -> Self {
        VerisureError::Otp {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VerisureError>;
