use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("Speech error: {0}")]
    Speech(#[from] SpeechError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Speech-to-text capture failures, classified by what the user has to do next.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// Recognizer timed out without hearing anything. Recoverable by restarting.
    #[error("No speech detected")]
    NoSpeech,

    /// Microphone access refused. Requires the user to grant permission and retry.
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Capture device error: {message}")]
    Device { message: String },
}

/// Speech synthesis, playback and capture errors
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Playback failed: {message}")]
    Playback { message: String },

    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Input rejected before any state transition or side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Turn text cannot be empty")]
    EmptyText,

    #[error("Invalid sender: {value}")]
    InvalidSender { value: String },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for speech operations
pub type SpeechResult<T> = Result<T, SpeechError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::SessionNotFound {
            session_id: "sess-123".to_string(),
        };
        assert_eq!(err.to_string(), "Session not found: sess-123");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_langbase_error_display() {
        let err = LangbaseError::Unavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(err.to_string(), "Langbase unavailable: server down (retries: 3)");

        let err = LangbaseError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");
    }

    #[test]
    fn test_speech_error_display() {
        let err = SpeechError::Capture(CaptureError::PermissionDenied);
        assert_eq!(err.to_string(), "Capture failed: Microphone permission denied");

        let err = SpeechError::Synthesis {
            message: "quota exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "Synthesis failed: quota exceeded");
    }

    #[test]
    fn test_validation_error_display() {
        assert_eq!(
            ValidationError::EmptyText.to_string(),
            "Turn text cannot be empty"
        );

        let err = ValidationError::InvalidTransition {
            from: "ended".to_string(),
            to: "listening".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid transition from ended to listening");
    }

    #[test]
    fn test_validation_error_conversion_to_app_error() {
        let app_err: AppError = ValidationError::EmptyText.into();
        assert!(matches!(app_err, AppError::Validation(_)));
    }

    #[test]
    fn test_langbase_error_conversion_to_app_error() {
        let app_err: AppError = LangbaseError::Timeout { timeout_ms: 1000 }.into();
        assert!(matches!(app_err, AppError::Langbase(_)));
    }
}
