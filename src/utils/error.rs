use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepricerError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Audit storage error: {0}")]
    StorageError(#[from] rusqlite::Error),

    #[error("Cannot prepare audit directory {path}: {source}")]
    AuditDirError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to fetch {source_name}: {message}")]
    SourceFetchError {
        source_name: String,
        message: String,
    },

    #[error("Market report generation ended with status {status}")]
    ReportGenerationFailure {
        status: String,
        sub_status: Option<String>,
    },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    SourceFetch,
    Storage,
    Processing,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RepricerError {
    pub fn source_fetch(source_name: &str, message: impl Into<String>) -> Self {
        Self::SourceFetchError {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            // Everything that can go wrong while pulling either dataset
            Self::ApiError(_)
            | Self::ZipError(_)
            | Self::CsvError(_)
            | Self::SourceFetchError { .. }
            | Self::ReportGenerationFailure { .. } => ErrorCategory::SourceFetch,
            Self::StorageError(_) | Self::AuditDirError { .. } => ErrorCategory::Storage,
            Self::ProcessingError { .. } | Self::SerializationError(_) => {
                ErrorCategory::Processing
            }
            Self::IoError(_) | Self::TaskError(_) => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::SourceFetch => ErrorSeverity::Medium,
            ErrorCategory::Configuration | ErrorCategory::Processing => ErrorSeverity::High,
            ErrorCategory::Storage | ErrorCategory::Internal => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the tenant entry in the config file; the cycle is retried on the next tick"
            }
            ErrorCategory::SourceFetch => {
                "Upstream data was unavailable; nothing was written back and the next cycle retries"
            }
            ErrorCategory::Storage => {
                "Check that the audit directory is writable and the SQLite file is not locked"
            }
            ErrorCategory::Processing => "Inspect the source sheet for malformed rows or columns",
            ErrorCategory::Internal => "Check disk space and permissions, then restart the service",
        }
    }
}

pub type Result<T> = std::result::Result<T, RepricerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_failure_is_source_fetch() {
        let err = RepricerError::ReportGenerationFailure {
            status: "NO_DATA".to_string(),
            sub_status: None,
        };
        assert_eq!(err.category(), ErrorCategory::SourceFetch);
        assert_eq!(err.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_storage_is_critical() {
        let err = RepricerError::StorageError(rusqlite::Error::InvalidQuery);
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }
}
