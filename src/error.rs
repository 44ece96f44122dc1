//! Errors surfaced by worker operations.

use thiserror::Error;

/// Failure of a single worker exchange.
///
/// None of these are fatal to the dispatcher; they end one request only.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The worker process could not be started at all
    #[error("failed to start worker process `{program}`: {message}")]
    Launch { program: String, message: String },

    /// The worker answered with a well-formed `{"error": ...}` document
    #[error("{0}")]
    Worker(String),

    /// The worker exited with a non-zero status
    #[error("worker exited with code {code}{}", stderr_suffix(.stderr))]
    NonZeroExit { code: i32, stderr: String },

    /// The worker died without an exit code (killed or signalled)
    #[error("worker was terminated before producing a result")]
    Terminated,

    /// The terminal document was not valid JSON
    #[error("failed to parse worker output: {raw}")]
    MalformedOutput {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    /// The terminal document parsed but lacked the field the operation needs
    #[error("worker reply is missing `{expected}`: {raw}")]
    UnexpectedReply { expected: &'static str, raw: String },

    /// The request could not be serialized
    #[error("failed to serialize worker request: {0}")]
    Serialize(#[source] serde_json::Error),
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_zero_exit_mentions_code() {
        let err = BridgeError::NonZeroExit {
            code: 2,
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "worker exited with code 2");
    }

    #[test]
    fn non_zero_exit_appends_trimmed_stderr() {
        let err = BridgeError::NonZeroExit {
            code: 1,
            stderr: "ModuleNotFoundError: No module named 'openai'\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "worker exited with code 1: ModuleNotFoundError: No module named 'openai'"
        );
    }

    #[test]
    fn worker_error_is_literal_text() {
        let err = BridgeError::Worker("bad config".to_string());
        assert_eq!(err.to_string(), "bad config");
    }

    #[test]
    fn malformed_output_includes_raw_text() {
        let source = serde_json::from_str::<serde_json::Value>("nope").unwrap_err();
        let err = BridgeError::MalformedOutput {
            raw: "nope".to_string(),
            source,
        };
        assert_eq!(err.to_string(), "failed to parse worker output: nope");
    }

    #[test]
    fn launch_error_names_program() {
        let err = BridgeError::Launch {
            program: "python".to_string(),
            message: "No such file or directory (os error 2)".to_string(),
        };
        assert!(err.to_string().contains("`python`"));
        assert!(err.to_string().contains("os error 2"));
    }
}
