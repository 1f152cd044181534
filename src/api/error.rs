//! Error types for Moodle web-service calls.

use thiserror::Error;

/// Errors returned by [`ContentSource`](super::ContentSource) implementations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure talking to the web service.
    #[error("request to {function} failed: {source}")]
    Http {
        /// Web-service function being called.
        function: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status from the web service.
    #[error("HTTP {status} calling {function}")]
    Status {
        /// Web-service function being called.
        function: String,
        /// HTTP status code.
        status: u16,
    },

    /// Response body was not the expected JSON shape.
    #[error("unexpected response from {function}: {source}")]
    Decode {
        /// Web-service function being called.
        function: String,
        /// JSON decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// The web service answered with an exception payload.
    #[error("{function} raised {errorcode}: {message}")]
    Remote {
        /// Web-service function being called.
        function: String,
        /// Moodle error code.
        errorcode: String,
        /// Moodle error message.
        message: String,
    },

    /// The token was rejected.
    #[error("invalid web-service token")]
    InvalidToken,

    /// A configured category name does not exist on the site.
    #[error("unknown course category: {name}")]
    UnknownCategory {
        /// The category name that was looked up.
        name: String,
    },
}

impl ApiError {
    /// Creates a transport error.
    pub fn http(function: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            function: function.into(),
            source,
        }
    }

    /// Creates a status error.
    pub fn status(function: impl Into<String>, status: u16) -> Self {
        Self::Status {
            function: function.into(),
            status,
        }
    }

    /// Creates a decode error.
    pub fn decode(function: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            function: function.into(),
            source,
        }
    }

    /// Creates an error from a Moodle exception payload.
    ///
    /// `invalidtoken` is promoted to [`ApiError::InvalidToken`].
    pub fn remote(
        function: impl Into<String>,
        errorcode: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let errorcode = errorcode.into();
        if errorcode == "invalidtoken" {
            return Self::InvalidToken;
        }
        Self::Remote {
            function: function.into(),
            errorcode,
            message: message.into(),
        }
    }
}
