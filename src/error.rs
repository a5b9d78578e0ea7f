use reqwest::StatusCode;
use thiserror::Error;

/// Raised when a queue payload cannot be turned into an `ActionEvent`.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not a valid action event: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("emails is neither an object of strings nor an array of strings: {0}")]
    Emails(#[source] serde_json::Error),
}

/// A single email that could not be turned into a mention.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("invalid lookup url: {0}")]
    Url(String),

    #[error("user lookup request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("user lookup returned status {0}")]
    Status(StatusCode),

    #[error("user lookup returned an unreadable body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Delivery of a composed post to one destination failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid post url: {0}")]
    Url(String),

    #[error("post request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("post was rejected with status {0}")]
    Status(StatusCode),
}
