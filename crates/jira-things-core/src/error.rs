#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SyncError {
    /// Missing or invalid settings. Raised before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Transport or auth failure against the source. Fatal for the run.
    #[error("source fetch failed: {0}")]
    SourceFetch(String),
    /// One sink call failed. Recovered per record.
    #[error("sink call failed: {0}")]
    SinkCall(String),
    /// An update needs the sink credential and none is configured. Recovered per record.
    #[error("sink credential is not configured")]
    CredentialMissing,
    /// The sink cannot be reached at all, so no batch can be attempted.
    #[error("sink unavailable: {0}")]
    SinkUnavailable(String),
    #[error("mirror store error: {0}")]
    Store(String),
}

impl SyncError {
    /// Whether this error ends the run rather than a single record's attempt.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SinkCall(_) | Self::CredentialMissing)
    }
}
