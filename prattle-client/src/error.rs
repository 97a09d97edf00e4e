use prattle_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] CoreError),
    #[error("peer {0:?} is not known")]
    PeerNotFound(String),
    #[error("profile {0:?} does not exist")]
    ProfileNotFound(String),
    #[error("profile {0:?} already exists")]
    DuplicateProfileId(String),
    #[error("invalid profile: {0}")]
    InvalidProfile(String),
    #[error("no profile selected")]
    NoProfileSelected,
    #[error("select a peer to chat with first")]
    NoPeerSelected,
    #[error("session is not open")]
    SessionClosed,
    #[error("a session is already open; close it first")]
    SessionAlreadyOpen,
    #[error("channel failure: {0}")]
    ChannelFailure(String),
}

impl ClientError {
    /// Errors the user must be prompted about rather than only logged.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ClientError::NoProfileSelected
                | ClientError::NoPeerSelected
                | ClientError::DuplicateProfileId(_)
                | ClientError::ProfileNotFound(_)
                | ClientError::InvalidProfile(_)
                | ClientError::SessionAlreadyOpen
        )
    }

    /// A failed initial connect may be retried by the user.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::ChannelFailure(_))
    }
}
