use crate::{connection::ConnectionState, link::LinkError};

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("{action} is not allowed while {state}")]
    InvalidStateTransition {
        action: &'static str,
        state: ConnectionState,
    },
    #[error(transparent)]
    Link(#[from] LinkError),
}
