use thiserror::Error;

use crate::{intercept::InterceptError, listener, ownership, system_topic};

/// Errors starting or operating a [`Broker`](crate::Broker).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid listener configuration: {0}")]
    Listener(#[from] listener::Error),

    #[error("Interceptor refused to start: {0}")]
    Interceptor(#[from] InterceptError),

    #[error(transparent)]
    Ownership(#[from] ownership::Error),

    #[error(transparent)]
    SystemTopic(#[from] system_topic::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
