//! Broker interceptors: observe, and optionally reject, binary commands and web requests.
//!
//! An interceptor runs synchronously before the request is handled. Only an explicit
//! [`InterceptError::Rejected`] stops the request; any other failure is logged and the request proceeds.
use std::fmt::Debug;

use thiserror::Error;
use tracing::warn;

use crate::{
    listener::ListenerRegistry,
    lookup::{Command, ConnectionContext},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterceptError {
    #[error("Rejected by interceptor: {0}")]
    Rejected(String),

    #[error("Interceptor failed: {0}")]
    Failed(String),
}

/// What an interceptor learns about the broker it is installed in.
#[derive(Debug, Clone)]
pub struct BrokerContext {
    pub broker_id: String,
    pub listeners: ListenerRegistry,
}

pub trait BrokerInterceptor: Debug + Send + Sync {
    /// Called once while the broker starts.
    fn initialize(&self, context: &BrokerContext) -> Result<(), InterceptError>;

    fn on_command(
        &self,
        command: &Command,
        connection: &ConnectionContext,
    ) -> Result<(), InterceptError>;

    fn on_web_request(&self, request: &http::Request<()>) -> Result<(), InterceptError>;

    /// Called once while the broker shuts down.
    fn close(&self);
}

/// Interceptor that lets everything through.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInterceptor;

impl BrokerInterceptor for NoopInterceptor {
    fn initialize(&self, _context: &BrokerContext) -> Result<(), InterceptError> {
        Ok(())
    }

    fn on_command(
        &self,
        _command: &Command,
        _connection: &ConnectionContext,
    ) -> Result<(), InterceptError> {
        Ok(())
    }

    fn on_web_request(&self, _request: &http::Request<()>) -> Result<(), InterceptError> {
        Ok(())
    }

    fn close(&self) {}
}

/// Turn the outcome of an interceptor call into the rejection reason, if any.
pub(crate) fn rejection(hook: &str, result: Result<(), InterceptError>) -> Option<String> {
    match result {
        Ok(()) => None,
        Err(InterceptError::Rejected(reason)) => Some(reason),
        Err(InterceptError::Failed(e)) => {
            warn!(hook, e = %e, "interceptor failed, continuing");
            None
        }
    }
}
