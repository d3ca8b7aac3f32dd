use std::net::SocketAddr;

use tracing::debug;

use super::{LookupError, LookupRequest, LookupResponse, LookupService};
use crate::{intercept::rejection, listener::Protocol};

/// A binary-protocol command handled by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    LookupTopic(CommandLookupTopic),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLookupTopic {
    pub request_id: u64,
    pub topic: String,
    pub authoritative: bool,

    /// Listener the client connected through, if it names one.
    pub advertised_listener_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResponse {
    LookupTopic(CommandLookupTopicResponse),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLookupTopicResponse {
    pub request_id: u64,
    pub result: Result<LookupResponse, LookupError>,
}

/// The client connection a command arrived on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionContext {
    pub remote_addr: Option<SocketAddr>,

    /// Connected over TLS; lookups then answer with the TLS service URL.
    pub tls: bool,
}

impl ConnectionContext {
    pub fn protocol(&self) -> Protocol {
        if self.tls {
            Protocol::PulsarSsl
        } else {
            Protocol::Pulsar
        }
    }
}

impl LookupService {
    /// Handle `command` received on `connection`, consulting the broker interceptor first.
    pub async fn handle_command(
        &self,
        command: &Command,
        connection: &ConnectionContext,
    ) -> CommandResponse {
        let rejected = rejection(
            "on_command",
            self.interceptor().on_command(command, connection),
        );

        match command {
            Command::LookupTopic(lookup) => {
                let result = match rejected {
                    Some(reason) => {
                        debug!(request_id = lookup.request_id, reason = reason.as_str(), "lookup rejected");
                        Err(LookupError::Rejected(reason))
                    }
                    None => {
                        let mut request = LookupRequest::new(lookup.topic.clone())
                            .with_authoritative(lookup.authoritative)
                            .with_protocol(connection.protocol());
                        request.listener_name = lookup.advertised_listener_name.clone();
                        self.lookup(&request).await
                    }
                };
                CommandResponse::LookupTopic(CommandLookupTopicResponse {
                    request_id: lookup.request_id,
                    result,
                })
            }
        }
    }
}
