use http::{Method, Request, Response, StatusCode, header::CONTENT_TYPE};
use serde_json::json;
use tracing::debug;

use super::{LookupError, LookupRequest, LookupService};
use crate::{
    intercept::rejection,
    listener::{LISTENER_NAME_HEADER, LISTENER_NAME_PARAM, Protocol},
    naming::TopicDomain,
};

/// Lookups are served at `<prefix><domain>/<tenant>/<namespace>/<topic>`.
pub const LOOKUP_PATH_PREFIX: &str = "/lookup/v2/topic/";

impl LookupService {
    /// Serve an HTTP lookup request.
    ///
    /// The listener is chosen by the `listenerName` query parameter, falling back to the
    /// `X-Pulsar-ListenerName` header. Requests made over `https` are answered for the TLS service URL.
    pub async fn handle_web_request(&self, request: &Request<()>) -> Response<String> {
        if let Some(reason) = rejection("on_web_request", self.interceptor().on_web_request(request))
        {
            return lookup_error(&LookupError::Rejected(reason));
        }

        let lookup = match parse(request) {
            Ok(lookup) => lookup,
            Err(response) => return response,
        };

        match self.lookup(&lookup).await {
            Ok(found) => match serde_json::to_string(&found) {
                Ok(body) => respond(StatusCode::OK, body),
                Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, "Internal", &e.to_string()),
            },
            Err(e) => {
                debug!(path = request.uri().path(), e = %e, "web lookup failed");
                lookup_error(&e)
            }
        }
    }
}

fn parse(request: &Request<()>) -> Result<LookupRequest, Response<String>> {
    if request.method() != Method::GET {
        return Err(error(
            StatusCode::METHOD_NOT_ALLOWED,
            "MethodNotAllowed",
            "lookups must use GET",
        ));
    }

    let path = request.uri().path();
    let Some(rest) = path.strip_prefix(LOOKUP_PATH_PREFIX) else {
        return Err(error(StatusCode::NOT_FOUND, "NotFound", path));
    };

    let invalid = |reason: String| {
        lookup_error(&LookupError::InvalidTopicName(
            crate::naming::Error::InvalidTopicName {
                name: rest.to_owned(),
                reason,
            },
        ))
    };

    let topic = match rest.split('/').collect::<Vec<_>>().as_slice() {
        [domain, tenant, namespace, local_name] => {
            let domain: TopicDomain = domain.parse().map_err(invalid)?;
            let mut segments = Vec::with_capacity(3);
            for segment in [tenant, namespace, local_name] {
                let decoded = urlencoding::decode(segment)
                    .map_err(|e| invalid(format!("bad percent-encoding: {e}")))?;
                segments.push(decoded);
            }
            format!("{domain}://{}", segments.join("/"))
        }
        _ => return Err(error(StatusCode::NOT_FOUND, "NotFound", path)),
    };

    let mut lookup = LookupRequest::new(topic);
    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                LISTENER_NAME_PARAM => lookup.listener_name = Some(value.into_owned()),
                "authoritative" => lookup.authoritative = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }
    }

    lookup.listener_header = request
        .headers()
        .get(LISTENER_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);

    if request.uri().scheme_str() == Some("https") {
        lookup.protocol = Protocol::PulsarSsl;
    }

    Ok(lookup)
}

fn lookup_error(e: &LookupError) -> Response<String> {
    error(e.status(), e.code(), &e.to_string())
}

fn error(status: StatusCode, code: &str, message: &str) -> Response<String> {
    respond(
        status,
        json!({ "code": code, "message": message }).to_string(),
    )
}

fn respond(status: StatusCode, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}
