//! Channel authorisation.
//!
//! Private and presence channels exchange the channel name and the
//! connector's socket id for an opaque token before subscribing. The
//! [`Authorizer`] trait is the seam; [`HttpAuthorizer`] posts to an HTTP
//! endpoint in the shape Laravel's `/broadcasting/auth` route expects.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::config::AuthOptions;

/// Successful authorisation response.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Authorization {
    /// Opaque signature forwarded with the subscription.
    pub auth: String,
    /// Presence member data for the current user.
    #[serde(default)]
    pub channel_data: Option<Value>,
    /// Key for encrypted channels.
    #[serde(default)]
    pub shared_secret: Option<String>,
}

/// Reasons an authorisation attempt fails.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The request could not be sent or the connection failed.
    #[error("authorisation request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("authorisation rejected with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The response body was not a valid authorisation.
    #[error("invalid authorisation response: {0}")]
    InvalidResponse(String),

    /// A configured header could not be sent.
    #[error("invalid authorisation header `{0}`")]
    InvalidHeader(String),
}

/// Authorisation round-trip for one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthRequest<'a> {
    /// Full channel name, for example `private-orders`.
    pub channel_name: &'a str,
    /// Socket id of the requesting connector.
    pub socket_id: &'a str,
}

/// Obtains channel authorisations.
///
/// Implementations must be cheap to share; the connector keeps one behind an
/// `Arc` and calls it once per private subscribe attempt.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Authorise `request`.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] when the channel may not be joined or the
    /// endpoint could not be reached.
    async fn authorize(&self, request: AuthRequest<'_>) -> Result<Authorization, AuthError>;
}

/// Authoriser posting JSON to an HTTP endpoint.
///
/// The body is `{"channel_name": .., "socket_id": ..}` merged with the
/// configured extra params. Configured headers are sent on every request,
/// plus `X-CSRF-TOKEN` when a CSRF token is set.
#[derive(Clone, Debug)]
pub struct HttpAuthorizer {
    client: reqwest::Client,
    endpoint: Url,
    headers: HeaderMap,
    params: Map<String, Value>,
}

/// Time allowed for one authorisation request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

impl HttpAuthorizer {
    /// Build an authoriser for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidHeader`] when a configured header name or
    /// value is not valid HTTP, and [`AuthError::Request`] when the HTTP
    /// client cannot be created.
    pub fn new(
        endpoint: Url,
        options: &AuthOptions,
        csrf_token: Option<&str>,
    ) -> Result<Self, AuthError> {
        let mut headers = HeaderMap::new();
        let csrf = csrf_token.map(|token| ("X-CSRF-TOKEN", token));
        let configured = options
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()));
        for (name, value) in configured.chain(csrf) {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| AuthError::InvalidHeader(name.to_owned()))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| AuthError::InvalidHeader(name.to_owned()))?;
            headers.insert(header, value);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AuthError::Request(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            endpoint,
            headers,
            params: options.params.clone().into_iter().collect(),
        })
    }

    /// Endpoint requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &Url { &self.endpoint }

    fn body(&self, request: &AuthRequest<'_>) -> Value {
        let mut body = self.params.clone();
        body.insert("channel_name".into(), request.channel_name.into());
        body.insert("socket_id".into(), request.socket_id.into());
        Value::Object(body)
    }
}

#[async_trait]
impl Authorizer for HttpAuthorizer {
    async fn authorize(&self, request: AuthRequest<'_>) -> Result<Authorization, AuthError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .json(&self.body(&request))
            .send()
            .await
            .map_err(|err| AuthError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Authorization>()
            .await
            .map_err(|err| AuthError::InvalidResponse(err.to_string()))
    }
}
