//! Greeting and handshake bodies.

use serde::{Deserialize, Serialize};

use crate::config::ConnectorConfig;

/// Language tag advertised in the handshake.
pub const CLIENT_LANG: &str = "rust";

/// Protocol revision advertised in the handshake. Revision 1 lets the server
/// push asynchronous `INFO` updates, which the decoder accepts at any time.
pub const PROTOCOL_REVISION: u8 = 1;

/// Capabilities announced by the server in its `INFO` greeting.
///
/// Unknown fields are ignored and every field is optional so that greetings
/// from older servers still parse.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerInfo {
    /// Unique server identifier.
    pub server_id: String,
    /// Human-readable server name.
    pub server_name: String,
    /// Server version string.
    pub version: String,
    /// Protocol revision supported by the server.
    pub proto: u8,
    /// Host the server listens on.
    pub host: String,
    /// Port the server listens on.
    pub port: u16,
    /// Whether the server understands `HMSG`/`HPUB`.
    pub headers: bool,
    /// Whether credentials must accompany `CONNECT`.
    pub auth_required: bool,
    /// Whether the server requires TLS.
    pub tls_required: bool,
    /// Maximum payload size the server accepts.
    pub max_payload: u64,
    /// Identifier the server assigned to this client.
    pub client_id: Option<u64>,
    /// Nonce for signature-based authentication.
    pub nonce: Option<String>,
}

impl ServerInfo {
    /// Parse the JSON body of an `INFO` line.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when `body` is not a JSON object.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> { serde_json::from_str(body) }
}

/// Body of the client `CONNECT` handshake.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Client language tag.
    pub lang: String,
    /// Client library version.
    pub version: String,
    /// Protocol revision.
    pub protocol: u8,
    /// Request `+OK` acknowledgements for every command.
    pub verbose: bool,
    /// Request strict subject checking.
    pub pedantic: bool,
    /// Whether headers are supported; echoed from the greeting.
    pub headers: bool,
    /// Whether the server should deliver our own publishes back to us.
    pub echo: bool,
    /// Whether TLS is required.
    pub tls_required: bool,
    /// Client name shown in server monitoring.
    pub name: String,
    /// Username, sent only when the server requires authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password, sent only when the server requires authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    /// Bearer token, sent only when the server requires authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl ConnectInfo {
    /// Build the handshake for `config` in reply to the greeting `info`.
    ///
    /// Credentials are attached only when the server requires
    /// authentication, and only those that are configured and non-empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use echo_nats::{
    ///     config::ConnectorConfig,
    ///     protocol::{ConnectInfo, ServerInfo},
    /// };
    ///
    /// let config = ConnectorConfig::default().with_token("secret");
    /// let open = ConnectInfo::new(&ServerInfo::default(), &config);
    /// assert_eq!(open.auth_token, None);
    ///
    /// let guarded = ServerInfo {
    ///     auth_required: true,
    ///     ..ServerInfo::default()
    /// };
    /// let info = ConnectInfo::new(&guarded, &config);
    /// assert_eq!(info.auth_token.as_deref(), Some("secret"));
    /// assert_eq!(info.user, None);
    /// ```
    #[must_use]
    pub fn new(info: &ServerInfo, config: &ConnectorConfig) -> Self {
        let credential = |value: &Option<String>| {
            value
                .as_ref()
                .filter(|v| info.auth_required && !v.is_empty())
                .cloned()
        };
        Self {
            lang: CLIENT_LANG.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            protocol: PROTOCOL_REVISION,
            verbose: config.verbose,
            pedantic: config.pedantic,
            headers: info.headers,
            echo: config.echo,
            tls_required: config.tls,
            name: config.client_name.clone(),
            user: credential(&config.user),
            pass: credential(&config.pass),
            auth_token: credential(&config.token),
        }
    }
}
