use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

use roomlink_core::error::{Result, RoomLinkError};

use crate::config::{CredentialsSection, PeerScheme};
use crate::device::RoomControl;

/// How a descriptor reaches its destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Loopback message channel on this device.
    Local,
    /// POST to `<scheme>://<address>/putxml`.
    DirectIp,
    /// Cloud relay API call addressed by peer id.
    Relay,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Local => "local",
            TransportKind::DirectIp => "ip",
            TransportKind::Relay => "relay",
        }
    }

    pub fn is_remote(self) -> bool {
        !matches!(self, TransportKind::Local)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-shared credential material. Carried, never verified.
#[derive(Clone)]
pub enum Credentials {
    None,
    Basic { username: String, password: SecretString },
    /// Pre-encoded token. Towards direct-IP peers it must be the base64 form
    /// of `user:password`; towards the relay it is used as a bearer token.
    Token(SecretString),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::Basic { username, .. } => {
                f.debug_struct("Basic").field("username", username).finish_non_exhaustive()
            }
            Credentials::Token(_) => f.write_str("Token([REDACTED])"),
        }
    }
}

impl Credentials {
    pub fn from_config(cfg: &CredentialsSection) -> Result<Self> {
        match (&cfg.username, &cfg.password, &cfg.token) {
            (None, None, None) => Ok(Credentials::None),
            (None, None, Some(token)) => Ok(Credentials::Token(token.clone())),
            (Some(username), Some(password), None) => Ok(Credentials::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            (_, _, Some(_)) => Err(RoomLinkError::Construction(
                "credentials: token and username/password are mutually exclusive".into(),
            )),
            _ => Err(RoomLinkError::Construction(
                "credentials: username and password must be set together".into(),
            )),
        }
    }

    fn validate_for(&self, kind: TransportKind) -> Result<()> {
        match (self, kind) {
            (_, TransportKind::Local) => Ok(()),
            (Credentials::None, _) => Err(RoomLinkError::Construction(format!(
                "{kind} transport requires credentials"
            ))),
            (Credentials::Basic { username, password }, _) => {
                if username.is_empty() || username.contains(':') {
                    return Err(RoomLinkError::Construction(
                        "credentials: username must be non-empty and must not contain ':'".into(),
                    ));
                }
                if password.expose_secret().is_empty() {
                    return Err(RoomLinkError::Construction("credentials: empty password".into()));
                }
                Ok(())
            }
            (Credentials::Token(token), kind) => {
                let token = token.expose_secret();
                if token.is_empty() || token.chars().any(char::is_whitespace) {
                    return Err(RoomLinkError::Construction("credentials: malformed token".into()));
                }
                if kind == TransportKind::DirectIp {
                    let decoded = STANDARD
                        .decode(token)
                        .ok()
                        .and_then(|raw| String::from_utf8(raw).ok())
                        .ok_or_else(|| {
                            RoomLinkError::Construction(
                                "credentials: direct-ip token is not base64 text".into(),
                            )
                        })?;
                    if !decoded.contains(':') {
                        return Err(RoomLinkError::Construction(
                            "credentials: direct-ip token must encode user:password".into(),
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// Opaque blob stamped into `Source.Auth` of remote envelopes.
    pub fn auth_blob(&self) -> Option<SecretString> {
        match self {
            Credentials::None => None,
            Credentials::Basic { username, password } => Some(SecretString::from(
                STANDARD.encode(format!("{username}:{}", password.expose_secret())),
            )),
            Credentials::Token(token) => Some(token.clone()),
        }
    }

    /// `Authorization` header value for `kind`.
    pub fn authorization(&self, kind: TransportKind) -> Option<SecretString> {
        let blob = self.auth_blob()?;
        match kind {
            TransportKind::Local => None,
            TransportKind::DirectIp => {
                Some(SecretString::from(format!("Basic {}", blob.expose_secret())))
            }
            TransportKind::Relay => {
                Some(SecretString::from(format!("Bearer {}", blob.expose_secret())))
            }
        }
    }

    /// Every literal that must never reach a log line.
    pub fn secret_literals(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Credentials::Basic { password, .. } = self {
            out.push(password.expose_secret().to_string());
        }
        if let Some(blob) = self.auth_blob() {
            out.push(blob.expose_secret().to_string());
        }
        out.retain(|s| !s.is_empty());
        out
    }
}

/// One addressable peer of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Peer address; the name callers filter on.
    pub address: String,
    /// Relay peer id, required for relay descriptors.
    pub relay_id: Option<String>,
}

impl Destination {
    pub fn ip(address: impl Into<String>) -> Self {
        Self { address: address.into(), relay_id: None }
    }

    pub fn relay(address: impl Into<String>, relay_id: impl Into<String>) -> Self {
        Self { address: address.into(), relay_id: Some(relay_id.into()) }
    }
}

/// Per-descriptor constraints.
#[derive(Debug, Clone)]
pub struct DescriptorLimits {
    pub max_value_bytes: usize,
    /// Ceiling for one network call.
    pub timeout: Duration,
    pub relay_base_url: String,
    pub peer_scheme: PeerScheme,
}

impl Default for DescriptorLimits {
    fn default() -> Self {
        Self {
            max_value_bytes: roomlink_core::protocol::MAX_VALUE_BYTES,
            timeout: Duration::from_secs(5),
            relay_base_url: "https://webexapis.com/v1".into(),
            peer_scheme: PeerScheme::Https,
        }
    }
}

/// Immutable description of how to reach a group of destinations.
#[derive(Debug, Clone)]
pub struct TransportDescriptor {
    kind: TransportKind,
    credentials: Credentials,
    destinations: Vec<Destination>,
    limits: DescriptorLimits,
}

impl TransportDescriptor {
    /// Validates credentials and destinations up front; a descriptor that
    /// exists can always render a request.
    pub fn build(
        kind: TransportKind,
        credentials: Credentials,
        destinations: Vec<Destination>,
        limits: DescriptorLimits,
    ) -> Result<Self> {
        credentials.validate_for(kind)?;
        for d in &destinations {
            if d.address.trim().is_empty() {
                return Err(RoomLinkError::Construction("destination address is empty".into()));
            }
            if kind == TransportKind::Relay && d.relay_id.as_deref().unwrap_or("").is_empty() {
                return Err(RoomLinkError::Construction(format!(
                    "relay destination {} has no relay id",
                    d.address
                )));
            }
        }
        if kind == TransportKind::Relay && !limits.relay_base_url.starts_with("http") {
            return Err(RoomLinkError::Construction(format!(
                "relay base url is not http(s): {}",
                limits.relay_base_url
            )));
        }
        Ok(Self { kind, credentials, destinations, limits })
    }

    /// Loopback descriptor; needs no credentials.
    pub fn local(limits: DescriptorLimits) -> Self {
        Self {
            kind: TransportKind::Local,
            credentials: Credentials::None,
            destinations: Vec::new(),
            limits,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn limits(&self) -> &DescriptorLimits {
        &self.limits
    }

    pub fn find(&self, address: &str) -> Option<&Destination> {
        self.destinations.iter().find(|d| d.address == address)
    }
}

/// Turns the device HTTP client on the first time a remote descriptor is
/// put to use. Later calls are no-ops.
#[derive(Debug, Default)]
pub struct HttpClientActivation {
    enabled: AtomicBool,
}

impl HttpClientActivation {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub async fn ensure(&self, descriptor: &TransportDescriptor, control: &dyn RoomControl) -> Result<()> {
        if !descriptor.kind().is_remote() || self.enabled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::warn!(
            kind = %descriptor.kind(),
            "enabling device HTTP client for peer delivery; the device will accept outbound requests"
        );
        if let Err(e) = control.enable_http_client().await {
            self.enabled.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::device::LoggingRoomControl;

    fn basic() -> Credentials {
        Credentials::Basic { username: "admin".into(), password: SecretString::from("pw") }
    }

    #[test]
    fn remote_kinds_require_credentials() {
        let err = TransportDescriptor::build(
            TransportKind::DirectIp,
            Credentials::None,
            vec![Destination::ip("10.0.0.110")],
            DescriptorLimits::default(),
        )
        .unwrap_err();
        assert_eq!(err.code().as_str(), "CONSTRUCTION");

        assert!(TransportDescriptor::build(
            TransportKind::Local,
            Credentials::None,
            vec![],
            DescriptorLimits::default()
        )
        .is_ok());
    }

    #[test]
    fn direct_ip_token_must_encode_a_pair() {
        let bad = Credentials::Token(SecretString::from(STANDARD.encode("nocolon")));
        assert!(TransportDescriptor::build(
            TransportKind::DirectIp,
            bad.clone(),
            vec![],
            DescriptorLimits::default()
        )
        .is_err());
        // Relay tokens are bearer tokens and need no inner structure.
        assert!(TransportDescriptor::build(
            TransportKind::Relay,
            bad,
            vec![Destination::relay("10.0.0.112", "peer-2")],
            DescriptorLimits::default()
        )
        .is_ok());

        let good = Credentials::Token(SecretString::from(STANDARD.encode("admin:pw")));
        assert!(TransportDescriptor::build(
            TransportKind::DirectIp,
            good,
            vec![Destination::ip("10.0.0.110")],
            DescriptorLimits::default()
        )
        .is_ok());
    }

    #[test]
    fn relay_destinations_need_ids() {
        let err = TransportDescriptor::build(
            TransportKind::Relay,
            basic(),
            vec![Destination::ip("10.0.0.112")],
            DescriptorLimits::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("relay id"));
    }

    #[test]
    fn config_credentials_shapes() {
        let cfg = CredentialsSection {
            username: Some("admin".into()),
            password: None,
            token: None,
        };
        assert!(Credentials::from_config(&cfg).is_err());

        let cfg = CredentialsSection {
            username: None,
            password: None,
            token: Some(SecretString::from("abc")),
        };
        assert!(matches!(Credentials::from_config(&cfg).unwrap(), Credentials::Token(_)));
    }

    #[test]
    fn authorization_per_kind() {
        let creds = basic();
        let ip = creds.authorization(TransportKind::DirectIp).unwrap();
        assert_eq!(ip.expose_secret(), format!("Basic {}", STANDARD.encode("admin:pw")));
        let relay = creds.authorization(TransportKind::Relay).unwrap();
        assert!(relay.expose_secret().starts_with("Bearer "));
        assert!(creds.authorization(TransportKind::Local).is_none());
        assert!(!format!("{creds:?}").contains("pw"));
    }

    #[tokio::test]
    async fn activation_happens_once() {
        let activation = HttpClientActivation::default();
        let control = LoggingRoomControl;
        let local = TransportDescriptor::local(DescriptorLimits::default());
        activation.ensure(&local, &control).await.unwrap();
        assert!(!activation.is_enabled());

        let ip = TransportDescriptor::build(
            TransportKind::DirectIp,
            basic(),
            vec![Destination::ip("10.0.0.110")],
            DescriptorLimits::default(),
        )
        .unwrap();
        activation.ensure(&ip, &control).await.unwrap();
        activation.ensure(&ip, &control).await.unwrap();
        assert!(activation.is_enabled());
    }
}
