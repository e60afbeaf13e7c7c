//! Wire rendering for remote destinations and the masking applied before a
//! rendered body is shown to anyone.

use std::sync::LazyLock;
use std::time::Duration;

use bytes::Bytes;
use regex::Regex;
use secrecy::ExposeSecret;
use serde_json::json;

use roomlink_core::error::{Result, RoomLinkError};

use super::descriptor::{Destination, TransportDescriptor, TransportKind};

const MASK: &str = "***";

/// Everything an egress needs for one network call.
#[derive(Clone)]
pub struct RenderedRequest {
    pub url: String,
    /// Header pairs; includes `Authorization`.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Duration,
}

impl std::fmt::Debug for RenderedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedRequest")
            .field("url", &self.url)
            .field("body_len", &self.body.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Render `text` (a serialized envelope) for one remote destination.
pub fn render(descriptor: &TransportDescriptor, dest: &Destination, text: &str) -> Result<RenderedRequest> {
    let auth = descriptor
        .credentials()
        .authorization(descriptor.kind())
        .map(|a| a.expose_secret().to_string());
    let timeout = descriptor.limits().timeout;

    let (url, content_type, body) = match descriptor.kind() {
        TransportKind::Local => {
            return Err(RoomLinkError::Internal("local deliveries are not rendered".into()))
        }
        TransportKind::DirectIp => (
            format!("{}://{}/putxml", descriptor.limits().peer_scheme.as_str(), dest.address),
            "text/xml",
            putxml_body(text),
        ),
        TransportKind::Relay => {
            let relay_id = dest.relay_id.as_deref().ok_or_else(|| {
                RoomLinkError::Internal(format!("relay destination {} has no relay id", dest.address))
            })?;
            let body = json!({ "deviceId": relay_id, "arguments": { "Text": text } });
            (
                format!(
                    "{}/xapi/command/Message.Send",
                    descriptor.limits().relay_base_url.trim_end_matches('/')
                ),
                "application/json",
                body.to_string(),
            )
        }
    };

    let mut headers = vec![("Content-Type".to_string(), content_type.to_string())];
    if let Some(auth) = auth {
        headers.push(("Authorization".to_string(), auth));
    }
    Ok(RenderedRequest { url, headers, body: Bytes::from(body), timeout })
}

fn putxml_body(text: &str) -> String {
    format!(
        "<Command><Message><Send><Text>{}</Text></Send></Message></Command>",
        xml_escape(text)
    )
}

pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Pull the message text out of a `putxml` command body.
pub fn extract_text(xml: &str) -> Option<String> {
    let start = xml.find("<Text>")? + "<Text>".len();
    let len = xml[start..].find("</Text>")?;
    Some(xml_unescape(&xml[start..start + len]))
}

/// `"Auth":"..."` in plain, XML-escaped and JSON-escaped form.
#[allow(clippy::expect_used)]
static AUTH_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"((?:"|&quot;|\\")Auth(?:"|&quot;|\\")\s*:\s*(?:"|&quot;|\\"))(.*?)((?:\\"|&quot;|"))"#)
        .expect("auth field pattern is valid")
});

/// Redacts credential material from rendered bodies before they are logged
/// or reported. Never applied to what goes on the wire.
#[derive(Debug, Clone, Default)]
pub struct Masker {
    literals: Vec<String>,
}

impl Masker {
    pub fn new(mut literals: Vec<String>) -> Self {
        // Longest first so a literal containing another is masked whole.
        literals.sort_by_key(|l| std::cmp::Reverse(l.len()));
        literals.dedup();
        Self { literals }
    }

    pub fn mask(&self, body: &str) -> String {
        let mut out = AUTH_FIELD.replace_all(body, |c: &regex::Captures<'_>| {
            format!("{}{MASK}{}", &c[1], &c[3])
        })
        .into_owned();
        for lit in &self.literals {
            out = out.replace(lit.as_str(), MASK);
        }
        out
    }
}
