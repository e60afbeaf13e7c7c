use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use roomlink_core::error::{Result, RoomLinkError};

use super::render::RenderedRequest;

/// Response of one successful network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressResponse {
    pub status: u16,
    pub body: String,
}

/// Outbound HTTP ("post url, headers, body").
#[async_trait]
pub trait Egress: Send + Sync {
    /// Non-2xx answers are errors.
    async fn post(&self, req: &RenderedRequest) -> Result<EgressResponse>;
}

pub struct HttpEgress {
    client: Client,
}

impl HttpEgress {
    /// `ceiling` bounds every call; per-request timeouts can only shorten it.
    pub fn new(ceiling: Duration, accept_invalid_certs: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(ceiling)
            .connect_timeout(ceiling.min(Duration::from_secs(5)))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build HTTP client");
                RoomLinkError::Construction(format!("http client: {e}"))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Egress for HttpEgress {
    async fn post(&self, req: &RenderedRequest) -> Result<EgressResponse> {
        let mut builder = self.client.post(&req.url).timeout(req.timeout).body(req.body.clone());
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            let reason = if e.is_timeout() { "timed out".to_string() } else { e.to_string() };
            RoomLinkError::Internal(reason)
        })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(RoomLinkError::Internal(format!("peer answered {status}")));
        }
        Ok(EgressResponse { status: status.as_u16(), body })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use bytes::Bytes;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(url: String, timeout: Duration) -> RenderedRequest {
        RenderedRequest {
            url,
            headers: vec![
                ("Content-Type".into(), "text/xml".into()),
                ("Authorization".into(), "Basic YWRtaW46cHc=".into()),
            ],
            body: Bytes::from_static(b"<Command><Message><Send><Text>hi</Text></Send></Message></Command>"),
            timeout,
        }
    }

    #[tokio::test]
    async fn posts_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/putxml"))
            .and(header("Authorization", "Basic YWRtaW46cHc="))
            .and(body_string_contains("<Text>hi</Text>"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<Success/>"))
            .expect(1)
            .mount(&server)
            .await;

        let egress = HttpEgress::new(Duration::from_secs(5), false).unwrap();
        let resp = egress
            .post(&request(format!("{}/putxml", server.uri()), Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "<Success/>");
    }

    #[tokio::test]
    async fn server_errors_fail_the_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let egress = HttpEgress::new(Duration::from_secs(5), false).unwrap();
        let err = egress
            .post(&request(format!("{}/putxml", server.uri()), Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn slow_peers_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let egress = HttpEgress::new(Duration::from_secs(5), false).unwrap();
        let err = egress
            .post(&request(format!("{}/putxml", server.uri()), Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
