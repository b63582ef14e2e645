use crate::dsn::Dsn;
use crate::error::{HookError, NotifyError};
use crate::packet::Packet;
use crate::transport::Transport;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;

/// Upper bound on a single store request. The hook's own timeout only stops
/// waiting; this one actually ends the request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sentry implementation of [`Transport`] posting JSON packets to the store
/// endpoint derived from a [`Dsn`].
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    dsn: Dsn,
}

impl HttpTransport {
    /// Construct a new transport for the given DSN.
    ///
    /// **Returns**
    /// - A ready-to-use [`HttpTransport`].
    /// - `Err(HookError::Client)` if the HTTP client could not be built
    ///   (e.g. TLS backend initialisation failed).
    pub fn new(dsn: Dsn) -> Result<Self, HookError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HookError::Client(e.to_string()))?;
        Ok(Self { client, dsn })
    }

    pub fn dsn(&self) -> &Dsn {
        &self.dsn
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, packet: &Packet) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(packet).map_err(|e| NotifyError::Serialize(e.to_string()))?;
        let resp = self
            .client
            .post(self.dsn.store_url())
            .header("X-Sentry-Auth", self.dsn.auth_header(Utc::now().timestamp()))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(NotifyError::Status { status, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer a single request with `status` and `body`, returning the raw
    /// request as received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://pub:sec@{addr}/42"), server)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= length
    }

    fn transport(dsn: &str) -> HttpTransport {
        HttpTransport::new(dsn.parse().expect("dsn")).expect("transport")
    }

    #[tokio::test]
    async fn posts_json_to_the_store_endpoint_with_auth() {
        let (dsn, server) = serve_once("200 OK", "{}").await;
        let mut packet = Packet::new("boom");
        packet.platform = "rust".to_string();

        transport(&dsn).send(&packet).await.expect("accepted");

        let request = server.await.expect("server");
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /api/42/store/?sentry_version=7&sentry_key=pub HTTP/1.1"));
        assert!(lower.contains("x-sentry-auth: sentry sentry_version=7, sentry_client=sentry-log-hook/"));
        assert!(lower.contains("sentry_key=pub, sentry_secret=sec"));
        assert!(lower.contains("content-type: application/json"));
        assert!(request.contains(r#""message":"boom""#));
    }

    #[tokio::test]
    async fn rejected_packet_reports_status_and_body() {
        let (dsn, server) = serve_once("429 Too Many Requests", "slow down").await;

        let err = transport(&dsn).send(&Packet::new("boom")).await.expect_err("rejected");

        assert_eq!(
            err,
            NotifyError::Status {
                status: 429,
                body: "slow down".to_string()
            }
        );
        server.await.expect("server");
    }

    #[tokio::test]
    async fn unreachable_server_is_an_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = transport(&format!("http://pub@{addr}/42"))
            .send(&Packet::new("boom"))
            .await
            .expect_err("no server");
        assert!(matches!(err, NotifyError::Http(_)));
    }
}
