//! HTTP price oracle client
//!
//! `GET <url>?ids=<a,b,c>&showExtraInfo=true`, answered with
//! `{ "data": { <id>: { "price": "..." , ... } | null } }`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::PriceOracle;
use crate::error::AcquisitionError;
use crate::types::AssetId;

/// Longest error body kept in a diagnostic
const MAX_ERROR_BODY: usize = 512;

pub struct HttpPriceOracle {
    client: Client,
    url: String,
}

impl HttpPriceOracle {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    fn name(&self) -> &'static str {
        "http-oracle"
    }

    async fn query(
        &self,
        assets: &[AssetId],
        show_extra_info: bool,
    ) -> Result<Value, AcquisitionError> {
        let ids = assets
            .iter()
            .map(AssetId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let mut params = vec![("ids", ids)];
        if show_extra_info {
            params.push(("showExtraInfo", "true".to_string()));
        }

        tracing::debug!(url = %self.url, assets = assets.len(), "Querying price oracle");

        let response = self.client.get(&self.url).query(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(AcquisitionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| AcquisitionError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve one canned HTTP response and hand back the request line
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let _ = tx.send(request.lines().next().unwrap_or_default().to_string());

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        (format!("http://{}/price/v2", addr), rx)
    }

    #[tokio::test]
    async fn query_sends_batched_ids_and_parses_body() {
        let (url, request_line) =
            serve_once("200 OK", r#"{"data":{"T1":{"price":"1.23"}}}"#).await;
        let oracle = HttpPriceOracle::new(&url, Duration::from_secs(5)).unwrap();

        let doc = oracle
            .query(&[AssetId::from("T1"), AssetId::from("T2")], true)
            .await
            .unwrap();

        assert_eq!(doc["data"]["T1"]["price"], "1.23");
        let line = request_line.await.unwrap();
        assert!(line.starts_with("GET /price/v2?ids=T1%2CT2&showExtraInfo=true"), "{}", line);
    }

    #[tokio::test]
    async fn non_success_status_is_reported_with_body() {
        let (url, _) = serve_once("503 Service Unavailable", r#"{"error":"busy"}"#).await;
        let oracle = HttpPriceOracle::new(&url, Duration::from_secs(5)).unwrap();

        let err = oracle.query(&[AssetId::from("T1")], false).await.unwrap_err();
        match err {
            AcquisitionError::Status { status, body } => {
                assert_eq!(status, 503);
                assert!(body.contains("busy"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_json_is_malformed() {
        let (url, _) = serve_once("200 OK", "<html>oops</html>").await;
        let oracle = HttpPriceOracle::new(&url, Duration::from_secs(5)).unwrap();

        let err = oracle.query(&[AssetId::from("T1")], false).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::Malformed(_)));
    }

    #[tokio::test]
    async fn unreachable_oracle_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let oracle =
            HttpPriceOracle::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();

        let err = oracle.query(&[AssetId::from("T1")], false).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::Transport(_)));
    }
}
