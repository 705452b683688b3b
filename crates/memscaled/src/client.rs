//! Thin HTTP client for the `status` subcommand.

use anyhow::Context;
use http_body_util::BodyExt;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Fetch `/api/v1/status` from a running daemon and return the body,
/// pretty-printed when it parses as JSON.
pub async fn fetch_status(addr: &str) -> anyhow::Result<String> {
    let body = tokio::time::timeout(REQUEST_TIMEOUT, fetch(addr))
        .await
        .with_context(|| format!("request to {addr} timed out"))??;

    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => Ok(serde_json::to_string_pretty(&value)?),
        Err(_) => Ok(String::from_utf8_lossy(&body).into_owned()),
    }
}

async fn fetch(addr: &str) -> anyhow::Result<bytes::Bytes> {
    let uri = format!("http://{addr}/api/v1/status");

    let stream = tokio::net::TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .context("http handshake failed")?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let request = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", addr)
        .header("user-agent", "memscaled/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())?;

    let response = sender
        .send_request(request)
        .await
        .context("status request failed")?;
    anyhow::ensure!(
        response.status().is_success(),
        "daemon returned {}",
        response.status()
    );

    let body = response
        .into_body()
        .collect()
        .await
        .context("failed to read response body")?
        .to_bytes();
    Ok(body)
}
