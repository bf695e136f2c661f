use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::timeout;
use url::Url;

use crate::protocol::VersionInfo;

/// Extract DevTools websocket URL from Chromium stderr output.
pub async fn extract_ws_url(child: &mut Child) -> Result<String> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("chromium process missing stderr handle"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Some(ws) = parse_listening_line(&line) {
                return Ok(ws);
            }
            captured.push(line);
        }
        Err(anyhow!(
            "chromium exited before exposing devtools websocket url. stderr preview: {}",
            captured
                .iter()
                .take(8)
                .cloned()
                .collect::<Vec<_>>()
                .join(" | ")
        ))
    };

    timeout(Duration::from_secs(20), reader)
        .await
        .map_err(|_| anyhow!("timed out waiting for chromium devtools websocket url"))?
}

fn parse_listening_line(line: &str) -> Option<String> {
    let (_, ws) = line.rsplit_once("listening on ")?;
    let ws = ws.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then(|| ws.to_string())
}

/// Ask a running browser's DevTools HTTP endpoint for its websocket URL.
pub async fn discover_ws_url(http_endpoint: &str, deadline: Duration) -> Result<String> {
    let url = version_url(http_endpoint)?;
    let client = reqwest::Client::builder()
        .timeout(deadline)
        .build()
        .context("building devtools http client")?;
    let info: VersionInfo = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("no devtools endpoint answering at {url}"))?
        .error_for_status()?
        .json()
        .await
        .context("decoding /json/version")?;
    Ok(info.web_socket_debugger_url)
}

fn version_url(http_endpoint: &str) -> Result<Url> {
    let base = Url::parse(http_endpoint)
        .with_context(|| format!("invalid devtools endpoint {http_endpoint:?}"))?;
    base.join("/json/version")
        .with_context(|| format!("cannot derive /json/version from {http_endpoint:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_devtools_listening_line() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc-123";
        assert_eq!(
            parse_listening_line(line).as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abc-123")
        );
        assert!(parse_listening_line("[WARNING] something else").is_none());
        assert!(parse_listening_line("listening on http://localhost").is_none());
    }

    #[test]
    fn version_url_replaces_path() {
        assert_eq!(
            version_url("http://127.0.0.1:9222").unwrap().as_str(),
            "http://127.0.0.1:9222/json/version"
        );
        assert_eq!(
            version_url("http://localhost:9333/json/list").unwrap().as_str(),
            "http://localhost:9333/json/version"
        );
        assert!(version_url("not a url").is_err());
    }
}
