use serde::Deserialize;
use serde_json::Value;

use super::{headers_from_value, Echo, EchoResponse};
use crate::error::{Result, SieveError};

const HTTP_URL: &str = "http://dadjokes.online/";
const HTTPS_URL: &str = "https://dadjokes.online/";

#[derive(Debug, Deserialize)]
struct DadjokesBody {
    #[serde(rename = "RequestEcho")]
    request_echo: RequestEcho,
}

#[derive(Debug, Deserialize)]
struct RequestEcho {
    #[serde(rename = "Headers")]
    headers: Value,
}

/// dadjokes.online, which reflects the request under `RequestEcho.Headers`
pub struct DadjokesEcho {
    http_url: String,
    https_url: String,
}

impl DadjokesEcho {
    pub fn new() -> Self {
        Self::with_urls(HTTP_URL, HTTPS_URL)
    }

    pub fn with_urls(http_url: impl Into<String>, https_url: impl Into<String>) -> Self {
        Self {
            http_url: http_url.into(),
            https_url: https_url.into(),
        }
    }
}

impl Default for DadjokesEcho {
    fn default() -> Self {
        Self::new()
    }
}

impl Echo for DadjokesEcho {
    fn name(&self) -> &'static str {
        "dadjokes-online"
    }

    fn http_url(&self) -> &str {
        &self.http_url
    }

    fn https_url(&self) -> &str {
        &self.https_url
    }

    fn extract(&self, body: Value) -> Result<EchoResponse> {
        let body: DadjokesBody = serde_json::from_value(body).map_err(|e| {
            SieveError::ProbeUnexpectedResponse(format!("unexpected dadjokes.online body: {}", e))
        })?;

        Ok(EchoResponse {
            headers: headers_from_value(&body.request_echo.headers)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::echo::test_support::spawn_answering_proxy;
    use crate::models::{Endpoint, Protocol};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_extract_headers() {
        let echo = DadjokesEcho::new();
        let response = echo
            .extract(json!({
                "Joke": {"Opener": "...", "Punchline": "..."},
                "RequestEcho": {
                    "Headers": {
                        "X-Forwarded-For": "5.6.7.8",
                        "X-Real-IP": "5.6.7.8"
                    }
                }
            }))
            .unwrap();

        assert_eq!(
            response.headers.get("X-Real-IP").map(String::as_str),
            Some("5.6.7.8")
        );
    }

    #[test]
    fn test_extract_rejects_postman_shape() {
        let echo = DadjokesEcho::new();
        assert!(echo.extract(json!({"headers": {}})).is_err());
    }

    #[tokio::test]
    async fn test_by_http_through_fake_proxy() {
        let (port, proxy_task) =
            spawn_answering_proxy(r#"{"RequestEcho":{"Headers":{"Via":"1.1 fake"}}}"#, 1).await;

        let echo = DadjokesEcho::with_urls("http://jokes.invalid/", "https://jokes.invalid/");
        let proxy = Endpoint::new(Protocol::Http, "127.0.0.1", port);

        let response = echo.by_http(&proxy, Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            response.headers.get("Via").map(String::as_str),
            Some("1.1 fake")
        );
        proxy_task.await.unwrap();
    }
}
