use serde::Deserialize;
use serde_json::Value;

use super::{headers_from_value, Echo, EchoResponse};
use crate::error::{Result, SieveError};

const HTTP_URL: &str = "http://postman-echo.com/get";
const HTTPS_URL: &str = "https://postman-echo.com/get";

/// `{"args": {}, "headers": {...}, "url": "..."}`
#[derive(Debug, Deserialize)]
struct PostmanBody {
    headers: Value,
}

/// postman-echo.com
pub struct PostmanEcho {
    http_url: String,
    https_url: String,
}

impl PostmanEcho {
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

impl Default for PostmanEcho {
    fn default() -> Self {
        Self::new()
    }
}

impl Echo for PostmanEcho {
    fn name(&self) -> &'static str {
        "postman-echo"
    }

    fn http_url(&self) -> &str {
        &self.http_url
    }

    fn https_url(&self) -> &str {
        &self.https_url
    }

    fn extract(&self, body: Value) -> Result<EchoResponse> {
        let body: PostmanBody = serde_json::from_value(body).map_err(|e| {
            SieveError::ProbeUnexpectedResponse(format!("unexpected postman-echo body: {}", e))
        })?;

        Ok(EchoResponse {
            headers: headers_from_value(&body.headers)?,
        })
    }
}
