use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::SourceLoader;
use crate::error::{Result, SieveError};
use crate::models::{Endpoint, Protocol};

const DEFAULT_URL: &str = "https://free-proxy-list.net/";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static TABLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table").expect("Invalid table selector"));

static ROW: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tbody tr").expect("Invalid row selector"));

static CELL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td").expect("Invalid cell selector"));

/// Scrapes the first table of free-proxy-list.net
///
/// Column 1 is the ip, column 2 the port and column 7 the `yes`/`no`
/// https flag. Rows with anything else in those cells are skipped.
pub struct FreeProxyListNet {
    url: String,
    client: Client,
}

impl FreeProxyListNet {
    pub fn new() -> Result<Self> {
        Self::with_url(DEFAULT_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .map_err(|e| SieveError::Internal(format!("failed to build source client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    async fn fetch_page(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SieveError::SourceLoad(format!("{}: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(SieveError::SourceLoad(format!(
                "{}: HTTP {}",
                self.url,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| SieveError::SourceLoad(format!("{}: {}", self.url, e)))
    }
}

#[async_trait]
impl SourceLoader for FreeProxyListNet {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn load(&self) -> Result<Vec<Endpoint>> {
        let page = self.fetch_page().await?;
        let proxies = parse_page(&page)?;
        info!("Loaded {} candidates from {}", proxies.len(), self.name());
        Ok(proxies)
    }

    fn name(&self) -> &'static str {
        "free-proxy-list.net"
    }
}

fn parse_page(page: &str) -> Result<Vec<Endpoint>> {
    let document = Html::parse_document(page);
    let table = document
        .select(&TABLE)
        .next()
        .ok_or_else(|| SieveError::SourceLoad("proxy table not found".into()))?;

    let mut proxies = Vec::new();
    for row in table.select(&ROW) {
        let cells: Vec<String> = row
            .select(&CELL)
            .map(|td| td.text().collect::<String>().trim().to_string())
            .collect();
        let cells: Vec<&str> = cells.iter().map(String::as_str).collect();

        match parse_row(&cells) {
            Some(endpoint) => proxies.push(endpoint),
            None => debug!("Skipping row {:?}", cells),
        }
    }

    Ok(proxies)
}

fn parse_row(cells: &[&str]) -> Option<Endpoint> {
    if cells.len() < 7 {
        return None;
    }

    let host = cells[0];
    let port: u16 = cells[1].parse().ok().filter(|&p| p > 0)?;
    let protocol = match cells[6] {
        "yes" => Protocol::Https,
        "no" => Protocol::Http,
        _ => return None,
    };

    if host.is_empty() || host.contains(['<', ' ', ':', '/']) {
        return None;
    }

    Some(Endpoint::new(protocol, host, port))
}
