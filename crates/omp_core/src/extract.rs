use crate::error::{Error, Result};
use regex::Regex;
use scraper::{Html, Selector};
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

static PARAGRAPH: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("paragraph selector"));
static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").expect("blank line regex"));

pub trait TextExtractor: Send + Sync + 'static {
    /// Returns the document text. Markup output (one `<p>` per paragraph)
    /// is accepted as well as plain text.
    fn extract_text(&self, bytes: Vec<u8>) -> impl Future<Output = Result<String>> + Send;
}

/// Apache Tika server, `PUT /tika` with an HTML response.
#[derive(Debug, Clone)]
pub struct TikaExtractor {
    client: reqwest::Client,
    endpoint: String,
}

impl TikaExtractor {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| Error::Extraction(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

impl TextExtractor for TikaExtractor {
    async fn extract_text(&self, bytes: Vec<u8>) -> Result<String> {
        let response = self
            .client
            .put(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .header(reqwest::header::ACCEPT, "text/html")
            .body(bytes)
            .send()
            .await
            .map_err(|err| Error::Extraction(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Extraction(format!(
                "{} answered {status}",
                self.endpoint
            )));
        }
        response
            .text()
            .await
            .map_err(|err| Error::Extraction(err.to_string()))
    }
}

/// Splits extracted text into paragraph snippets, whitespace collapsed,
/// empties dropped.
pub fn split_snippets(text: &str) -> Vec<String> {
    let pieces: Vec<String> = if text.contains("<p") {
        let html = Html::parse_document(text);
        html.select(&PARAGRAPH)
            .map(|p| p.text().collect::<String>())
            .collect()
    } else {
        BLANK_LINE.split(text).map(str::to_string).collect()
    };

    pieces
        .iter()
        .map(|piece| piece.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|piece| !piece.is_empty())
        .collect()
}
