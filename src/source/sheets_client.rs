use std::env;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";

/// Minimal view of the spreadsheet values API the sheets backend relies on.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Cells of `range` as display text, row-major.
    async fn values(&self, range: &str) -> Result<Vec<Vec<String>>>;
    /// Overwrites a single cell.
    async fn update_cell(&self, range: &str, value: &str) -> Result<()>;
}

pub struct SheetsCredentials {
    pub access_token: String,
}

impl SheetsCredentials {
    pub fn from_env(variable: &str) -> Result<Self> {
        let access_token = env::var(variable).map_err(|_| anyhow!("{variable} not set"))?;

        if access_token.trim().is_empty() {
            anyhow::bail!("{variable} is empty");
        }

        Ok(Self { access_token })
    }
}

#[derive(Clone, Debug)]
pub struct SheetsClient {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    access_token: String,
}

impl SheetsClient {
    pub fn new(spreadsheet_id: impl Into<String>, credentials: SheetsCredentials) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, spreadsheet_id, credentials)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        credentials: SheetsCredentials,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            spreadsheet_id: spreadsheet_id.into(),
            access_token: credentials.access_token,
        }
    }

    fn values_url(&self, range: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid sheets base url {}", self.base_url))?;

        url.path_segments_mut()
            .map_err(|_| anyhow!("sheets base url cannot be a base"))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str(), "values", range]);

        Ok(url)
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.access_token))
                .map_err(|_| anyhow!("invalid access token header value"))?,
        );

        Ok(headers)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let resp = request
            .headers(self.auth_headers()?)
            .send()
            .await
            .context("sheets request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("read response body failed")?;

        if !status.is_success() {
            anyhow::bail!("sheets http error {status}: {text}");
        }

        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueUpdate<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: [[&'a str; 1]; 1],
}

#[async_trait]
impl SheetsApi for SheetsClient {
    async fn values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(range)?;
        let text = self.send(self.http.get(url)).await?;

        let parsed: ValueRange = serde_json::from_str(&text).map_err(|e| {
            tracing::error!(error = %e, %text, "failed to parse sheets JSON response");
            anyhow!("parse sheets response JSON failed: {e}")
        })?;

        Ok(parsed
            .values
            .into_iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }

    async fn update_cell(&self, range: &str, value: &str) -> Result<()> {
        let mut url = self.values_url(range)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = ValueUpdate {
            range,
            major_dimension: "ROWS",
            values: [[value]],
        };

        self.send(self.http.put(url).json(&body)).await?;

        Ok(())
    }
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Zero-based column index to its A1 letters (`0` → `A`, `26` → `AA`).
pub fn column_letters(index: usize) -> String {
    let mut letters = Vec::new();
    let mut remaining = index + 1;

    while remaining > 0 {
        let digit = (remaining - 1) % 26;
        letters.push(b'A' + digit as u8);
        remaining = (remaining - 1) / 26;
    }

    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Sheet-qualified A1 range, quoting the sheet name.
pub fn a1_range(sheet_name: &str, reference: &str) -> String {
    format!("'{}'!{reference}", sheet_name.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SheetsClient {
        SheetsClient::with_base_url(
            "https://sheets.example.test/",
            "sheet-id",
            SheetsCredentials {
                access_token: "token".to_string(),
            },
        )
    }

    #[test]
    fn column_letters_roll_over() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(27), "AB");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_letters(702), "AAA");
    }

    #[test]
    fn ranges_quote_sheet_names() {
        assert_eq!(a1_range("Trade Schedule", "F3"), "'Trade Schedule'!F3");
        assert_eq!(a1_range("Bob's", "A1"), "'Bob''s'!A1");
    }

    #[test]
    fn values_url_encodes_the_range_segment() {
        let url = client().values_url("'Trade Schedule'!F3").unwrap();

        assert_eq!(
            url.as_str(),
            "https://sheets.example.test/v4/spreadsheets/sheet-id/values/'Trade%20Schedule'!F3"
        );
    }

    #[test]
    fn value_ranges_render_as_text() {
        let parsed: ValueRange =
            serde_json::from_str(r#"{"range":"A1:B2","values":[["USD/JPY", 1000],[null, true]]}"#)
                .unwrap();
        let rows: Vec<Vec<String>> = parsed
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();

        assert_eq!(rows, vec![vec!["USD/JPY", "1000"], vec!["", "true"]]);
    }

    #[test]
    fn empty_sheet_has_no_values() {
        let parsed: ValueRange = serde_json::from_str(r#"{"range":"A1:Z1000"}"#).unwrap();

        assert!(parsed.values.is_empty());
    }
}
