//! Ticker universe and the sources it can be refreshed from.
//!
//! The universe is re-read at the start of every run. Three sources are
//! supported:
//! - the Wikipedia S&P 500 constituents page (HTML table)
//! - a constituents CSV, from a URL or a local path
//! - a static TOML file with a flat `tickers` list and/or sector lists

use super::provider::UniverseSource;
use crate::error::PipelineError;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const WIKIPEDIA_SP500_URL: &str = "https://en.wikipedia.org/wiki/List_of_S%26P_500_companies";

/// Ordered, de-duplicated set of normalized symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Universe {
    symbols: Vec<String>,
}

impl Universe {
    /// Normalize and de-duplicate raw symbols, keeping first-seen order.
    pub fn from_symbols<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let symbols = raw
            .into_iter()
            .filter_map(|s| normalize_symbol(s.as_ref()))
            .filter(|s| seen.insert(s.clone()))
            .collect();
        Self { symbols }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// `brk.b ` → `BRK-B`. Empty input yields `None`.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    Some(s.to_ascii_uppercase().replace('.', "-"))
}

fn fetch_error(reason: impl Into<String>) -> PipelineError {
    PipelineError::UniverseFetch {
        reason: reason.into(),
    }
}

fn non_empty(universe: Universe, origin: &str) -> Result<Universe, PipelineError> {
    if universe.is_empty() {
        Err(fetch_error(format!("{origin} yielded no symbols")))
    } else {
        Ok(universe)
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, PipelineError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
        .build()
        .map_err(|e| fetch_error(format!("http client: {e}")))
}

fn get_text(
    client: &reqwest::blocking::Client,
    url: &str,
) -> Result<String, PipelineError> {
    let resp = client
        .get(url)
        .send()
        .map_err(|e| fetch_error(format!("GET {url}: {e}")))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(fetch_error(format!("GET {url}: HTTP {status}")));
    }
    resp.text()
        .map_err(|e| fetch_error(format!("GET {url}: body: {e}")))
}

// ── Wikipedia ───────────────────────────────────────────────────────

/// Constituents table scraped from a Wikipedia list page.
pub struct WikipediaUniverse {
    url: String,
    timeout: Duration,
}

impl WikipediaUniverse {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

impl UniverseSource for WikipediaUniverse {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn fetch_universe(&self) -> Result<Universe, PipelineError> {
        let client = http_client(self.timeout)?;
        let html = get_text(&client, &self.url)?;
        let symbols = parse_constituents_table(&html, "Symbol").map_err(fetch_error)?;
        non_empty(Universe::from_symbols(symbols), &self.url)
    }
}

fn selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| format!("invalid selector '{css}': {e:?}"))
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Extract one column of the constituents table.
///
/// Prefers `table#constituents` and falls back to the first `wikitable`.
pub fn parse_constituents_table(html: &str, column: &str) -> Result<Vec<String>, String> {
    let document = Html::parse_document(html);
    let by_id = selector("table#constituents")?;
    let by_class = selector("table.wikitable")?;
    let row_sel = selector("tr")?;
    let th_sel = selector("th")?;
    let td_sel = selector("td")?;

    let table = document
        .select(&by_id)
        .next()
        .or_else(|| document.select(&by_class).next())
        .ok_or("no constituents table found")?;

    let mut col_idx = None;
    let mut symbols = Vec::new();

    for row in table.select(&row_sel) {
        if col_idx.is_none() {
            let headers: Vec<String> = row.select(&th_sel).map(cell_text).collect();
            if let Some(idx) = headers.iter().position(|h| h == column) {
                col_idx = Some(idx);
            }
            continue;
        }
        if let Some(cell) = col_idx.and_then(|idx| row.select(&td_sel).nth(idx)) {
            symbols.push(cell_text(cell));
        }
    }

    if col_idx.is_none() {
        return Err(format!("column '{column}' not found in constituents table"));
    }
    Ok(symbols)
}

// ── CSV ─────────────────────────────────────────────────────────────

/// Constituents CSV with a header row, read from an `http(s)://` URL or a path.
pub struct CsvUniverse {
    location: String,
    column: String,
    timeout: Duration,
}

impl CsvUniverse {
    pub fn new(location: impl Into<String>, column: impl Into<String>, timeout: Duration) -> Self {
        Self {
            location: location.into(),
            column: column.into(),
            timeout,
        }
    }

    fn read_body(&self) -> Result<String, PipelineError> {
        if self.location.starts_with("http://") || self.location.starts_with("https://") {
            let client = http_client(self.timeout)?;
            get_text(&client, &self.location)
        } else {
            std::fs::read_to_string(&self.location)
                .map_err(|e| fetch_error(format!("read {}: {e}", self.location)))
        }
    }
}

impl UniverseSource for CsvUniverse {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch_universe(&self) -> Result<Universe, PipelineError> {
        let body = self.read_body()?;
        let symbols = parse_constituents_csv(&body, &self.column).map_err(fetch_error)?;
        non_empty(Universe::from_symbols(symbols), &self.location)
    }
}

pub fn parse_constituents_csv(body: &str, column: &str) -> Result<Vec<String>, String> {
    let mut rdr = csv::Reader::from_reader(body.as_bytes());
    let idx = rdr
        .headers()
        .map_err(|e| format!("csv header: {e}"))?
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| format!("column '{column}' not found"))?;

    rdr.records()
        .map(|rec| {
            rec.map(|r| r.get(idx).unwrap_or("").to_string())
                .map_err(|e| format!("csv row: {e}"))
        })
        .collect()
}

// ── Static file ─────────────────────────────────────────────────────

/// On-disk universe definition.
///
/// ```toml
/// tickers = ["SPY"]
///
/// [sectors]
/// Technology = ["AAPL", "MSFT"]
/// Finance = ["BRK.B", "JPM"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UniverseFile {
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub sectors: BTreeMap<String, Vec<String>>,
}

impl UniverseFile {
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("parse universe TOML: {e}"))
    }

    /// Flat tickers first, then sectors in name order.
    pub fn all_tickers(&self) -> impl Iterator<Item = &str> {
        self.tickers
            .iter()
            .chain(self.sectors.values().flatten())
            .map(String::as_str)
    }
}

pub struct FileUniverse {
    path: PathBuf,
}

impl FileUniverse {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UniverseSource for FileUniverse {
    fn name(&self) -> &str {
        "file"
    }

    fn fetch_universe(&self) -> Result<Universe, PipelineError> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| fetch_error(format!("read {}: {e}", self.path.display())))?;
        let file = UniverseFile::from_toml(&content).map_err(fetch_error)?;
        non_empty(
            Universe::from_symbols(file.all_tickers()),
            &self.path.display().to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_class_share_separator() {
        let u = Universe::from_symbols(["BRK.B", " bf.b ", "AAPL", "", "AAPL"]);
        assert_eq!(u.symbols(), &["BRK-B", "BF-B", "AAPL"]);
    }

    #[test]
    fn parses_wikipedia_table() {
        let html = r#"
            <html><body>
            <table class="wikitable sortable" id="constituents">
              <tbody>
                <tr><th>Symbol</th><th>Security</th><th>GICS Sector</th></tr>
                <tr><td><a href="/x">MMM</a></td><td>3M</td><td>Industrials</td></tr>
                <tr><td><a href="/y">BRK.B</a></td><td>Berkshire Hathaway</td><td>Financials</td></tr>
              </tbody>
            </table>
            <table class="wikitable"><tr><th>Date</th></tr><tr><td>x</td></tr></table>
            </body></html>
        "#;
        let symbols = parse_constituents_table(html, "Symbol").unwrap();
        assert_eq!(symbols, vec!["MMM", "BRK.B"]);
        let u = Universe::from_symbols(symbols);
        assert_eq!(u.symbols(), &["MMM", "BRK-B"]);
    }

    #[test]
    fn wikipedia_table_without_symbol_column_fails() {
        let html = r#"<table class="wikitable"><tr><th>Ticker</th></tr><tr><td>MMM</td></tr></table>"#;
        assert!(parse_constituents_table(html, "Symbol").is_err());
        assert!(parse_constituents_table("<p>nothing</p>", "Symbol").is_err());
    }

    #[test]
    fn parses_constituents_csv() {
        let body = "Symbol,Security\nMMM,3M\nBRK.B,Berkshire\n";
        let symbols = parse_constituents_csv(body, "Symbol").unwrap();
        assert_eq!(symbols, vec!["MMM", "BRK.B"]);
        assert!(parse_constituents_csv(body, "Ticker").is_err());
    }

    #[test]
    fn file_universe_flattens_tickers_and_sectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("universe.toml");
        std::fs::write(
            &path,
            "tickers = [\"SPY\"]\n[sectors]\nFinance = [\"BRK.B\", \"JPM\"]\nTechnology = [\"AAPL\"]\n",
        )
        .unwrap();

        let u = FileUniverse::new(&path).fetch_universe().unwrap();
        assert_eq!(u.symbols(), &["SPY", "BRK-B", "JPM", "AAPL"]);
    }

    #[test]
    fn empty_or_missing_file_is_a_universe_error() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.toml");
        std::fs::write(&empty, "tickers = []\n").unwrap();

        let err = FileUniverse::new(&empty).fetch_universe().unwrap_err();
        assert!(matches!(err, PipelineError::UniverseFetch { .. }));

        let err = FileUniverse::new(dir.path().join("missing.toml"))
            .fetch_universe()
            .unwrap_err();
        assert!(matches!(err, PipelineError::UniverseFetch { .. }));
    }
}
