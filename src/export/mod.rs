//! Record export: JSON, CSV, XML, RSS, and HTML writers, plus the
//! per-dealer aggregation.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde_json::Value;
use tracing::info;

use crate::models::ListingRecord;

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
    Xml,
    Rss,
    Html,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Xml => "xml",
            OutputFormat::Rss => "rss",
            OutputFormat::Html => "html",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "xml" => Ok(OutputFormat::Xml),
            "rss" => Ok(OutputFormat::Rss),
            "html" => Ok(OutputFormat::Html),
            other => Err(anyhow::anyhow!("unsupported output format: {other}")),
        }
    }
}

/// Write records to `path` in the given format.
pub fn export_records(
    records: &[ListingRecord],
    path: &Path,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let file = fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    match format {
        OutputFormat::Json => write_json(records, file)?,
        OutputFormat::Csv => write_csv(records, file)?,
        OutputFormat::Xml => write_xml(records, file)?,
        OutputFormat::Rss => write_rss(records, file)?,
        OutputFormat::Html => write_html(records, file)?,
    }

    info!(path = %path.display(), %format, count = records.len(), "records exported");
    Ok(())
}

fn write_json(records: &[ListingRecord], file: fs::File) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(file, records).context("failed to encode records")
}

fn write_csv(records: &[ListingRecord], file: fs::File) -> anyhow::Result<()> {
    let flattened: Vec<BTreeMap<String, String>> =
        records.iter().map(flatten_record).collect::<Result<_, _>>()?;

    // Header is the sorted union of keys across all records.
    let mut columns: Vec<String> = Vec::new();
    for record in &flattened {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns.sort();

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(&columns)?;
    for record in &flattened {
        let row: Vec<&str> = columns
            .iter()
            .map(|col| record.get(col).map(String::as_str).unwrap_or(""))
            .collect();
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_xml(records: &[ListingRecord], mut file: fs::File) -> anyhow::Result<()> {
    writeln!(file, r#"<?xml version="1.0" encoding="utf-8"?>"#)?;
    writeln!(file, "<listings>")?;
    for record in records {
        writeln!(file, "  <listing>")?;
        for (key, value) in flatten_record(record)? {
            let tag = xml_tag(&key);
            writeln!(file, "    <{tag}>{}</{tag}>", xml_escape(&value))?;
        }
        writeln!(file, "  </listing>")?;
    }
    writeln!(file, "</listings>")?;
    Ok(())
}

fn write_rss(records: &[ListingRecord], mut file: fs::File) -> anyhow::Result<()> {
    writeln!(file, r#"<?xml version="1.0" encoding="utf-8"?>"#)?;
    writeln!(file, r#"<rss version="2.0">"#)?;
    writeln!(file, "  <channel>")?;
    writeln!(file, "    <title>Car Listings Feed</title>")?;
    writeln!(file, "    <link>https://www.autoscout24.com</link>")?;
    writeln!(file, "    <description>Scraped car listings</description>")?;
    for record in records {
        let title = record.title.as_deref().unwrap_or("Car listing");
        let dealer = record
            .dealer
            .as_ref()
            .and_then(|d| d.name.as_deref())
            .unwrap_or("");
        writeln!(file, "    <item>")?;
        writeln!(file, "      <title>{}</title>", xml_escape(title))?;
        writeln!(file, "      <link>{}</link>", xml_escape(&record.url))?;
        writeln!(file, "      <description>{}</description>", xml_escape(dealer))?;
        writeln!(file, "    </item>")?;
    }
    writeln!(file, "  </channel>")?;
    writeln!(file, "</rss>")?;
    Ok(())
}

fn write_html(records: &[ListingRecord], mut file: fs::File) -> anyhow::Result<()> {
    let flattened: Vec<BTreeMap<String, String>> =
        records.iter().map(flatten_record).collect::<Result<_, _>>()?;

    let mut columns: Vec<String> = Vec::new();
    for record in &flattened {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns.sort();

    const HTML_HEAD: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Car Listings</title>
  <style>
    body { font-family: Arial, sans-serif; margin: 1.5rem; }
    table { border-collapse: collapse; width: 100%; }
    th, td { border: 1px solid #ddd; padding: 0.5rem; font-size: 0.9rem; }
    th { background: #f5f5f5; text-align: left; }
  </style>
</head>
<body>
  <h1>Car Listings</h1>
  <table>"#;
    writeln!(file, "{HTML_HEAD}")?;
    write!(file, "    <thead><tr>")?;
    for col in &columns {
        write!(file, "<th>{}</th>", html_escape(col))?;
    }
    writeln!(file, "</tr></thead>")?;
    writeln!(file, "    <tbody>")?;
    for record in &flattened {
        write!(file, "      <tr>")?;
        for col in &columns {
            let cell = record.get(col).map(String::as_str).unwrap_or("");
            write!(file, "<td>{}</td>", html_escape(cell))?;
        }
        writeln!(file, "</tr>")?;
    }
    writeln!(file, "    </tbody>\n  </table>\n</body>\n</html>")?;
    Ok(())
}

/// Flatten one record to string cells: nested objects get dot-joined
/// keys, arrays join with "; ", nulls are dropped.
fn flatten_record(record: &ListingRecord) -> anyhow::Result<BTreeMap<String, String>> {
    let value = serde_json::to_value(record).context("failed to encode record")?;
    let mut flat = BTreeMap::new();
    flatten_value(None, &value, &mut flat);
    Ok(flat)
}

fn flatten_value(prefix: Option<&str>, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                let joined = match prefix {
                    Some(prefix) => format!("{prefix}.{key}"),
                    None => key.clone(),
                };
                flatten_value(Some(&joined), inner, out);
            }
        }
        Value::Null => {}
        other => {
            let Some(key) = prefix else { return };
            let cell = match other {
                Value::String(s) => s.clone(),
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("; "),
                other => other.to_string(),
            };
            out.insert(key.to_string(), cell);
        }
    }
}

/// Escape HTML special characters for safe rendering.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_escape(s: &str) -> String {
    html_escape(s)
}

/// XML element names allow only a restricted character set.
fn xml_tag(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Per-dealer aggregation over the exported records.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerSummary {
    pub dealer_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dealer_ratings: Option<String>,
    pub listing_count: usize,
}

/// Group records by dealer name; the first record seen for a dealer
/// supplies location and ratings. Unattributed records group under
/// "Unknown dealer".
pub fn build_dealer_summary(records: &[ListingRecord]) -> BTreeMap<String, DealerSummary> {
    let mut summary: BTreeMap<String, DealerSummary> = BTreeMap::new();
    for record in records {
        let name = record
            .dealer
            .as_ref()
            .and_then(|d| d.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Unknown dealer")
            .to_string();

        summary
            .entry(name.clone())
            .or_insert_with(|| DealerSummary {
                dealer_name: name,
                location: record.location.clone(),
                dealer_ratings: record
                    .dealer
                    .as_ref()
                    .and_then(|d| d.ratings.clone()),
                listing_count: 0,
            })
            .listing_count += 1;
    }
    summary
}
