//! Core data types for the scraping pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work a crawl task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// A paginated search-results page listing multiple cars.
    DiscoveryPage,
    /// The full listing page for one vehicle.
    DetailPage,
}

/// A unit of work for the fetch worker pool.
///
/// Owned by the pagination driver until dispatched; ownership transfers to
/// a worker for the duration of one fetch.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub url: String,
    pub kind: TaskKind,
    /// Page number context for discovery tasks (1-based). Detail tasks keep
    /// the page they were discovered on.
    pub page: u32,
}

impl CrawlTask {
    pub fn discovery(url: impl Into<String>, page: u32) -> Self {
        Self {
            url: url.into(),
            kind: TaskKind::DiscoveryPage,
            page,
        }
    }

    pub fn detail(url: impl Into<String>, page: u32) -> Self {
        Self {
            url: url.into(),
            kind: TaskKind::DetailPage,
            page,
        }
    }
}

/// Outcome of one successful fetch: raw body plus status.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// A page that produced no record, reported on the skip side-channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPage {
    pub url: String,
    pub reason: String,
}

/// Parsed price: display string preserved verbatim, numeric value and
/// currency only when parseable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Parsed mileage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mileage {
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub km: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Engine power split into kW and hp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Power {
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kw: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hp: Option<u32>,
}

/// First-registration date, tolerating a missing month ("2021" as well as
/// "03/2021").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

/// Dealer panel information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Rating text as displayed (e.g. "142 ratings").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating_count: Option<u32>,
}

impl DealerInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.ratings.is_none() && self.rating_count.is_none()
    }
}

/// Seller contact details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Contact {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none()
    }
}

/// One normalized car listing.
///
/// The identifier is derived from the listing URL path segment and is
/// immutable once assigned. Numeric fields are absent (not zero) when the
/// source value could not be parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingRecord {
    pub id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dealer: Option<DealerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mileage: Option<Mileage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gearbox: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_registration: Option<Registration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuel_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<Power>,
    /// Seller type ("Dealer" / "Private seller").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drivetrain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seats: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seats_num: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_size_cc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gears: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gears_num: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emission_class: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comfort: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub safety: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colour: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer_colour: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production_date: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Derive the listing identifier from the URL: the last non-empty path
/// segment, which carries the listing slug/GUID on detail routes.
pub fn listing_id_from_url(url: &str) -> String {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    path.trim_end_matches('/')
        .rsplit('/')
        .find(|seg| !seg.is_empty())
        .unwrap_or("")
        .to_string()
}
