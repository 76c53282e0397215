//! Detail-page extraction: markup tree → raw field map.

use scraper::{Html, Selector};
use tracing::debug;

use crate::clean::clean_text;
use crate::error::ScrapeError;

use super::{Cardinality, RawFieldMap, LISTING_RULES};

/// Gallery image selectors, evaluated in order; `src` wins over `data-src`.
const IMAGE_SELECTORS: &[&str] = &[
    "figure img",
    r#"[data-testid="gallery"] img"#,
    ".image-gallery img",
];

/// Extract the raw field map from a fetched detail page.
///
/// Fails with `ExtractionFailed` only when the mandatory anchor (the title)
/// cannot be located, which indicates a template change or a non-listing
/// page. Such pages are skipped, never refetched.
pub fn extract_listing(html: &str, url: &str) -> Result<RawFieldMap, ScrapeError> {
    let document = Html::parse_document(html);
    let mut raw = RawFieldMap::new(url);

    for rule in LISTING_RULES {
        match rule.cardinality {
            Cardinality::One => {
                if let Some(text) = select_text(&document, rule.selectors) {
                    raw.set(rule.name, text);
                }
            }
            Cardinality::Many => {
                let values = select_all_texts(&document, rule.selectors);
                if !values.is_empty() {
                    raw.set_list(rule.name, values);
                }
            }
        }
    }

    let images = collect_images(&document);
    if !images.is_empty() {
        raw.set_list("images", images);
    }

    if !raw.has("title") {
        return Err(ScrapeError::ExtractionFailed {
            url: url.to_string(),
            reason: "no title anchor found".to_string(),
        });
    }

    debug!(url, "extracted detail page");
    Ok(raw)
}

/// First non-empty text for any of the selectors, cleaned.
fn select_text(document: &Html, selectors: &[&str]) -> Option<String> {
    for sel in selectors {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        if let Some(el) = document.select(&selector).next() {
            let text = el.text().collect::<Vec<_>>().join(" ");
            if let Some(cleaned) = clean_text(&text) {
                return Some(cleaned);
            }
        }
    }
    None
}

/// All distinct cleaned texts across the selectors, in document order.
fn select_all_texts(document: &Html, selectors: &[&str]) -> Vec<String> {
    let mut results: Vec<String> = Vec::new();
    for sel in selectors {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        for el in document.select(&selector) {
            let text = el.text().collect::<Vec<_>>().join(" ");
            if let Some(cleaned) = clean_text(&text) {
                if !results.contains(&cleaned) {
                    results.push(cleaned);
                }
            }
        }
    }
    results
}

/// Gallery image URLs, deduplicated in document order.
fn collect_images(document: &Html) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();
    for sel in IMAGE_SELECTORS {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        for img in document.select(&selector) {
            let src = img
                .value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"));
            if let Some(cleaned) = src.and_then(clean_text) {
                if !images.contains(&cleaned) {
                    images.push(cleaned);
                }
            }
        }
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL_PAGE: &str = r#"
        <html><body>
          <h1 data-testid="heading">BMW 340i xDrive</h1>
          <div data-testid="price-label">€ 31,980</div>
          <span data-testid="makeLabel">BMW</span>
          <span data-testid="modelLabel">340</span>
          <span data-testid="mileage-label">161,415 km</span>
          <span data-testid="power-label">240 kW (326 hp)</span>
          <span data-testid="first-registration-label">03/2017</span>
          <div data-testid="seller-name">Autohaus Nord</div>
          <div data-testid="comfort-features">
            <ul><li>Air conditioning</li><li>  Heated   seats </li></ul>
          </div>
          <div data-testid="gallery">
            <img src="https://img.example.com/1.jpg">
            <img data-src="https://img.example.com/2.jpg">
            <img src="https://img.example.com/1.jpg">
          </div>
        </body></html>
    "#;

    #[test]
    fn test_extract_listing_fields() {
        let raw = extract_listing(DETAIL_PAGE, "https://example.com/offers/bmw-1").unwrap();
        assert_eq!(raw.get("title"), Some("BMW 340i xDrive"));
        assert_eq!(raw.get("price"), Some("€ 31,980"));
        assert_eq!(raw.get("mark"), Some("BMW"));
        assert_eq!(raw.get("mileage"), Some("161,415 km"));
        assert_eq!(raw.get("power"), Some("240 kW (326 hp)"));
        assert_eq!(raw.get("dealerName"), Some("Autohaus Nord"));
        assert_eq!(
            raw.get_list("comfort"),
            &["Air conditioning".to_string(), "Heated seats".to_string()]
        );
    }

    #[test]
    fn test_extract_listing_images_deduplicated() {
        let raw = extract_listing(DETAIL_PAGE, "https://example.com/offers/bmw-1").unwrap();
        assert_eq!(
            raw.get_list("images"),
            &[
                "https://img.example.com/1.jpg".to_string(),
                "https://img.example.com/2.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn test_missing_optional_fields_are_absent() {
        let html = r#"<html><body><h1>Plain title</h1></body></html>"#;
        let raw = extract_listing(html, "https://example.com/offers/x").unwrap();
        assert_eq!(raw.get("title"), Some("Plain title"));
        assert!(raw.get("price").is_none());
        assert!(raw.get_list("safety").is_empty());
    }

    #[test]
    fn test_missing_title_is_extraction_failed() {
        let html = "<html><body><p>consent wall</p></body></html>";
        let err = extract_listing(html, "https://example.com/offers/x").unwrap_err();
        assert!(matches!(err, ScrapeError::ExtractionFailed { .. }));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let a = extract_listing(DETAIL_PAGE, "https://example.com/offers/bmw-1").unwrap();
        let b = extract_listing(DETAIL_PAGE, "https://example.com/offers/bmw-1").unwrap();
        assert_eq!(a, b);
    }
}
