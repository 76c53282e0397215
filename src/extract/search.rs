//! Discovery-page parsing: listing links and the next-page affordance.

use scraper::{Html, Selector};
use tracing::debug;

use super::resolve_url;

/// Anchors pointing at detail routes.
const LISTING_LINK_SELECTORS: &[&str] = &[
    r#"a[href*="/angebote/"]"#,
    r#"a[href*="/offers/"]"#,
    r#"a[data-item-name="detail-page-link"]"#,
];

/// Best-effort "next page" affordances, current template first.
const NEXT_LINK_SELECTORS: &[&str] = &[
    r#"a[rel="next"]"#,
    r#"a[aria-label*="Next"]"#,
    r#"a[aria-label*="Weiter"]"#,
];

/// Parsed discovery page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    /// Distinct absolute detail URLs, in document order.
    pub listing_urls: Vec<String>,
    /// Absolute URL of the next results page, when present.
    pub next_url: Option<String>,
}

/// Extract listing URLs and the optional next-page link from a discovery
/// page. Relative hrefs are resolved against `base_url`.
pub fn parse_search_page(html: &str, base_url: &str) -> SearchPage {
    let document = Html::parse_document(html);

    let mut listing_urls: Vec<String> = Vec::new();
    for sel in LISTING_LINK_SELECTORS {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        for a in document.select(&selector) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let full = resolve_url(base_url, href);
            if !listing_urls.contains(&full) {
                listing_urls.push(full);
            }
        }
    }

    let mut next_url = None;
    for sel in NEXT_LINK_SELECTORS {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        if let Some(href) = document
            .select(&selector)
            .next()
            .and_then(|a| a.value().attr("href"))
        {
            next_url = Some(resolve_url(base_url, href));
            break;
        }
    }

    debug!(
        listings = listing_urls.len(),
        has_next = next_url.is_some(),
        "parsed discovery page"
    );

    SearchPage {
        listing_urls,
        next_url,
    }
}

/// Whether a URL already points at a detail route.
pub fn is_detail_url(url: &str) -> bool {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    path.contains("/angebote/") || path.contains("/offers/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_page_links_and_next() {
        let html = r#"
            <html><body>
              <a href="/offers/bmw-340i-a1">BMW</a>
              <a href="/offers/vw-golf-b2">Golf</a>
              <a href="/offers/bmw-340i-a1">BMW again</a>
              <a rel="next" href="/lst?page=2">Next</a>
            </body></html>
        "#;
        let page = parse_search_page(html, "https://example.com/lst");
        assert_eq!(
            page.listing_urls,
            vec![
                "https://example.com/offers/bmw-340i-a1",
                "https://example.com/offers/vw-golf-b2",
            ]
        );
        assert_eq!(
            page.next_url.as_deref(),
            Some("https://example.com/lst?page=2")
        );
    }

    #[test]
    fn test_parse_search_page_no_next() {
        let html = r#"<a href="/angebote/audi-a4-c3">Audi</a>"#;
        let page = parse_search_page(html, "https://example.com/lst");
        assert_eq!(page.listing_urls.len(), 1);
        assert!(page.next_url.is_none());
    }

    #[test]
    fn test_parse_search_page_aria_next_fallback() {
        let html = r#"
            <a href="/offers/x-1">x</a>
            <a aria-label="Weiter zur nächsten Seite" href="/lst?page=3">»</a>
        "#;
        let page = parse_search_page(html, "https://example.com/lst");
        assert_eq!(
            page.next_url.as_deref(),
            Some("https://example.com/lst?page=3")
        );
    }

    #[test]
    fn test_is_detail_url() {
        assert!(is_detail_url("https://example.com/offers/bmw-1"));
        assert!(is_detail_url("https://example.com/angebote/vw-2"));
        assert!(!is_detail_url("https://example.com/lst?sort=price"));
    }
}
