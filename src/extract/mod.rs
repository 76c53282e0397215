//! Field extraction from listing-site markup.
//!
//! Extraction is driven by a declarative rule table (field name → selector
//! list → cardinality) evaluated against the parsed document tree, rather
//! than ad hoc conditional parsing. Selectors are ordered from the current
//! site template to older fallbacks; the first match wins for single-valued
//! fields, matches accumulate for list fields.

pub mod listing;
pub mod search;

use std::collections::HashMap;

pub use listing::extract_listing;
pub use search::{parse_search_page, SearchPage};

/// Expected number of values for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// One extraction rule: where a field lives in the markup.
pub struct FieldRule {
    pub name: &'static str,
    pub selectors: &'static [&'static str],
    pub cardinality: Cardinality,
}

/// Rule table for detail pages. Field names match the output schema.
pub const LISTING_RULES: &[FieldRule] = &[
    FieldRule {
        name: "title",
        selectors: &[
            r#"h1[data-testid="heading"]"#,
            "h1",
            r#"h2[data-item-name="car-title"]"#,
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "price",
        selectors: &[
            r#"[data-testid="price-label"]"#,
            "div.price-block span",
            "span[data-item-name=price]",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "location",
        selectors: &[
            r#"[data-testid="seller-address"]"#,
            "div.seller-address",
            "span[itemprop=address]",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "dealerName",
        selectors: &[
            r#"[data-testid="seller-name"]"#,
            "div.dealer-info h2",
            ".cldt-vendor-contact-box h2",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "dealerRatings",
        selectors: &[
            r#"[data-testid="rating-count"]"#,
            "span.dealer-rating-count",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "mark",
        selectors: &[r#"[data-testid="makeLabel"]"#, "span[itemprop=brand]"],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "model",
        selectors: &[r#"[data-testid="modelLabel"]"#, "span[itemprop=model]"],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "modelVersion",
        selectors: &[r#"[data-testid="versionLabel"]"#, "span.model-version"],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "mileage",
        selectors: &[
            r#"[data-testid="mileage-label"]"#,
            "span.mileage",
            "dl[data-item-name=vehicle-details] dd:nth-of-type(1)",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "gearbox",
        selectors: &[r#"[data-testid="transmission-label"]"#, "span.gearbox"],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "firstRegistration",
        selectors: &[
            r#"[data-testid="first-registration-label"]"#,
            "span.first-registration",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "fuelType",
        selectors: &[r#"[data-testid="fuel-label"]"#, "span.fuel"],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "power",
        selectors: &[r#"[data-testid="power-label"]"#, "span.power"],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "seller",
        selectors: &[r#"[data-testid="seller-type-label"]"#, "span.seller-type"],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "contactName",
        selectors: &[
            r#"[data-testid="seller-contact-name"]"#,
            ".cldt-vendor-contact-box span",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "contactPhone",
        selectors: &[r#"[data-testid="seller-phone"]"#, r#"a[href^="tel:"]"#],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "bodyType",
        selectors: &[r#"[data-testid="body-type-label"]"#, "span.body-type"],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "drivetrain",
        selectors: &[r#"[data-testid="drive-type-label"]"#, "span.drivetrain"],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "seats",
        selectors: &[r#"[data-testid="num-seats-label"]"#, "span.seats"],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "engineSize",
        selectors: &[
            r#"[data-testid="cubic-capacity-label"]"#,
            "span.engine-size",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "gears",
        selectors: &[r#"[data-testid="gears-label"]"#, "span.gears"],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "emissionClass",
        selectors: &[
            r#"[data-testid="emission-class-label"]"#,
            "span.emission-class",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "colour",
        selectors: &[
            r#"[data-testid="exterior-color-label"]"#,
            "span.exterior-color",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "manufacturerColour",
        selectors: &[
            r#"[data-testid="manufacturer-color-label"]"#,
            "span.manufacturer-color",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "productionDate",
        selectors: &[
            r#"[data-testid="production-date-label"]"#,
            "span.production-date",
        ],
        cardinality: Cardinality::One,
    },
    FieldRule {
        name: "comfort",
        selectors: &[
            r#"[data-testid="comfort-features"] li"#,
            "ul.comfort-features li",
        ],
        cardinality: Cardinality::Many,
    },
    FieldRule {
        name: "media",
        selectors: &[
            r#"[data-testid="media-features"] li"#,
            "ul.media-features li",
        ],
        cardinality: Cardinality::Many,
    },
    FieldRule {
        name: "safety",
        selectors: &[
            r#"[data-testid="safety-features"] li"#,
            "ul.safety-features li",
        ],
        cardinality: Cardinality::Many,
    },
    FieldRule {
        name: "extras",
        selectors: &[
            r#"[data-testid="other-features"] li"#,
            "ul.extra-features li",
        ],
        cardinality: Cardinality::Many,
    },
];

/// Raw field values extracted from one page, keyed by schema field name.
/// Missing optional fields are simply absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFieldMap {
    pub url: String,
    singles: HashMap<&'static str, String>,
    lists: HashMap<&'static str, Vec<String>>,
}

impl RawFieldMap {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            singles: HashMap::new(),
            lists: HashMap::new(),
        }
    }

    pub fn set(&mut self, field: &'static str, value: String) {
        self.singles.insert(field, value);
    }

    pub fn set_list(&mut self, field: &'static str, values: Vec<String>) {
        self.lists.insert(field, values);
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.singles.get(field).map(|s| s.as_str())
    }

    pub fn get_list(&self, field: &str) -> &[String] {
        self.lists.get(field).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn has(&self, field: &str) -> bool {
        self.singles.contains_key(field) || self.lists.contains_key(field)
    }
}

/// Resolve a possibly-relative href against the page URL.
pub fn resolve_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(path) {
            return resolved.to_string();
        }
    }

    // Fallback: manual joining with proper slash handling
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url_absolute() {
        assert_eq!(
            resolve_url("https://example.com", "https://other.com/offers/1"),
            "https://other.com/offers/1"
        );
    }

    #[test]
    fn test_resolve_url_relative() {
        assert_eq!(
            resolve_url("https://example.com/lst", "/offers/bmw-1"),
            "https://example.com/offers/bmw-1"
        );
        assert_eq!(
            resolve_url("https://example.com/lst/", "offers/bmw-1"),
            "https://example.com/lst/offers/bmw-1"
        );
    }

    #[test]
    fn test_rule_table_selectors_are_valid() {
        for rule in LISTING_RULES {
            for sel in rule.selectors {
                assert!(
                    scraper::Selector::parse(sel).is_ok(),
                    "invalid selector for {}: {}",
                    rule.name,
                    sel
                );
            }
        }
    }

    #[test]
    fn test_raw_field_map_absent_fields() {
        let raw = RawFieldMap::new("https://example.com/offers/x");
        assert!(raw.get("title").is_none());
        assert!(raw.get_list("comfort").is_empty());
        assert!(!raw.has("price"));
    }
}
