//! Normalization of raw extracted strings into typed record fields.
//!
//! All functions here are pure: the same raw input always yields the same
//! record. Unparseable values are dropped with the field left absent, never
//! defaulted to zero or an empty string, so consumers can distinguish
//! "unknown" from "explicitly zero".

use regex::Regex;

use crate::extract::RawFieldMap;
use crate::models::{
    listing_id_from_url, Contact, DealerInfo, ListingRecord, Mileage, Power, Price, Registration,
};

/// Trim and collapse internal whitespace. Returns None for empty results.
pub fn clean_text(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Concatenate every digit run in the string into one integer.
/// "161,415 km" → 161415. Returns None when no digits are present.
pub fn extract_number(value: &str) -> Option<u64> {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Parse a display price into numeric amount and currency code.
/// "€ 31,980" → (Some(31980), Some("EUR")).
pub fn parse_price(display: &str) -> (Option<i64>, Option<String>) {
    let upper = display.to_uppercase();
    let currency = if display.contains('€') || upper.contains("EUR") {
        Some("EUR".to_string())
    } else if display.contains('$') || upper.contains("USD") {
        Some("USD".to_string())
    } else if upper.contains("CHF") {
        Some("CHF".to_string())
    } else {
        None
    };

    let amount = extract_number(display).map(|n| n as i64);
    (amount, currency)
}

/// Parse a mileage display string into kilometers/miles.
/// The unit is reported as written; no distance conversion is applied.
pub fn parse_mileage(display: &str) -> (Option<u64>, Option<String>) {
    let value = extract_number(display);
    let lower = display.to_lowercase();
    let unit = if lower.contains("km") {
        Some("km".to_string())
    } else if lower.contains("mi") {
        Some("mi".to_string())
    } else {
        None
    };
    (value, unit)
}

/// Split a combined power string into kW and hp.
/// "240 kW (326 hp)" → (Some(240), Some(326)).
pub fn parse_power(display: &str) -> (Option<u32>, Option<u32>) {
    let kw = Regex::new(r"(\d+)\s*kW")
        .ok()
        .and_then(|re| re.captures(display))
        .and_then(|c| c[1].parse().ok());
    let hp = Regex::new(r"(?i)(\d+)\s*(?:hp|ps)")
        .ok()
        .and_then(|re| re.captures(display))
        .and_then(|c| c[1].parse().ok());
    (kw, hp)
}

/// Parse "MM/YYYY" (or a bare "YYYY") registration date.
pub fn parse_registration(display: &str) -> (Option<u32>, Option<i32>) {
    let Some(re) = Regex::new(r"(?:(\d{1,2})\s*/\s*)?(\d{4})").ok() else {
        return (None, None);
    };
    let Some(caps) = re.captures(display) else {
        return (None, None);
    };
    let month = caps
        .get(1)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|m| (1..=12).contains(m));
    let year = caps[2].parse().ok();
    (month, year)
}

/// Clean a feature list: collapse whitespace per entry, drop empties,
/// preserve first-seen order.
fn clean_list(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if let Some(cleaned) = clean_text(value) {
            if !out.contains(&cleaned) {
                out.push(cleaned);
            }
        }
    }
    out
}

fn owned(raw: &RawFieldMap, field: &str) -> Option<String> {
    raw.get(field).and_then(clean_text)
}

/// Convert a raw field map into a normalized `ListingRecord`.
pub fn normalize(raw: &RawFieldMap) -> ListingRecord {
    let mut record = ListingRecord {
        id: listing_id_from_url(&raw.url),
        url: raw.url.clone(),
        title: owned(raw, "title"),
        mark: owned(raw, "mark"),
        model: owned(raw, "model"),
        model_version: owned(raw, "modelVersion"),
        location: owned(raw, "location"),
        gearbox: owned(raw, "gearbox"),
        fuel_type: owned(raw, "fuelType"),
        seller: owned(raw, "seller"),
        body_type: owned(raw, "bodyType"),
        drivetrain: owned(raw, "drivetrain"),
        seats: owned(raw, "seats"),
        engine_size: owned(raw, "engineSize"),
        gears: owned(raw, "gears"),
        emission_class: owned(raw, "emissionClass"),
        colour: owned(raw, "colour"),
        manufacturer_colour: owned(raw, "manufacturerColour"),
        production_date: owned(raw, "productionDate"),
        comfort: clean_list(raw.get_list("comfort")),
        media: clean_list(raw.get_list("media")),
        safety: clean_list(raw.get_list("safety")),
        extras: clean_list(raw.get_list("extras")),
        images: clean_list(raw.get_list("images")),
        ..Default::default()
    };

    if let Some(display) = owned(raw, "price") {
        let (amount, currency) = parse_price(&display);
        record.price = Some(Price {
            display,
            amount,
            currency,
        });
    }

    if let Some(display) = owned(raw, "mileage") {
        let (km, unit) = parse_mileage(&display);
        record.mileage = Some(Mileage { display, km, unit });
    }

    if let Some(display) = owned(raw, "power") {
        let (kw, hp) = parse_power(&display);
        record.power = Some(Power { display, kw, hp });
    }

    if let Some(display) = owned(raw, "firstRegistration") {
        let (month, year) = parse_registration(&display);
        record.first_registration = Some(Registration {
            display,
            month,
            year,
        });
    }

    record.seats_num = record
        .seats
        .as_deref()
        .and_then(extract_number)
        .map(|n| n as u32);
    record.engine_size_cc = record
        .engine_size
        .as_deref()
        .and_then(extract_number)
        .map(|n| n as u32);
    record.gears_num = record
        .gears
        .as_deref()
        .and_then(extract_number)
        .map(|n| n as u32);

    let dealer = DealerInfo {
        name: owned(raw, "dealerName"),
        rating_count: raw
            .get("dealerRatings")
            .and_then(extract_number)
            .map(|n| n as u32),
        ratings: owned(raw, "dealerRatings"),
    };
    if !dealer.is_empty() {
        record.dealer = Some(dealer);
    }

    let contact = Contact {
        name: owned(raw, "contactName"),
        phone: owned(raw, "contactPhone"),
    };
    if !contact.is_empty() {
        record.contact = Some(contact);
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  BMW   340i \n xDrive "), Some("BMW 340i xDrive".into()));
        assert_eq!(clean_text("   "), None);
        assert_eq!(clean_text(""), None);
    }

    #[test]
    fn test_parse_price_eur_locale() {
        let (amount, currency) = parse_price("€ 31,980");
        assert_eq!(amount, Some(31980));
        assert_eq!(currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_parse_price_other_currencies() {
        assert_eq!(parse_price("CHF 19'500").0, Some(19500));
        assert_eq!(parse_price("CHF 19'500").1.as_deref(), Some("CHF"));
        assert_eq!(parse_price("$12,000").1.as_deref(), Some("USD"));
    }

    #[test]
    fn test_parse_price_unparseable() {
        let (amount, currency) = parse_price("Price on request");
        assert_eq!(amount, None);
        assert_eq!(currency, None);
    }

    #[test]
    fn test_parse_mileage() {
        assert_eq!(parse_mileage("161,415 km"), (Some(161415), Some("km".into())));
        assert_eq!(parse_mileage("12.500 km"), (Some(12500), Some("km".into())));
        assert_eq!(parse_mileage("- km"), (None, Some("km".into())));
    }

    #[test]
    fn test_parse_power_kw_and_hp() {
        assert_eq!(parse_power("240 kW (326 hp)"), (Some(240), Some(326)));
        assert_eq!(parse_power("110 kW (150 PS)"), (Some(110), Some(150)));
        assert_eq!(parse_power("326 hp"), (None, Some(326)));
        assert_eq!(parse_power("unknown"), (None, None));
    }

    #[test]
    fn test_parse_registration() {
        assert_eq!(parse_registration("03/2017"), (Some(3), Some(2017)));
        assert_eq!(parse_registration("2021"), (None, Some(2021)));
        assert_eq!(parse_registration("new"), (None, None));
    }

    #[test]
    fn test_normalize_preserves_display_and_parses() {
        let mut raw = RawFieldMap::new("https://example.com/offers/bmw-340i-a1");
        raw.set("title", "BMW 340i".into());
        raw.set("price", "€ 31,980".into());
        raw.set("mileage", "161,415 km".into());
        raw.set("power", "240 kW (326 hp)".into());
        raw.set("firstRegistration", "03/2017".into());
        raw.set("seats", "5 seats".into());
        raw.set("dealerName", "Autohaus Nord".into());
        raw.set("dealerRatings", "142 ratings".into());
        raw.set_list(
            "comfort",
            vec!["  Air   conditioning ".into(), String::new()],
        );

        let record = normalize(&raw);
        assert_eq!(record.id, "bmw-340i-a1");

        let price = record.price.unwrap();
        assert_eq!(price.display, "€ 31,980");
        assert_eq!(price.amount, Some(31980));
        assert_eq!(price.currency.as_deref(), Some("EUR"));

        assert_eq!(record.mileage.unwrap().km, Some(161415));
        let power = record.power.unwrap();
        assert_eq!(power.kw, Some(240));
        assert_eq!(power.hp, Some(326));
        let reg = record.first_registration.unwrap();
        assert_eq!((reg.month, reg.year), (Some(3), Some(2017)));
        assert_eq!(record.seats_num, Some(5));
        assert_eq!(record.comfort, vec!["Air conditioning".to_string()]);

        let dealer = record.dealer.unwrap();
        assert_eq!(dealer.name.as_deref(), Some("Autohaus Nord"));
        assert_eq!(dealer.rating_count, Some(142));
    }

    #[test]
    fn test_normalize_leaves_unparseable_absent() {
        let mut raw = RawFieldMap::new("https://example.com/offers/x");
        raw.set("title", "X".into());
        raw.set("price", "Price on request".into());

        let record = normalize(&raw);
        let price = record.price.unwrap();
        assert_eq!(price.display, "Price on request");
        assert_eq!(price.amount, None);
        assert!(record.mileage.is_none());
        assert!(record.seats_num.is_none());
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut raw = RawFieldMap::new("https://example.com/offers/y");
        raw.set("title", "Y".into());
        raw.set("price", "€ 9,900".into());
        raw.set_list("safety", vec!["ABS".into(), "ESP".into()]);

        let a = normalize(&raw);
        let b = normalize(&raw);
        assert_eq!(a, b);
    }
}
