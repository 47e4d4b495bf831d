use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Country (ISO-2, uppercase) to preferred region name, per the fixed routing table.
static REGION_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for country in ["CN", "HK", "TW"] {
        m.insert(country, "asia-east");
    }
    for country in ["JP", "KR"] {
        m.insert(country, "asia-northeast");
    }
    for country in ["SG", "MY", "TH", "ID", "PH", "VN"] {
        m.insert(country, "asia-southeast");
    }
    for country in ["IN", "PK", "BD"] {
        m.insert(country, "asia-south");
    }
    for country in ["US", "CA"] {
        m.insert(country, "us-west");
    }
    for country in ["MX"] {
        m.insert(country, "americas-north");
    }
    for country in ["BR", "AR", "CL"] {
        m.insert(country, "americas-south");
    }
    for country in ["GB", "DE", "FR", "NL", "IT", "ES"] {
        m.insert(country, "europe-west");
    }
    for country in ["PL", "CZ", "RU"] {
        m.insert(country, "europe-east");
    }
    for country in ["AU", "NZ"] {
        m.insert(country, "oceania");
    }
    m
});

/// The sentinel used when a request carries no resolvable country.
pub const UNKNOWN_COUNTRY: &str = "unknown";

/// Looks up the preferred region for an ISO-2 country code (case-insensitive).
pub fn preferred_region(country: &str) -> Option<&'static str> {
    if country.eq_ignore_ascii_case(UNKNOWN_COUNTRY) {
        return None;
    }
    REGION_MAP.get(country.to_ascii_uppercase().as_str()).copied()
}
