//! Payload and date normalisation.
//!
//! The remote store has answered in several shapes over time: bare arrays,
//! `{ data: [...] }` wrappers, domain-named lists, and dates written as ISO
//! strings, slash dates, epoch milliseconds or regional (ROC) calendar dates.
//! Everything here is total: bad input yields an empty value, never a panic.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde_json::Value;

/// Years between the regional (ROC) calendar and the Gregorian calendar.
pub const ROC_YEAR_OFFSET: i32 = 1911;

const GENERIC_LIST_KEYS: &[&str] = &["data", "items", "list"];
const DOMAIN_LIST_KEYS: &[&str] = &[
    "orders",
    "purchases",
    "products",
    "suppliers",
    "ledger",
    "stockLedger",
    "pickups",
    "records",
];

// ---------------------------------------------------------------------------
// Field fallback chains
// ---------------------------------------------------------------------------

/// Ordered candidate keys for one logical field. The first key that is
/// present (and not null) wins; later keys are only consulted when earlier
/// ones are missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldChain(pub &'static [&'static str]);

impl FieldChain {
    pub fn first<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .find_map(|key| record.get(*key).filter(|v| !v.is_null()))
    }

    /// Numeric value of the first present key, coerced with [`safe_num`].
    pub fn num(&self, record: &Value) -> Option<f64> {
        self.first(record).and_then(safe_num)
    }

    /// First key holding a non-blank string (or a number, rendered).
    pub fn text(&self, record: &Value) -> Option<String> {
        self.0.iter().find_map(|key| match record.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }
}

/// Coerce a loosely typed JSON value into a finite number. Strings have
/// currency symbols, thousands separators and whitespace removed first.
pub fn safe_num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let trimmed = s.trim();
            let trimmed = trimmed.strip_prefix("NT").unwrap_or(trimmed);
            let cleaned: String = trimmed
                .chars()
                .filter(|c| !c.is_whitespace() && !matches!(c, '$' | ',' | '¥' | '€' | '£'))
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

/// Locate the record array inside a remote response. Returns an empty vec
/// when no array can be found.
pub fn normalize_list(response: &Value) -> Vec<Value> {
    if let Value::Array(items) = response {
        return items.clone();
    }
    for key in GENERIC_LIST_KEYS {
        if let Some(Value::Array(items)) = response.get(*key) {
            return items.clone();
        }
    }
    for key in DOMAIN_LIST_KEYS {
        match response.get(*key) {
            Some(Value::Array(items)) => return items.clone(),
            Some(inner) => {
                if let Some(Value::Array(items)) = inner.get("data") {
                    return items.clone();
                }
            }
            None => {}
        }
    }
    Vec::new()
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Today's date in the local calendar, `YYYY-MM-DD`.
pub fn today() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Current local time as `YYYY-MM-DD HH:MM:SS`.
pub fn now_display() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Canonical `YYYY-MM-DD` for a date-like value, resolved in the local
/// calendar. Returns `""` when the value cannot be parsed.
pub fn to_canonical_date(value: &Value) -> String {
    to_canonical_date_in(value, &Local)
}

/// [`to_canonical_date`] against an explicit zone.
pub fn to_canonical_date_in<Tz: TimeZone>(value: &Value, tz: &Tz) -> String {
    parse_date_like(value, tz)
        .map(|dt| dt.date().format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// `YYYY-MM-DD HH:MM:SS` for a date-like value, midnight when the input has
/// no time of day. Returns `""` when the value cannot be parsed.
pub fn to_display_datetime(value: &Value) -> String {
    to_display_datetime_in(value, &Local)
}

pub fn to_display_datetime_in<Tz: TimeZone>(value: &Value, tz: &Tz) -> String {
    parse_date_like(value, tz)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Canonical date for a native chrono timestamp, taken from its own zone's
/// calendar rather than UTC.
pub fn canonical_date_of<Tz: TimeZone>(dt: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    dt.format("%Y-%m-%d").to_string()
}

fn parse_date_like<Tz: TimeZone>(value: &Value, tz: &Tz) -> Option<NaiveDateTime> {
    match value {
        Value::Number(n) => {
            let ms = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            let utc = DateTime::from_timestamp_millis(ms)?;
            Some(utc.with_timezone(tz).naive_local())
        }
        Value::String(s) => parse_date_str(s.trim(), tz),
        _ => None,
    }
}

fn parse_date_str<Tz: TimeZone>(s: &str, tz: &Tz) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }

    // Offset-carrying timestamps are shifted into the local calendar so a
    // late-evening UTC instant does not land on the wrong day.
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(tz).naive_local());
    }

    let (date_part, time_part) = split_date_time(s);
    let date = parse_date_part(date_part)?;
    let time = time_part
        .and_then(parse_time_part)
        .unwrap_or(NaiveTime::MIN);
    Some(NaiveDateTime::new(date, time))
}

fn split_date_time(s: &str) -> (&str, Option<&str>) {
    match s.find(['T', ' ']) {
        Some(idx) => {
            let rest = s[idx + 1..].trim();
            (&s[..idx], (!rest.is_empty()).then_some(rest))
        }
        None => (s, None),
    }
}

fn parse_date_part(s: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = s.split(['-', '/', '.']).collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    if !parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }

    let year_digits = parts[0].len();
    let mut year: i32 = parts[0].parse().ok()?;
    let month: u32 = parts[1].parse().ok()?;
    let day: u32 = parts[2].parse().ok()?;

    match year_digits {
        4 => {}
        1..=3 => year += ROC_YEAR_OFFSET,
        _ => return None,
    }
    if parts[1].len() > 2 || parts[2].len() > 2 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_time_part(s: &str) -> Option<NaiveTime> {
    // Drop fractional seconds and any trailing zone marker.
    let clock: String = s
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ':')
        .collect();
    let mut fields = clock.split(':');
    let h: u32 = fields.next()?.parse().ok()?;
    let m: u32 = fields.next()?.parse().ok()?;
    let sec: u32 = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0);
    NaiveTime::from_hms_opt(h, m, sec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use serde_json::json;

    fn taipei() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_normalize_list_shapes() {
        assert_eq!(normalize_list(&json!([1, 2])).len(), 2);
        assert_eq!(normalize_list(&json!({ "data": [1] })).len(), 1);
        assert_eq!(normalize_list(&json!({ "items": [1, 2, 3] })).len(), 3);
        assert_eq!(normalize_list(&json!({ "list": [] })).len(), 0);
        assert_eq!(normalize_list(&json!({ "stockLedger": [1, 2] })).len(), 2);
        assert_eq!(
            normalize_list(&json!({ "purchases": { "data": [1, 2, 3, 4] } })).len(),
            4
        );
    }

    #[test]
    fn test_normalize_list_never_fails() {
        assert!(normalize_list(&Value::Null).is_empty());
        assert!(normalize_list(&json!("nope")).is_empty());
        assert!(normalize_list(&json!({ "status": "error", "message": "x" })).is_empty());
        assert!(normalize_list(&json!({ "data": { "not": "an array" } })).is_empty());
    }

    #[test]
    fn test_safe_num_strips_formatting() {
        assert_eq!(safe_num(&json!("$1,200")), Some(1200.0));
        assert_eq!(safe_num(&json!(" 42 ")), Some(42.0));
        assert_eq!(safe_num(&json!("NT$ 3,000.5")), Some(3000.5));
        assert_eq!(safe_num(&json!(7)), Some(7.0));
        assert_eq!(safe_num(&json!("")), None);
        assert_eq!(safe_num(&json!("abc")), None);
        assert_eq!(safe_num(&json!(true)), None);
    }

    #[test]
    fn test_field_chain_first_present_wins() {
        let chain = FieldChain(&["price", "unit_price"]);
        assert_eq!(chain.num(&json!({ "price": 5, "unit_price": 9 })), Some(5.0));
        assert_eq!(chain.num(&json!({ "unit_price": 9 })), Some(9.0));
        assert_eq!(chain.num(&json!({ "price": null, "unit_price": 9 })), Some(9.0));
        // A present but unparseable value does not fall through.
        assert_eq!(chain.num(&json!({ "price": "n/a", "unit_price": 9 })), None);

        let ids = FieldChain(&["supplier_ids", "supplier_id"]);
        assert_eq!(
            ids.text(&json!({ "supplier_ids": "  ", "supplier_id": "S1" })),
            Some("S1".to_string())
        );
    }

    #[test]
    fn test_canonical_date_formats() {
        let tz = taipei();
        assert_eq!(to_canonical_date_in(&json!("2024-03-05"), &tz), "2024-03-05");
        assert_eq!(to_canonical_date_in(&json!("2024/3/5"), &tz), "2024-03-05");
        assert_eq!(to_canonical_date_in(&json!("2024/03/05 14:00"), &tz), "2024-03-05");
        assert_eq!(to_canonical_date_in(&json!("113.02.11"), &tz), "2024-02-11");
        assert_eq!(to_canonical_date_in(&json!("113/2/1"), &tz), "2024-02-01");
        assert_eq!(to_canonical_date_in(&json!("99-12-31"), &tz), "2010-12-31");
    }

    #[test]
    fn test_canonical_date_uses_local_calendar() {
        let tz = taipei();
        // 16:30 UTC is already the next day in UTC+8.
        assert_eq!(
            to_canonical_date_in(&json!("2024-03-01T16:30:00Z"), &tz),
            "2024-03-02"
        );
        // No offset: the wall-clock date is kept as written.
        assert_eq!(
            to_canonical_date_in(&json!("2024-03-01T23:59:00"), &tz),
            "2024-03-01"
        );
        // Epoch milliseconds for 2024-03-01T16:30:00Z.
        assert_eq!(to_canonical_date_in(&json!(1_709_310_600_000_i64), &tz), "2024-03-02");
    }

    #[test]
    fn test_canonical_date_rejects_garbage() {
        let tz = taipei();
        assert_eq!(to_canonical_date_in(&json!(""), &tz), "");
        assert_eq!(to_canonical_date_in(&json!("yesterday"), &tz), "");
        assert_eq!(to_canonical_date_in(&json!("2024-13-40"), &tz), "");
        assert_eq!(to_canonical_date_in(&json!(null), &tz), "");
    }

    #[test]
    fn test_display_datetime() {
        let tz = taipei();
        assert_eq!(
            to_display_datetime_in(&json!("2024-03-05"), &tz),
            "2024-03-05 00:00:00"
        );
        assert_eq!(
            to_display_datetime_in(&json!("2024/3/5 9:07"), &tz),
            "2024-03-05 09:07:00"
        );
        assert_eq!(
            to_display_datetime_in(&json!("2024-03-05T08:00:00.000Z"), &tz),
            "2024-03-05 16:00:00"
        );
        assert_eq!(
            to_display_datetime_in(&json!("113.02.11"), &tz),
            "2024-02-11 00:00:00"
        );
        assert_eq!(to_display_datetime_in(&json!("not a date"), &tz), "");
    }

    #[test]
    fn test_canonical_date_of_native() {
        let dt = taipei().with_ymd_and_hms(2024, 3, 2, 0, 15, 0).unwrap();
        assert_eq!(canonical_date_of(&dt), "2024-03-02");
    }
}
