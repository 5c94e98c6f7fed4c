use once_cell::sync::Lazy;
use regex::Regex;

static KENYAN_MOBILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\+?254|0)?([17]\d{8})$").unwrap());

/// Normalises a Kenyan mobile number to the `2547XXXXXXXX` / `2541XXXXXXXX`
/// form Daraja expects. Spaces, dashes and brackets are ignored.
pub fn normalize_kenyan_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    KENYAN_MOBILE_RE
        .captures(&compact)
        .and_then(|caps| caps.get(1))
        .map(|subscriber| format!("254{}", subscriber.as_str()))
}
