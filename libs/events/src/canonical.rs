//! JSON Canonicalization Scheme (RFC 8785) serialization.
//!
//! Object members are sorted by their UTF-16 code units, numbers use the
//! ECMAScript shortest round-trip form and no whitespace is emitted, so two
//! events with the same field values always produce the same bytes.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::EventError;
use crate::event::Event;

/// Produces the canonical UTF-8 bytes that an event signature covers.
///
/// The `integrityProtection.signature` field is emptied before serialization
/// so the signature never covers itself.
pub fn canonicalize(event: &Event) -> Result<Vec<u8>, EventError> {
    let mut value =
        serde_json::to_value(event).map_err(|e| EventError::Canonicalization(e.to_string()))?;

    if let Some(signature) = value.pointer_mut("/meta/security/integrityProtection/signature") {
        *signature = Value::String(String::new());
    }

    Ok(canonical_json(&value).into_bytes())
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by(|(a, _), (b, _)| utf16_cmp(a, b));
            out.push('{');
            for (i, (k, v)) in pairs.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, k);
                out.push(':');
                write_value(out, v);
            }
            out.push('}');
        }
        Value::Array(arr) => {
            out.push('[');
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, v);
            }
            out.push(']');
        }
        Value::String(s) => write_string(out, s),
        Value::Number(n) => out.push_str(&format_number(n)),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
    }
}

fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) => format_f64(f),
        None => n.to_string(),
    }
}

/// ECMAScript `Number.prototype.toString` for finite doubles.
fn format_f64(f: f64) -> String {
    if f == 0.0 {
        return "0".to_string();
    }

    // `{:e}` yields the shortest round-trip digits, e.g. "-1.25e-7".
    let sci = format!("{:e}", f);
    let (negative, sci) = match sci.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, sci.as_str()),
    };
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let k = digits.len() as i32;
    let n = exponent + 1;

    let body = if k <= n && n <= 21 {
        format!("{}{}", digits, "0".repeat((n - k) as usize))
    } else if 0 < n && n <= 21 {
        let (int, frac) = digits.split_at(n as usize);
        format!("{}.{}", int, frac)
    } else if -6 < n && n <= 0 {
        format!("0.{}{}", "0".repeat((-n) as usize), digits)
    } else {
        let (first, rest) = digits.split_at(1);
        let sign = if n - 1 < 0 { '-' } else { '+' };
        if rest.is_empty() {
            format!("{}e{}{}", first, sign, (n - 1).abs())
        } else {
            format!("{}.{}e{}{}", first, rest, sign, (n - 1).abs())
        }
    };

    if negative {
        format!("-{}", body)
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{event_types, Security, SignatureAlgorithm};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_sorted_keys_no_whitespace() {
        let value = json!({"b": [1, {"z": true, "a": null}], "a": "x"});
        assert_eq!(canonical_json(&value), r#"{"a":"x","b":[1,{"a":null,"z":true}]}"#);
    }

    #[test]
    fn test_utf16_key_order() {
        // U+1F600 is the surrogate pair D83D DE00 in UTF-16, so it sorts
        // before U+E000 there even though UTF-8 byte order says otherwise.
        let value = json!({"\u{e000}": 1, "\u{1f600}": 2});
        assert_eq!(canonical_json(&value), "{\"\u{1f600}\":2,\"\u{e000}\":1}");
    }

    #[test]
    fn test_string_escaping() {
        let value = json!("a\"b\\c\n\u{01}\u{7f}é");
        assert_eq!(canonical_json(&value), "\"a\\\"b\\\\c\\n\\u0001\u{7f}é\"");
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_f64(1.5), "1.5");
        assert_eq!(format_f64(100.0), "100");
        assert_eq!(format_f64(1e21), "1e+21");
        assert_eq!(format_f64(1e-7), "1e-7");
        assert_eq!(format_f64(0.000001), "0.000001");
        assert_eq!(format_f64(-2.5e-8), "-2.5e-8");
        assert_eq!(format_f64(123456.789), "123456.789");
        assert_eq!(canonical_json(&json!(-0.0)), "0");
        assert_eq!(canonical_json(&json!(42)), "42");
    }

    #[test]
    fn test_canonicalize_ignores_existing_signature() {
        let mut event = Event::builder(event_types::ACTIVITY_TRIGGERED, "4.0.0")
            .data(json!({"name": "build"}))
            .build()
            .unwrap();
        event.set_security(Security::unsigned("CN=ci", SignatureAlgorithm::ES256));
        let before = canonicalize(&event).unwrap();

        event.set_signature("c2lnbmF0dXJl");
        let after = canonicalize(&event).unwrap();

        assert_eq!(before, after);
        let text = String::from_utf8(after).unwrap();
        assert!(text.contains("\"signature\":\"\""));
    }

    fn event_with_data(data: serde_json::Value) -> Event {
        Event::builder(event_types::ACTIVITY_TRIGGERED, "4.0.0")
            .id(uuid::Uuid::nil())
            .time(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
            .data(data)
            .build()
            .unwrap()
    }

    proptest! {
        #[test]
        fn prop_insertion_order_does_not_matter(
            entries in proptest::collection::btree_map("[a-zA-Z0-9_]{1,8}", any::<i32>(), 1..12)
        ) {
            let forward: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            let mut backward = serde_json::Map::new();
            for (k, v) in entries.iter().rev() {
                backward.insert(k.clone(), json!(v));
            }

            let a = canonicalize(&event_with_data(serde_json::Value::Object(forward))).unwrap();
            let b = canonicalize(&event_with_data(serde_json::Value::Object(backward))).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_canonical_form_is_valid_json(s in "\\PC*", n in any::<i64>()) {
            let value = json!({"s": s, "n": n});
            let text = canonical_json(&value);
            let reparsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            prop_assert_eq!(reparsed, value);
        }
    }
}
