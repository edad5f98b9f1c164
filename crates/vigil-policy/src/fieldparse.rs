//! Typed field parsers backing the `parse_*` helper family.
//!
//! Each parser takes the resolved input string (plus parser-specific
//! configuration) and returns the typed value to write into the target field,
//! or `None` when the input does not parse. Parsers never touch the event;
//! the builders in [`crate::builders::parse`] own the write-on-success /
//! untouched-on-failure contract.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Map, Value};

/// `true` / `false`, case-insensitive.
pub fn boolean(input: &str) -> Option<bool> {
    if input.eq_ignore_ascii_case("true") {
        Some(true)
    } else if input.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// A base-10 integer within i8 bounds.
pub fn byte(input: &str) -> Option<i64> {
    let n: i64 = input.trim().parse().ok()?;
    if (i8::MIN as i64..=i8::MAX as i64).contains(&n) {
        Some(n)
    } else {
        None
    }
}

/// A base-10 64-bit integer.
pub fn long(input: &str) -> Option<i64> {
    input.trim().parse().ok()
}

/// A finite floating point number.
pub fn float(input: &str) -> Option<f64> {
    let n: f64 = input.trim().parse().ok()?;
    if n.is_finite() {
        Some(n)
    } else {
        None
    }
}

/// A standard-alphabet base64 string. The original string is the value.
pub fn binary(input: &str) -> Option<&str> {
    if input.is_empty() || input.len() % 4 != 0 {
        return None;
    }
    BASE64_STANDARD.decode(input).ok()?;
    Some(input)
}

/// A date/time in the given strftime format, rendered back as
/// `%Y-%m-%dT%H:%M:%S%.3fZ`. Date-only formats yield midnight.
pub fn date(input: &str, format: &str) -> Option<String> {
    let stamp = NaiveDateTime::parse_from_str(input, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(input, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Some(stamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

/// An IPv4 or IPv6 address. The input string is the value.
pub fn ip(input: &str) -> Option<&str> {
    input.parse::<std::net::IpAddr>().ok()?;
    Some(input)
}

/// A URI of the form `scheme://domain[/path][?query][#fragment]`.
///
/// Produces `{original, scheme, domain, path, query?, fragment?}` with the
/// path normalized to `/` when absent.
pub fn uri(input: &str) -> Option<Value> {
    let (scheme, rest) = input.split_once("://")?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
    {
        return None;
    }
    let (rest, fragment) = match rest.split_once('#') {
        Some((r, f)) => (r, Some(f)),
        None => (rest, None),
    };
    let (rest, query) = match rest.split_once('?') {
        Some((r, q)) => (r, Some(q)),
        None => (rest, None),
    };
    let (domain, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if domain.is_empty() {
        return None;
    }

    let mut out = Map::new();
    out.insert(
        "original".into(),
        Value::String(format!("{scheme}://{domain}{path}")),
    );
    out.insert("scheme".into(), Value::String(scheme.to_owned()));
    out.insert("domain".into(), Value::String(domain.to_owned()));
    out.insert("path".into(), Value::String(path.to_owned()));
    if let Some(q) = query {
        out.insert("query".into(), Value::String(q.to_owned()));
    }
    if let Some(f) = fragment {
        out.insert("fragment".into(), Value::String(f.to_owned()));
    }
    Some(Value::Object(out))
}

/// Wrap a user-agent string. Never fails on non-empty input.
pub fn useragent(input: &str) -> Option<Value> {
    if input.is_empty() {
        return None;
    }
    Some(json!({ "user_agent": { "original": input } }))
}

/// A fully qualified domain name: dot-separated labels of alphanumerics and
/// hyphens, at most 255 bytes total.
pub fn fqdn(input: &str) -> Option<&str> {
    if input.is_empty() || input.len() > 255 || !input.contains('.') {
        return None;
    }
    let valid = input.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    });
    if valid {
        Some(input)
    } else {
        None
    }
}

/// A file path, windows or posix. Produces
/// `{drive_letter?, path, name, ext}`.
pub fn file_path(input: &str) -> Option<Value> {
    if input.is_empty() {
        return None;
    }
    let split_at = input.rfind(['\\', '/']);
    let (dir, name) = match split_at {
        Some(idx) => (&input[..idx], &input[idx + 1..]),
        None => ("", input),
    };
    if name.is_empty() {
        return None;
    }
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");

    let mut out = Map::new();
    let bytes = input.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        out.insert(
            "drive_letter".into(),
            Value::String((bytes[0] as char).to_string()),
        );
    }
    out.insert("path".into(), Value::String(dir.to_owned()));
    out.insert("name".into(), Value::String(name.to_owned()));
    out.insert("ext".into(), Value::String(ext.to_owned()));
    Some(Value::Object(out))
}

/// Any valid JSON document.
pub fn json_value(input: &str) -> Option<Value> {
    serde_json::from_str(input).ok()
}

/// One CSV record with double-quote quoting, mapped onto the given column
/// names. The field count must equal the column count. Numeric cells become
/// JSON numbers.
pub fn csv(input: &str, columns: &[String]) -> Option<Value> {
    let fields = split_csv_record(input)?;
    if fields.len() != columns.len() {
        return None;
    }
    let mut out = Map::new();
    for (column, field) in columns.iter().zip(fields) {
        out.insert(column.clone(), coerce_scalar(&field));
    }
    Some(Value::Object(out))
}

fn split_csv_record(input: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut quoted = false;
    loop {
        match chars.next() {
            Some('"') if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    quoted = false;
                }
            }
            Some('"') if current.is_empty() => quoted = true,
            Some(',') if !quoted => {
                fields.push(std::mem::take(&mut current));
            }
            Some(c) => current.push(c),
            None => {
                if quoted {
                    return None; // unterminated quote
                }
                fields.push(current);
                return Some(fields);
            }
        }
    }
}

/// Key/value pairs: `sep` separates a key from its value, `delim` separates
/// pairs, quoted values may contain either. At least one pair is required.
pub fn key_value(
    input: &str,
    sep: &str,
    delim: &str,
    quote: char,
    escape: char,
) -> Option<Value> {
    if sep.is_empty() || delim.is_empty() {
        return None;
    }
    let mut out = Map::new();
    let mut rest = input;
    while !rest.is_empty() {
        let sep_at = rest.find(sep)?;
        let key = &rest[..sep_at];
        if key.is_empty() || key.contains(delim) {
            return None;
        }
        rest = &rest[sep_at + sep.len()..];

        let value;
        if rest.starts_with(quote) {
            let (unquoted, after) = take_quoted(rest, quote, escape)?;
            value = unquoted;
            rest = after;
            if !rest.is_empty() {
                rest = rest.strip_prefix(delim)?;
            }
        } else {
            match rest.find(delim) {
                Some(idx) => {
                    value = rest[..idx].to_owned();
                    rest = &rest[idx + delim.len()..];
                }
                None => {
                    value = rest.to_owned();
                    rest = "";
                }
            }
        }
        out.insert(key.to_owned(), Value::String(value));
    }
    if out.is_empty() {
        return None;
    }
    Some(Value::Object(out))
}

/// A token delimited by `quote`, honoring `escape`. Returns the unescaped
/// content; trailing input after the closing quote is ignored.
pub fn quoted(input: &str, quote: char, escape: char) -> Option<String> {
    let (content, _) = take_quoted(input, quote, escape)?;
    Some(content)
}

fn take_quoted(input: &str, quote: char, escape: char) -> Option<(String, &str)> {
    let mut chars = input.char_indices();
    match chars.next() {
        Some((_, c)) if c == quote => {}
        _ => return None,
    }
    let mut content = String::new();
    while let Some((idx, c)) = chars.next() {
        if c == escape {
            match chars.next() {
                Some((_, escaped)) => content.push(escaped),
                None => return None,
            }
        } else if c == quote {
            return Some((content, &input[idx + c.len_utf8()..]));
        } else {
            content.push(c);
        }
    }
    None // no closing quote
}

/// The substring between an exact prefix and an exact suffix.
pub fn between<'a>(input: &'a str, start: &str, end: &str) -> Option<&'a str> {
    input.strip_prefix(start)?.strip_suffix(end)
}

/// A single-root XML document mapped to JSON: attributes become `@name`
/// keys, text content becomes `#text`, child elements nest by tag.
pub fn xml(input: &str) -> Option<Value> {
    let mut parser = XmlParser { rest: input.trim() };
    parser.skip_prolog();
    let (tag, body) = parser.element()?;
    parser.rest = parser.rest.trim_start();
    if !parser.rest.is_empty() {
        return None;
    }
    let mut out = Map::new();
    out.insert(tag, body);
    Some(Value::Object(out))
}

struct XmlParser<'a> {
    rest: &'a str,
}

impl<'a> XmlParser<'a> {
    fn skip_prolog(&mut self) {
        if let Some(stripped) = self.rest.strip_prefix("<?") {
            if let Some(end) = stripped.find("?>") {
                self.rest = stripped[end + 2..].trim_start();
            }
        }
    }

    fn element(&mut self) -> Option<(String, Value)> {
        self.rest = self.rest.strip_prefix('<')?;
        let name_end = self
            .rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')?;
        let tag = self.rest[..name_end].to_owned();
        if tag.is_empty() {
            return None;
        }
        self.rest = &self.rest[name_end..];

        let mut body = Map::new();
        loop {
            self.rest = self.rest.trim_start();
            if let Some(after) = self.rest.strip_prefix("/>") {
                self.rest = after;
                return Some((tag, Value::Object(body)));
            }
            if let Some(after) = self.rest.strip_prefix('>') {
                self.rest = after;
                break;
            }
            let (attr, value) = self.attribute()?;
            body.insert(format!("@{attr}"), Value::String(value));
        }

        let mut text = String::new();
        loop {
            if self.rest.starts_with("</") {
                let close = self.rest.strip_prefix("</")?;
                let end = close.find('>')?;
                if close[..end].trim() != tag {
                    return None;
                }
                self.rest = &close[end + 1..];
                break;
            }
            if self.rest.starts_with('<') {
                let (child_tag, child_body) = self.element()?;
                body.insert(child_tag, child_body);
            } else {
                let chunk_end = self.rest.find('<')?;
                text.push_str(&unescape_entities(&self.rest[..chunk_end]));
                self.rest = &self.rest[chunk_end..];
            }
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            body.insert("#text".into(), Value::String(trimmed.to_owned()));
        }
        Some((tag, Value::Object(body)))
    }

    fn attribute(&mut self) -> Option<(String, String)> {
        let eq = self.rest.find('=')?;
        let name = self.rest[..eq].trim().to_owned();
        if name.is_empty() || name.contains(['<', '>']) {
            return None;
        }
        self.rest = self.rest[eq + 1..].trim_start();
        let quote = self.rest.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        self.rest = &self.rest[1..];
        let end = self.rest.find(quote)?;
        let value = unescape_entities(&self.rest[..end]);
        self.rest = &self.rest[end + 1..];
        Some((name, value))
    }
}

fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn coerce_scalar(field: &str) -> Value {
    if let Ok(n) = field.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = field.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(field.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_is_case_insensitive() {
        assert_eq!(boolean("true"), Some(true));
        assert_eq!(boolean("FALSE"), Some(false));
        assert_eq!(boolean("invalidValue"), None);
    }

    #[test]
    fn byte_is_bounds_checked() {
        assert_eq!(byte("127"), Some(127));
        assert_eq!(byte("-128"), Some(-128));
        assert_eq!(byte("128"), None);
    }

    #[test]
    fn long_handles_i64_min() {
        assert_eq!(long("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(long("test"), None);
    }

    #[test]
    fn binary_keeps_the_encoded_form() {
        assert_eq!(binary("dGVzdA=="), Some("dGVzdA=="));
        assert_eq!(binary("invalid Value %^&*!@#$%"), None);
    }

    #[test]
    fn date_renders_midnight_for_date_only_formats() {
        assert_eq!(
            date("2019-01-01", "%Y-%m-%d").as_deref(),
            Some("2019-01-01T00:00:00.000Z")
        );
        assert_eq!(date("invalidValue!@#$%", "%Y-%m-%d"), None);
    }

    #[test]
    fn ip_accepts_both_families() {
        assert_eq!(ip("192.168.3.1"), Some("192.168.3.1"));
        assert_eq!(ip("::1"), Some("::1"));
        assert_eq!(ip("999.1.1.1"), None);
    }

    #[test]
    fn uri_normalizes_the_path() {
        let parsed = uri("http://www.example.com").unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({
                "original": "http://www.example.com/",
                "scheme": "http",
                "domain": "www.example.com",
                "path": "/"
            })
        );
        assert_eq!(uri("www_example_com"), None);
    }

    #[test]
    fn fqdn_validates_labels() {
        assert_eq!(fqdn("www.example.com"), Some("www.example.com"));
        assert_eq!(fqdn("www..com"), None);
        assert_eq!(fqdn("-bad.example"), None);
        assert_eq!(fqdn("nodots"), None);
    }

    #[test]
    fn file_path_splits_windows_paths() {
        let parsed = file_path("C:\\Users\\test\\test.txt").unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({
                "drive_letter": "C",
                "path": "C:\\Users\\test",
                "name": "test.txt",
                "ext": "txt"
            })
        );
    }

    #[test]
    fn file_path_splits_posix_paths() {
        let parsed = file_path("/var/log/syslog").unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({
                "path": "/var/log",
                "name": "syslog",
                "ext": ""
            })
        );
    }

    #[test]
    fn csv_coerces_numbers_and_checks_arity() {
        let cols = vec!["field1".to_owned(), "field2".to_owned()];
        assert_eq!(
            csv("test,123", &cols),
            Some(serde_json::json!({"field1": "test", "field2": 123}))
        );
        assert_eq!(csv("test 123 456", &cols), None);
        assert_eq!(
            csv("\"a,b\",2", &cols),
            Some(serde_json::json!({"field1": "a,b", "field2": 2}))
        );
    }

    #[test]
    fn key_value_honors_quotes() {
        let parsed = key_value("key1=value1 key2=\"value two\"", "=", " ", '"', '\\').unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({"key1": "value1", "key2": "value two"})
        );
        assert_eq!(key_value("1234567890", " ", "=", '"', '\\'), None);
    }

    #[test]
    fn quoted_extracts_with_custom_marker() {
        assert_eq!(
            quoted("#test quoted string#", '#', '\\').as_deref(),
            Some("test quoted string")
        );
        assert_eq!(quoted("1234567890", '#', '\\'), None);
        assert_eq!(
            quoted(r#""with \" inside""#, '"', '\\').as_deref(),
            Some("with \" inside")
        );
    }

    #[test]
    fn between_strips_exact_markers() {
        assert_eq!(between("start value end", "start ", " end"), Some("value"));
        assert_eq!(between("1234567890", "start ", " end"), None);
    }

    #[test]
    fn xml_maps_attributes_and_text() {
        let parsed = xml("<test attr=\"123\">value</test>").unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({"test": {"#text": "value", "@attr": "123"}})
        );
    }

    #[test]
    fn xml_nests_children() {
        let parsed = xml("<a><b>x</b></a>").unwrap();
        assert_eq!(parsed, serde_json::json!({"a": {"b": {"#text": "x"}}}));
    }

    #[test]
    fn xml_rejects_mismatched_tags() {
        assert_eq!(xml("<a>x</b>"), None);
        assert_eq!(xml("not xml"), None);
    }
}
