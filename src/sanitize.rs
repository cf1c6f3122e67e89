//! Escaping of HTML metacharacters in substitution values, and the
//! inverse applied to final text fragments.
//!
//! Values are escaped *before* tag substitution so that markup inside
//! a value can never be recognized as a tag marker; the literal text
//! surviving substitution is unescaped again afterwards. Only the
//! template's own tags ever reach the scanner unescaped.

use std::borrow::Cow;

use kstring::KString;

use crate::segment::{Value, Values};

/// Replace `&`, `<`, `>`, `"`, `'` with their HTML entities, in a
/// single left-to-right pass (so the `&` of an inserted entity is
/// never escaped a second time). Returns the input unchanged when it
/// contains no metacharacter.
pub fn escape_html(s: &str) -> Cow<'_, str> {
    let needs_escape = |c: char| matches!(c, '&' | '<' | '>' | '"' | '\'');
    let first = match s.find(needs_escape) {
        None => return Cow::Borrowed(s),
        Some(i) => i,
    };
    let mut out = String::with_capacity(s.len() + 8);
    out.push_str(&s[..first]);
    for c in s[first..].chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Inverse of [`escape_html`], single pass. Accepts both `&#39;` and
/// the zero-padded `&#039;` for the apostrophe. Unrecognized entities
/// (and bare `&`) are left alone. Not guaranteed idempotent on text
/// containing nested escape sequences.
pub fn unescape_html(s: &str) -> Cow<'_, str> {
    const ENTITIES: &[(&str, char)] = &[
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&amp;", '&'),
        ("&quot;", '"'),
        ("&#39;", '\''),
        ("&#039;", '\''),
    ];
    let mut out: Option<String> = None;
    let mut rest = s;
    let mut done = 0; // byte offset into s of the start of `rest`
    'scan: while let Some(amp) = rest.find('&') {
        for (entity, c) in ENTITIES {
            if rest[amp..].starts_with(entity) {
                let out = out.get_or_insert_with(
                    || String::with_capacity(s.len()));
                out.push_str(&s[done..done + amp]);
                out.push(*c);
                done += amp + entity.len();
                rest = &s[done..];
                continue 'scan;
            }
        }
        // Not one of ours; keep the '&' literal.
        let out = out.get_or_insert_with(|| String::with_capacity(s.len()));
        out.push_str(&s[done..done + amp + 1]);
        done += amp + 1;
        rest = &s[done..];
    }
    match out {
        None => Cow::Borrowed(s),
        Some(mut out) => {
            out.push_str(&s[done..]);
            Cow::Owned(out)
        }
    }
}

fn sanitize_value<V: Clone>(value: &Value<V>) -> Value<V> {
    match value {
        Value::Text(s) => match escape_html(s.as_str()) {
            Cow::Borrowed(_) => Value::Text(s.clone()),
            Cow::Owned(escaped) => Value::Text(KString::from_string(escaped)),
        },
        Value::List(items) =>
            Value::List(items.iter().map(sanitize_value).collect()),
        Value::Opaque(v) => Value::Opaque(v.clone()),
    }
}

/// Escape HTML metacharacters in every text leaf of `values`,
/// recursing through lists; opaque leaves pass through unchanged.
/// Shape and order are preserved.
pub fn sanitize_values<V: Clone>(values: &Values<V>) -> Values<V> {
    values.iter()
        .map(|(name, value)| (name.clone(), sanitize_value(value)))
        .collect()
}
