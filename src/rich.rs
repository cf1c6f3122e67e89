//! The public formatting surface: sanitize the values, run the
//! (pluggable) interpolation step, then substitute rich tags.

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use kstring::KString;

use crate::handler::{HtmlTagHandler, RichHandler};
use crate::sanitize::sanitize_values;
use crate::segment::{Segment, Value, Values};
use crate::tags::replace_rich_tags;

/// The seam to the upstream message interpolation step (an ICU-style
/// formatter in the original system). Receives the already-sanitized
/// values and returns the flat segment sequence the tag scanner runs
/// over. This crate never parses ICU syntax itself.
pub trait Interpolate<V> {
    fn interpolate(&self, message: &str, values: &Values<V>)
                   -> Vec<Segment<V>>;
}

impl<V, F> Interpolate<V> for F
where F: Fn(&str, &Values<V>) -> Vec<Segment<V>>
{
    fn interpolate(&self, message: &str, values: &Values<V>)
                   -> Vec<Segment<V>> {
        self(message, values)
    }
}

/// A minimal `{name}` substituter, a stand-in for a full ICU message
/// formatter: no plural/select/number syntax, just named placeholders
/// (ASCII alphanumerics and `_`). Unknown or malformed placeholders
/// stay literal. Each substituted value becomes its own segment (or
/// several, for list values), never merged into surrounding text.
pub struct PlaceholderInterpolator;

fn is_placeholder_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<V: Clone> Interpolate<V> for PlaceholderInterpolator {
    fn interpolate(&self, message: &str, values: &Values<V>)
                   -> Vec<Segment<V>> {
        let mut out: Vec<Segment<V>> = Vec::new();
        let mut done = 0; // byte offset up to which output was emitted
        let mut from = 0;
        while let Some(open) =
            message[from..].find('{').map(|i| i + from)
        {
            let name_start = open + 1;
            let mut close = None;
            for (i, c) in message[name_start..].char_indices() {
                if c == '}' {
                    close = Some(name_start + i);
                    break;
                }
                if !is_placeholder_char(c) {
                    break;
                }
            }
            match close {
                Some(close) if close > name_start => {
                    let name = &message[name_start..close];
                    if let Some(value) = values.get(name) {
                        if open > done {
                            out.push(Segment::text(&message[done..open]));
                        }
                        value.flatten_into(&mut out);
                        done = close + 1;
                        from = done;
                    } else {
                        from = close + 1;
                    }
                }
                // `{}`, an unterminated `{`, or a disallowed name
                // character: literal text.
                _ => {
                    from = open + 1;
                }
            }
        }
        if done < message.len() {
            out.push(Segment::text(&message[done..]));
        }
        out
    }
}

/// Whether a result position carries template-authored content or
/// content supplied through the values map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Template,
    Value,
}

static ORIGIN_MARKER_SEQ: AtomicU64 = AtomicU64::new(0);

/// A token guaranteed distinct from any real input: process id plus a
/// process-local counter, wrapped in private-use-area characters.
/// Fresh per call, never derived from the input.
fn fresh_origin_marker() -> KString {
    let n = ORIGIN_MARKER_SEQ.fetch_add(1, Ordering::Relaxed);
    KString::from_string(
        format!("\u{e000}origin:{}:{}\u{e000}", process::id(), n))
}

fn sentinel_value<V>(value: &Value<V>, marker: &KString) -> Value<V> {
    match value {
        Value::Text(_) | Value::Opaque(_) => Value::Text(marker.clone()),
        Value::List(items) => Value::List(
            items.iter().map(|item| sentinel_value(item, marker)).collect()),
    }
}

/// Formats messages by sanitizing the values, interpolating them via
/// `I`, and replacing rich tags via `H`. Stateless apart from its two
/// collaborators; every call is independent.
pub struct RichFormatter<I, H> {
    interpolator: I,
    handler: H,
}

impl<I> RichFormatter<I, HtmlTagHandler> {
    /// With the default HTML-string handler.
    pub fn new(interpolator: I) -> Self {
        RichFormatter {
            interpolator,
            handler: HtmlTagHandler,
        }
    }
}

impl<I, H> RichFormatter<I, H> {
    pub fn with_handler(interpolator: I, handler: H) -> Self {
        RichFormatter {
            interpolator,
            handler,
        }
    }

    /// Format `message`: escape HTML metacharacters in the values,
    /// interpolate, substitute rich tags. Value-supplied markup comes
    /// back as literal text, template-authored tags as handler
    /// output.
    pub fn rich<V>(&self, message: &str, values: &Values<V>)
                   -> Result<Vec<Segment<V>>>
    where V: Clone,
          I: Interpolate<V>,
          H: RichHandler<V>,
    {
        let sanitized = sanitize_values(values);
        let segments = self.interpolator.interpolate(message, &sanitized);
        replace_rich_tags(&segments, &sanitized, &self.handler)
            .with_context(|| format!("formatting message {message:?}"))
    }

    /// Like [`RichFormatter::rich`], additionally marking each result
    /// position as template-authored or value-supplied. Runs the
    /// pipeline a second time with every value leaf replaced by a
    /// fresh unique sentinel and compares positions (sanitized values
    /// can never alter the tag structure, so the two runs align).
    /// Fails when they cannot be aligned, which happens when a value
    /// renders to the empty string.
    pub fn rich_with_origins<V>(&self, message: &str, values: &Values<V>)
                                -> Result<Vec<(Segment<V>, Origin)>>
    where V: Clone,
          I: Interpolate<V>,
          H: RichHandler<V>,
    {
        let real = self.rich(message, values)?;

        let marker = fresh_origin_marker();
        let sentinels: Values<V> = values.iter()
            .map(|(name, value)|
                 (name.clone(), sentinel_value(value, &marker)))
            .collect();
        let segments = self.interpolator.interpolate(message, &sentinels);
        let probe = replace_rich_tags(&segments, &sentinels, &self.handler)
            .with_context(|| format!(
                "probing value origins in message {message:?}"))?;

        if probe.len() != real.len() {
            bail!("cannot align origins for message {message:?}: \
                   a value rendering empty changes the result shape");
        }
        Ok(real.into_iter()
           .zip(probe)
           .map(|(segment, probed)| {
               let origin = match &probed {
                   Segment::Text(t) if t == &marker => Origin::Value,
                   _ => Origin::Template,
               };
               (segment, origin)
           })
           .collect())
    }
}
