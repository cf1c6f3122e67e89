//! Rich-tag substitution for ICU-style messages: find balanced
//! `<tag>…</tag>` pairs in interpolated message segments (pairs may
//! cross segment boundaries) and replace them through a
//! caller-supplied handler, with HTML-escaping of substitution values
//! so that value-supplied markup is never mistaken for template
//! markup.

pub mod segment;
pub mod sanitize;
pub mod tags;
pub mod handler;
pub mod rich;

pub use handler::{HtmlTagHandler, RichHandler};
pub use rich::{Interpolate, Origin, PlaceholderInterpolator, RichFormatter};
pub use sanitize::{escape_html, sanitize_values, unescape_html};
pub use segment::{Segment, Value, Values};
pub use tags::{replace_rich_tags, replace_rich_tags_limited,
               TagError, DEFAULT_MAX_DEPTH};
