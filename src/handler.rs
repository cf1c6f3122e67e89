//! The capability converting a resolved tag span into the caller's
//! output representation.

use std::fmt::Display;

use crate::sanitize::unescape_html;
use crate::segment::{Segment, Values};

/// Turn a resolved tag span into a representation of type `V`. Called
/// once per matched span, innermost spans first, with the span's
/// already-processed contents. Must be pure; the same handler may be
/// invoked from concurrent formatting calls.
pub trait RichHandler<V> {
    fn handle(&self, tag: &str, values: &Values<V>,
              contents: Vec<Segment<V>>) -> V;
}

impl<V, F> RichHandler<V> for F
where F: Fn(&str, &Values<V>, Vec<Segment<V>>) -> V
{
    fn handle(&self, tag: &str, values: &Values<V>,
              contents: Vec<Segment<V>>) -> V {
        self(tag, values, contents)
    }
}

/// The default handler: re-serializes the span to the HTML string
/// `<tag>contents</tag>`, unescaping text fragments and using
/// `Display` for opaque values. The degenerate empty tag name gives
/// `<></>`.
pub struct HtmlTagHandler;

impl<V> RichHandler<V> for HtmlTagHandler
where V: Display + From<String>
{
    fn handle(&self, tag: &str, _values: &Values<V>,
              contents: Vec<Segment<V>>) -> V {
        let mut out = String::new();
        out.push('<');
        out.push_str(tag);
        out.push('>');
        for segment in contents {
            match segment {
                Segment::Text(t) => out.push_str(&unescape_html(t.as_str())),
                Segment::Value(v) => out.push_str(&v.to_string()),
            }
        }
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
        V::from(out)
    }
}
