//! The tag scanner and substituter: finds balanced `<tag>…</tag>`
//! marker pairs in a segment sequence (pairs may span segment
//! boundaries and enclose opaque values) and replaces each with the
//! handler's output, resolving nested tags innermost-first.
//!
//! Syntax is strict: a marker is `<NAME>` or `</NAME>` where `NAME`
//! consists of ASCII letters, `-` and `_` only (possibly empty).
//! Anything else (spaces, attributes, self-closing slashes, digits)
//! makes the candidate literal text, never an error.

use kstring::KString;

use crate::handler::RichHandler;
use crate::sanitize::unescape_html;
use crate::segment::{Segment, Values};

/// Default bound on tag nesting depth, see
/// [`replace_rich_tags_limited`].
pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    /// An opening marker has no matching closing marker in the
    /// remaining input; the whole call fails (no partial result).
    #[error("unbalanced tags: no closing tag found for <{0}>")]
    Unbalanced(KString),
    /// Tag nesting exceeds the configured depth limit. Returned
    /// instead of recursing unbounded on adversarial templates.
    #[error("tags nested deeper than {0} levels")]
    DepthExceeded(usize),
}

fn is_tag_name_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '-' || c == '_'
}

/// A well-formed tag marker found inside one text segment.
#[derive(Debug, PartialEq)]
struct Marker<'t> {
    name: &'t str,
    closing: bool,
    /// Byte offset of the `<`.
    start: usize,
    /// Byte offset just past the `>`.
    end: usize,
}

/// Find the next well-formed marker in `s` at or after byte offset
/// `from`. A `<` opens a candidate (a directly following `/` makes it
/// a closing one); any character outside the name class aborts the
/// candidate, and scanning resumes *after* the offending character —
/// in particular a second `<` inside a candidate does not open a new
/// one (`<<a>` contains no marker).
fn next_marker(s: &str, mut from: usize) -> Option<Marker<'_>> {
    while from < s.len() {
        let start = s[from..].find('<')? + from;
        let closing = s[start + 1..].starts_with('/');
        let name_start = start + 1 + closing as usize;
        let mut resume = name_start;
        for (i, c) in s[name_start..].char_indices() {
            let at = name_start + i;
            if c == '>' {
                return Some(Marker {
                    name: &s[name_start..at],
                    closing,
                    start,
                    end: at + 1,
                });
            }
            if !is_tag_name_char(c) {
                resume = at + c.len_utf8();
                break;
            }
            resume = at + c.len_utf8();
        }
        // Candidate aborted (or the input ended inside it).
        from = resume.max(start + 1);
    }
    None
}

/// A scan position: segment index plus byte offset within that
/// segment (meaningful only for text segments).
#[derive(Debug, Clone, Copy)]
struct Pos {
    seg: usize,
    byte: usize,
}

/// Where a matching closing marker was found.
struct Closing {
    seg: usize,
    /// Byte offset of its `<` within the segment.
    start: usize,
    /// Byte offset just past its `>`.
    end: usize,
}

/// Search forward from `from` for the closing marker matching an
/// already-consumed `<tag>`, counting nesting depth for that same
/// name: further openers increment, closers decrement, the marker
/// bringing the depth to zero is the match. Other names and malformed
/// candidates are skipped; non-text segments are skipped entirely.
fn find_closing<V>(segments: &[Segment<V>], tag: &str, from: Pos)
                   -> Option<Closing> {
    let mut depth: usize = 1;
    let mut byte = from.byte;
    for seg in from.seg..segments.len() {
        if let Segment::Text(s) = &segments[seg] {
            let mut at = byte;
            while let Some(m) = next_marker(s, at) {
                if m.name == tag {
                    if m.closing {
                        depth -= 1;
                        if depth == 0 {
                            return Some(Closing {
                                seg,
                                start: m.start,
                                end: m.end,
                            });
                        }
                    } else {
                        depth += 1;
                    }
                }
                at = m.end;
            }
        }
        byte = 0;
    }
    None
}

fn push_text<V>(out: &mut Vec<Segment<V>>, s: &str) {
    if !s.is_empty() {
        out.push(Segment::Text(KString::from_ref(s)));
    }
}

/// [`replace_rich_tags_limited`] with [`DEFAULT_MAX_DEPTH`].
pub fn replace_rich_tags<V, H>(
    segments: &[Segment<V>],
    values: &Values<V>,
    handler: &H,
) -> Result<Vec<Segment<V>>, TagError>
where V: Clone,
      H: RichHandler<V> + ?Sized,
{
    replace_rich_tags_limited(segments, values, handler, DEFAULT_MAX_DEPTH)
}

/// Replace every balanced tag span in `segments` with the handler's
/// output, innermost tags first. The input is never mutated; the
/// result is a fresh sequence in original order with empty text
/// fragments elided and surviving text fragments unescaped.
///
/// An opening marker without a matching closer fails the whole call
/// with [`TagError::Unbalanced`]; nesting beyond `max_depth` fails
/// with [`TagError::DepthExceeded`]. A closing marker without an
/// opener ends scanning of its segment, which is passed through
/// literally.
pub fn replace_rich_tags_limited<V, H>(
    segments: &[Segment<V>],
    values: &Values<V>,
    handler: &H,
    max_depth: usize,
) -> Result<Vec<Segment<V>>, TagError>
where V: Clone,
      H: RichHandler<V> + ?Sized,
{
    replace_at_depth(segments, values, handler, max_depth, 0)
}

fn replace_at_depth<V, H>(
    segments: &[Segment<V>],
    values: &Values<V>,
    handler: &H,
    max_depth: usize,
    depth: usize,
) -> Result<Vec<Segment<V>>, TagError>
where V: Clone,
      H: RichHandler<V> + ?Sized,
{
    if depth > max_depth {
        return Err(TagError::DepthExceeded(max_depth));
    }
    let mut out: Vec<Segment<V>> = Vec::new();
    let mut seg = 0;
    // Byte offset where the not-yet-emitted part of the current text
    // segment begins.
    let mut byte = 0;
    while seg < segments.len() {
        let s = match &segments[seg] {
            Segment::Value(_) => {
                out.push(segments[seg].clone());
                seg += 1;
                byte = 0;
                continue;
            }
            Segment::Text(s) => s.as_str(),
        };
        let marker = match next_marker(s, byte) {
            Some(m) if !m.closing => m,
            // No marker, or a closing marker with nothing open at
            // this level: the rest of this segment is literal.
            _ => {
                push_text(&mut out, &s[byte..]);
                seg += 1;
                byte = 0;
                continue;
            }
        };
        let closing = find_closing(segments, marker.name,
                                   Pos { seg, byte: marker.end })
            .ok_or_else(|| TagError::Unbalanced(
                KString::from_ref(marker.name)))?;

        push_text(&mut out, &s[byte..marker.start]);

        // Everything strictly between the two markers, empty text
        // fragments dropped, opaque values kept in order.
        let mut contents: Vec<Segment<V>> = Vec::new();
        if closing.seg == seg {
            push_text(&mut contents, &s[marker.end..closing.start]);
        } else {
            push_text(&mut contents, &s[marker.end..]);
            for k in seg + 1..closing.seg {
                match &segments[k] {
                    Segment::Text(t) => push_text(&mut contents, t.as_str()),
                    value => contents.push(value.clone()),
                }
            }
            if let Segment::Text(t) = &segments[closing.seg] {
                push_text(&mut contents, &t[..closing.start]);
            }
        }
        let processed = replace_at_depth(&contents, values, handler,
                                         max_depth, depth + 1)?;
        out.push(Segment::Value(
            handler.handle(marker.name, values, processed)));

        // Continue scanning after the closing marker.
        seg = closing.seg;
        byte = closing.end;
    }

    for segment in &mut out {
        if let Segment::Text(t) = segment {
            let unescaped = match unescape_html(t.as_str()) {
                std::borrow::Cow::Borrowed(_) => None,
                std::borrow::Cow::Owned(u) => Some(u),
            };
            if let Some(u) = unescaped {
                *t = KString::from_string(u);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Value;

    // The node representation used by the original test suite's
    // object handler: { tag, contents }.
    #[derive(Debug, Clone, PartialEq)]
    struct Node {
        tag: KString,
        contents: Vec<Segment<Node>>,
    }

    fn node_handler(tag: &str, _values: &Values<Node>,
                    contents: Vec<Segment<Node>>) -> Node {
        Node {
            tag: KString::from_ref(tag),
            contents,
        }
    }

    fn text(s: &str) -> Segment<Node> {
        Segment::text(s)
    }

    fn node(tag: &str, contents: Vec<Segment<Node>>) -> Segment<Node> {
        Segment::Value(Node {
            tag: KString::from_ref(tag),
            contents,
        })
    }

    fn t(input: &[&str]) -> Result<Vec<Segment<Node>>, TagError> {
        let segments: Vec<Segment<Node>> =
            input.iter().map(|s| Segment::text(s)).collect();
        replace_rich_tags(&segments, &Values::new(), &node_handler)
    }

    #[test]
    fn t_next_marker() {
        assert_eq!(next_marker("no tags", 0), None);
        assert_eq!(next_marker("a <b> c", 0),
                   Some(Marker { name: "b", closing: false,
                                 start: 2, end: 5 }));
        assert_eq!(next_marker("a </b> c", 0),
                   Some(Marker { name: "b", closing: true,
                                 start: 2, end: 6 }));
        assert_eq!(next_marker("<>", 0),
                   Some(Marker { name: "", closing: false,
                                 start: 0, end: 2 }));
        assert_eq!(next_marker("</>", 0),
                   Some(Marker { name: "", closing: true,
                                 start: 0, end: 3 }));
        // Malformed candidates are skipped over.
        assert_eq!(next_marker("<a >x<b>", 0),
                   Some(Marker { name: "b", closing: false,
                                 start: 5, end: 8 }));
        assert_eq!(next_marker("< a>x", 0), None);
        assert_eq!(next_marker("<h1>x", 0), None);
        assert_eq!(next_marker("<br />", 0), None);
        // A '<' inside a candidate does not reopen one.
        assert_eq!(next_marker("<<a>", 0), None);
        assert_eq!(next_marker("a<", 0), None);
        // from-offset is honored.
        assert_eq!(next_marker("<a><b>", 3),
                   Some(Marker { name: "b", closing: false,
                                 start: 3, end: 6 }));
    }

    #[test]
    fn t_no_tags() {
        assert_eq!(t(&["no tags here!"]).unwrap(),
                   vec![text("no tags here!")]);
        assert_eq!(t(&["no", "tags", "here!"]).unwrap(),
                   vec![text("no"), text("tags"), text("here!")]);
    }

    #[test]
    fn t_invalid_tags_are_literal() {
        assert_eq!(t(&["<a >Hello!</a>"]).unwrap(),
                   vec![text("<a >Hello!</a>")]);
        assert_eq!(t(&["< a>Hello!</a>"]).unwrap(),
                   vec![text("< a>Hello!</a>")]);
        assert_eq!(t(&["<a src='hello world'>Hello!</a>"]).unwrap(),
                   vec![text("<a src='hello world'>Hello!</a>")]);
        assert_eq!(t(&["Hello World <br />"]).unwrap(),
                   vec![text("Hello World <br />")]);
        // Digits are not tag name characters.
        assert_eq!(t(&["<h1>Hello!</h1>"]).unwrap(),
                   vec![text("<h1>Hello!</h1>")]);
    }

    #[test]
    fn t_unclosed_tag_fails() {
        assert_eq!(t(&["<a>Hello!"]),
                   Err(TagError::Unbalanced(KString::from_ref("a"))));
        assert_eq!(t(&["<a><b>Hello!</b>"]),
                   Err(TagError::Unbalanced(KString::from_ref("a"))));
    }

    #[test]
    fn t_stray_closer_is_literal() {
        assert_eq!(t(&["Hello!</a>"]).unwrap(),
                   vec![text("Hello!</a>")]);
        // Scanning of the segment stops at the stray closer; the
        // whole rest of the segment stays literal.
        assert_eq!(t(&["</a> <b>x</b>"]).unwrap(),
                   vec![text("</a> <b>x</b>")]);
        // A later segment is scanned normally again.
        assert_eq!(t(&["</a>!", "<b>x</b>"]).unwrap(),
                   vec![text("</a>!"), node("b", vec![text("x")])]);
    }

    #[test]
    fn t_opaque_values_pass_through() {
        let segments: Vec<Segment<Node>> = vec![
            text("no"),
            text("tags"),
            node("q", vec![]),
            text("here!"),
        ];
        let result =
            replace_rich_tags(&segments, &Values::new(), &node_handler)
            .unwrap();
        assert_eq!(result,
                   vec![text("no"), text("tags"),
                        node("q", vec![]), text("here!")]);
    }

    #[test]
    fn t_simple_tag() {
        assert_eq!(t(&["<a>Hello!</a>"]).unwrap(),
                   vec![node("a", vec![text("Hello!")])]);
        assert_eq!(
            t(&["Some Prefix <a>Hello!</a> Some Suffix", "Next Segment"])
                .unwrap(),
            vec![text("Some Prefix "),
                 node("a", vec![text("Hello!")]),
                 text(" Some Suffix"),
                 text("Next Segment")]);
    }

    #[test]
    fn t_tag_spanning_segments() {
        assert_eq!(t(&["<a>Hello", "world</a>"]).unwrap(),
                   vec![node("a", vec![text("Hello"), text("world")])]);
        assert_eq!(
            t(&["Some Prefix <a>Hello", "world</a> Some Suffix",
                "Next Segment"]).unwrap(),
            vec![text("Some Prefix "),
                 node("a", vec![text("Hello"), text("world")]),
                 text(" Some Suffix"),
                 text("Next Segment")]);
        assert_eq!(t(&["<a>Hello", "beautiful", "world</a>"]).unwrap(),
                   vec![node("a", vec![text("Hello"),
                                       text("beautiful"),
                                       text("world")])]);
    }

    #[test]
    fn t_opaque_value_inside_span() {
        let segments: Vec<Segment<Node>> = vec![
            text("<a>Hello, "),
            node("q", vec![]),
            text(" world</a>"),
        ];
        let result =
            replace_rich_tags(&segments, &Values::new(), &node_handler)
            .unwrap();
        assert_eq!(result,
                   vec![node("a", vec![text("Hello, "),
                                       node("q", vec![]),
                                       text(" world")])]);
    }

    #[test]
    fn t_disjoint_tags() {
        assert_eq!(t(&["<a>Hello!</a> <a>Hello 2!</a>"]).unwrap(),
                   vec![node("a", vec![text("Hello!")]),
                        text(" "),
                        node("a", vec![text("Hello 2!")])]);
        assert_eq!(t(&["<a>Hello", "world</a> <a>Hello", " 2!</a>"]).unwrap(),
                   vec![node("a", vec![text("Hello"), text("world")]),
                        text(" "),
                        node("a", vec![text("Hello"), text(" 2!")])]);
        // Adjacent spans with the markers at segment edges; empty
        // fragments around them are elided.
        assert_eq!(
            t(&["<a>Hello", "beautiful", "world</a><a>",
                "Pizza", "is", "good", "</a>"]).unwrap(),
            vec![node("a", vec![text("Hello"), text("beautiful"),
                                text("world")]),
                 node("a", vec![text("Pizza"), text("is"),
                                text("good")])]);
        assert_eq!(
            t(&["Some Prefix <a>Hello", "beautiful", "world</a><a>",
                "Pizza", "is", "good", "</a> Some Suffix",
                "Next Segment"]).unwrap(),
            vec![text("Some Prefix "),
                 node("a", vec![text("Hello"), text("beautiful"),
                                text("world")]),
                 node("a", vec![text("Pizza"), text("is"),
                                text("good")]),
                 text(" Some Suffix"),
                 text("Next Segment")]);
    }

    #[test]
    fn t_nested_tags() {
        assert_eq!(t(&["<a><b>Hello!</b></a>"]).unwrap(),
                   vec![node("a", vec![node("b", vec![text("Hello!")])])]);
        assert_eq!(
            t(&["PreOuter<a>PreInner<b>Hello!</b>PostInner</a>PostOuter"])
                .unwrap(),
            vec![text("PreOuter"),
                 node("a", vec![text("PreInner"),
                                node("b", vec![text("Hello!")]),
                                text("PostInner")]),
                 text("PostOuter")]);
    }

    #[test]
    fn t_nested_same_name() {
        assert_eq!(t(&["<a><a>Hello!</a></a>"]).unwrap(),
                   vec![node("a", vec![node("a", vec![text("Hello!")])])]);
        assert_eq!(
            t(&["PreOuter<a>PreInner<a>Hello!</a>PostInner</a>PostOuter"])
                .unwrap(),
            vec![text("PreOuter"),
                 node("a", vec![text("PreInner"),
                                node("a", vec![text("Hello!")]),
                                text("PostInner")]),
                 text("PostOuter")]);
    }

    #[test]
    fn t_nested_invalid_inner_ignored() {
        assert_eq!(t(&["<a>< b>Hello!</b></a>"]).unwrap(),
                   vec![node("a", vec![text("< b>Hello!</b>")])]);
    }

    #[test]
    fn t_empty_tag_name() {
        assert_eq!(t(&["<>Hello!</>"]).unwrap(),
                   vec![node("", vec![text("Hello!")])]);
    }

    #[test]
    fn t_unescapes_text_fragments() {
        assert_eq!(t(&["5 &lt; 6 <a>&amp;</a>"]).unwrap(),
                   vec![text("5 < 6 "),
                        node("a", vec![text("&")])]);
    }

    #[test]
    fn t_depth_limit() {
        let mut deep = String::new();
        for _ in 0..(DEFAULT_MAX_DEPTH + 2) {
            deep.push_str("<a>");
        }
        deep.push('x');
        for _ in 0..(DEFAULT_MAX_DEPTH + 2) {
            deep.push_str("</a>");
        }
        let segments: Vec<Segment<Node>> = vec![Segment::text(&deep)];
        assert_eq!(
            replace_rich_tags(&segments, &Values::new(), &node_handler),
            Err(TagError::DepthExceeded(DEFAULT_MAX_DEPTH)));
        // A small explicit limit triggers earlier.
        let segments: Vec<Segment<Node>> =
            vec![Segment::text("<a><a>x</a></a>")];
        assert_eq!(
            replace_rich_tags_limited(&segments, &Values::new(),
                                      &node_handler, 1),
            Err(TagError::DepthExceeded(1)));
        assert!(replace_rich_tags_limited(&segments, &Values::new(),
                                          &node_handler, 2).is_ok());
    }

    #[test]
    fn t_values_reach_handler() {
        fn capture(tag: &str, values: &Values<Node>,
                   contents: Vec<Segment<Node>>) -> Node {
            assert_eq!(values.get("who"), Some(&Value::text("world")));
            Node { tag: KString::from_ref(tag), contents }
        }
        let values: Values<Node> = Values::new()
            .with("who", Value::text("world"));
        let segments: Vec<Segment<Node>> = vec![Segment::text("<a>x</a>")];
        let result =
            replace_rich_tags(&segments, &values, &capture).unwrap();
        assert_eq!(result, vec![node("a", vec![text("x")])]);
    }
}
