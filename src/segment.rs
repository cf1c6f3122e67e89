//! The segment sequence and values map that the tag substitution
//! machinery operates on.

use std::collections::HashMap;

use kstring::KString;

/// One element of a message sequence: either literal text, or an
/// opaque value of the caller's representation type `V` (a number
/// formatted upstream, a handler output, a UI node, ...). Opaque
/// values are never scanned for tag markers.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment<V> {
    Text(KString),
    Value(V),
}

impl<V> Segment<V> {
    pub fn text(s: impl AsRef<str>) -> Self {
        Segment::Text(KString::from_ref(s.as_ref()))
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Segment::Text(_))
    }

    /// The text of a `Text` segment, or None.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text(s) => Some(s.as_str()),
            Segment::Value(_) => None,
        }
    }
}

/// One entry of a [`Values`] map. Lists may nest arbitrarily (but
/// must be finite; cyclic structures cannot be expressed with this
/// type anyway).
#[derive(Debug, Clone, PartialEq)]
pub enum Value<V> {
    Text(KString),
    List(Vec<Value<V>>),
    Opaque(V),
}

impl<V> Value<V> {
    pub fn text(s: impl AsRef<str>) -> Self {
        Value::Text(KString::from_ref(s.as_ref()))
    }

    /// Append this value to `out` as a flat run of segments,
    /// preserving order: text becomes a text segment, an opaque value
    /// a value segment, a list is flattened element-wise. The
    /// counterpart of flattening nested interpolation output before
    /// tag substitution.
    pub fn flatten_into(&self, out: &mut Vec<Segment<V>>)
    where V: Clone
    {
        match self {
            Value::Text(s) => out.push(Segment::Text(s.clone())),
            Value::List(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
            Value::Opaque(v) => out.push(Segment::Value(v.clone())),
        }
    }
}

/// The caller-supplied substitution values, keyed by placeholder
/// name. Created fresh per formatting call; the substitution code
/// never mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct Values<V>(HashMap<KString, Value<V>>);

impl<V> Values<V> {
    pub fn new() -> Self {
        Values(HashMap::new())
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: Value<V>) {
        self.0.insert(KString::from_ref(name.as_ref()), value);
    }

    /// Builder-style `insert`.
    pub fn with(mut self, name: impl AsRef<str>, value: Value<V>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value<V>> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KString, &Value<V>)> {
        self.0.iter()
    }
}

impl<V> Default for Values<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FromIterator<(KString, Value<V>)> for Values<V> {
    fn from_iter<I: IntoIterator<Item = (KString, Value<V>)>>(iter: I) -> Self {
        Values(iter.into_iter().collect())
    }
}
