//! Bindable values and the literal syntax they render to.

use indexmap::IndexMap;

use crate::error::{BridgeError, Result};
use crate::reference::RemoteReference;

/// Primitive literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Everything that can be bound to a template placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Bindable {
    Literal(Literal),
    Reference(RemoteReference),
    Sequence(Vec<Bindable>),
    Mapping(IndexMap<String, Bindable>),
}

impl Bindable {
    pub fn null() -> Self {
        Self::Literal(Literal::Null)
    }
}

macro_rules! bindable_from {
    ($($ty:ty => |$v:ident| $lit:expr),* $(,)?) => {
        $(
            impl From<$ty> for Bindable {
                fn from($v: $ty) -> Self {
                    Bindable::Literal($lit)
                }
            }
        )*
    };
}

bindable_from! {
    bool => |v| Literal::Bool(v),
    i32 => |v| Literal::Int(i64::from(v)),
    i64 => |v| Literal::Int(v),
    u32 => |v| Literal::Int(i64::from(v)),
    f32 => |v| Literal::Float(f64::from(v)),
    f64 => |v| Literal::Float(v),
    &str => |v| Literal::Str(v.to_string()),
    String => |v| Literal::Str(v),
    &String => |v| Literal::Str(v.clone()),
    Literal => |v| v,
}

impl From<RemoteReference> for Bindable {
    fn from(r: RemoteReference) -> Self {
        Bindable::Reference(r)
    }
}

impl From<&RemoteReference> for Bindable {
    fn from(r: &RemoteReference) -> Self {
        Bindable::Reference(r.clone())
    }
}

impl<T: Into<Bindable>> From<Vec<T>> for Bindable {
    fn from(items: Vec<T>) -> Self {
        Bindable::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Bindable>> From<Option<T>> for Bindable {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(Bindable::null)
    }
}

impl From<IndexMap<String, Bindable>> for Bindable {
    fn from(map: IndexMap<String, Bindable>) -> Self {
        Bindable::Mapping(map)
    }
}

impl From<serde_json::Value> for Bindable {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Bindable::null(),
            Value::Bool(b) => b.into(),
            Value::Number(n) => match n.as_i64() {
                Some(i) => i.into(),
                None => Bindable::Literal(Literal::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => s.into(),
            Value::Array(items) => Bindable::Sequence(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                Bindable::Mapping(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Placeholder name → value, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings(IndexMap<String, Bindable>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style bind. Rebinding a name replaces the earlier value.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Bindable>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Bindable>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Bindable> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Bindable>> FromIterator<(K, V)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Target-engine literal syntax.
///
/// The renderer walks the value tree; implementations only decide how leaves
/// and collection delimiters look.
pub trait LiteralSyntax: Send + Sync {
    fn literal(&self, literal: &Literal, out: &mut String) -> Result<()>;

    fn sequence(&self, items: Vec<String>, out: &mut String);

    fn mapping(&self, entries: Vec<(&str, String)>, out: &mut String);
}

/// JavaScript-style literals (JSON-compatible).
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptSyntax;

impl ScriptSyntax {
    fn quote(&self, s: &str, out: &mut String) {
        // serde_json escaping is valid JS except for the two line separators
        // that JS string literals may not contain raw.
        let quoted = serde_json::Value::String(s.to_string()).to_string();
        out.push_str(
            &quoted
                .replace('\u{2028}', "\\u2028")
                .replace('\u{2029}', "\\u2029"),
        );
    }
}

impl LiteralSyntax for ScriptSyntax {
    fn literal(&self, literal: &Literal, out: &mut String) -> Result<()> {
        match literal {
            Literal::Null => out.push_str("null"),
            Literal::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Literal::Int(i) => out.push_str(&i.to_string()),
            Literal::Float(f) => {
                let number = serde_json::Number::from_f64(*f).ok_or_else(|| {
                    BridgeError::UnsupportedValue(format!("non-finite float {f}"))
                })?;
                out.push_str(&number.to_string());
            }
            Literal::Str(s) => self.quote(s, out),
        }
        Ok(())
    }

    fn sequence(&self, items: Vec<String>, out: &mut String) {
        out.push('[');
        out.push_str(&items.join(","));
        out.push(']');
    }

    fn mapping(&self, entries: Vec<(&str, String)>, out: &mut String) {
        out.push('{');
        for (i, (key, value)) in entries.into_iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            self.quote(key, out);
            out.push(':');
            out.push_str(&value);
        }
        out.push('}');
    }
}
