use crate::error::Result;
use crate::tensor::HostTensor;

// Value / ArgTree - Call arguments as a tree of leaves
//
// Model inputs are not a flat list of tensors: a forward pass may take a
// tuple of tensors, a dict of named tensors, a plain int, or None. ArgTree
// keeps that container structure so it can be rebuilt exactly, and offers
// three traversals used by the binder, the batch reshaper and the precision
// normalizer:
//
//   map          - transform every leaf, keep the shape of the tree
//   map_matched  - transform leaves matching a predicate, report whether
//                  anything matched
//   flatten      - leaves in depth-first order, the form handed to the
//                  compiler and runtime
//
// Mappings keep insertion order: the order in which keys were supplied is
// the order in which their leaves are flattened.

/// A leaf argument value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The absent sentinel (`None` in a call signature).
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tensor(HostTensor),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_tensor(&self) -> Option<&HostTensor> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_tensor(self) -> Option<HostTensor> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tensor(_) => "tensor",
        }
    }
}

impl From<HostTensor> for Value {
    fn from(t: HostTensor) -> Self {
        Value::Tensor(t)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// A (possibly nested) call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgTree {
    Leaf(Value),
    Sequence(Vec<ArgTree>),
    Mapping(Vec<(String, ArgTree)>),
}

impl Default for ArgTree {
    fn default() -> Self {
        ArgTree::none()
    }
}

impl ArgTree {
    /// The absent sentinel as a tree.
    pub fn none() -> Self {
        ArgTree::Leaf(Value::None)
    }

    pub fn leaf(v: impl Into<Value>) -> Self {
        ArgTree::Leaf(v.into())
    }

    pub fn sequence(items: impl IntoIterator<Item = ArgTree>) -> Self {
        ArgTree::Sequence(items.into_iter().collect())
    }

    pub fn mapping<K: Into<String>>(entries: impl IntoIterator<Item = (K, ArgTree)>) -> Self {
        ArgTree::Mapping(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Whether this is a bare `None` leaf.
    pub fn is_none(&self) -> bool {
        matches!(self, ArgTree::Leaf(Value::None))
    }

    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            ArgTree::Leaf(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&HostTensor> {
        self.as_leaf().and_then(Value::as_tensor)
    }

    /// Look up a mapping entry by key.
    pub fn get(&self, key: &str) -> Option<&ArgTree> {
        match self {
            ArgTree::Mapping(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Apply `f` to every leaf, rebuilding the same container structure.
    pub fn map<F>(self, f: &mut F) -> Result<ArgTree>
    where
        F: FnMut(Value) -> Result<Value>,
    {
        Ok(match self {
            ArgTree::Leaf(v) => ArgTree::Leaf(f(v)?),
            ArgTree::Sequence(items) => ArgTree::Sequence(
                items
                    .into_iter()
                    .map(|item| item.map(&mut *f))
                    .collect::<Result<_>>()?,
            ),
            ArgTree::Mapping(entries) => ArgTree::Mapping(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k, v.map(&mut *f)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// Apply `f` to the leaves for which `pred` holds; other leaves are kept
    /// as they are. `matched` is set when at least one leaf matched and is
    /// never cleared.
    pub fn map_matched<P, F>(self, pred: &mut P, f: &mut F, matched: &mut bool) -> Result<ArgTree>
    where
        P: FnMut(&Value) -> bool,
        F: FnMut(Value) -> Result<Value>,
    {
        self.map(&mut |v| {
            if pred(&v) {
                *matched = true;
                f(v)
            } else {
                Ok(v)
            }
        })
    }

    /// Visit leaves depth-first, in sequence/insertion order.
    pub fn for_each_leaf<'a>(&'a self, f: &mut impl FnMut(&'a Value)) {
        match self {
            ArgTree::Leaf(v) => f(v),
            ArgTree::Sequence(items) => {
                for item in items {
                    item.for_each_leaf(&mut *f);
                }
            }
            ArgTree::Mapping(entries) => {
                for (_, v) in entries {
                    v.for_each_leaf(&mut *f);
                }
            }
        }
    }

    /// Leaves depth-first, cloned.
    pub fn flatten(&self) -> Vec<Value> {
        let mut out = Vec::new();
        self.for_each_leaf(&mut |v| out.push(v.clone()));
        out
    }

    /// Tensor leaves depth-first.
    pub fn tensors(&self) -> Vec<&HostTensor> {
        let mut out = Vec::new();
        self.for_each_leaf(&mut |v| {
            if let Value::Tensor(t) = v {
                out.push(t);
            }
        });
        out
    }
}

impl From<Value> for ArgTree {
    fn from(v: Value) -> Self {
        ArgTree::Leaf(v)
    }
}

impl From<HostTensor> for ArgTree {
    fn from(t: HostTensor) -> Self {
        ArgTree::Leaf(Value::Tensor(t))
    }
}

impl From<i64> for ArgTree {
    fn from(i: i64) -> Self {
        ArgTree::Leaf(Value::Int(i))
    }
}

impl From<f64> for ArgTree {
    fn from(f: f64) -> Self {
        ArgTree::Leaf(Value::Float(f))
    }
}

impl From<bool> for ArgTree {
    fn from(b: bool) -> Self {
        ArgTree::Leaf(Value::Bool(b))
    }
}

impl From<Vec<ArgTree>> for ArgTree {
    fn from(items: Vec<ArgTree>) -> Self {
        ArgTree::Sequence(items)
    }
}
