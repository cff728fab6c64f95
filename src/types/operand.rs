use serde::{Deserialize, Serialize};

/// Identity of an indirect object in the document's object graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjRef {
    pub num: u32,
    pub gen: u16,
}

impl ObjRef {
    pub fn new(num: u32, gen: u16) -> Self {
        ObjRef { num, gen }
    }
}

/// Resource categories an operator can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    XObject,
    ExtGState,
    Font,
    ColorSpace,
    Pattern,
    Shading,
    Properties,
}

impl ResourceKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            ResourceKind::XObject => 1,
            ResourceKind::ExtGState => 2,
            ResourceKind::Font => 3,
            ResourceKind::ColorSpace => 4,
            ResourceKind::Pattern => 5,
            ResourceKind::Shading => 6,
            ResourceKind::Properties => 7,
        }
    }
}

/// An operator argument or resolved object value.
///
/// Dictionaries keep declaration order; hashing visits keys sorted, so two
/// dictionaries that differ only in key order hash equal.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Name(String),
    Str(Vec<u8>),
    Array(Vec<Operand>),
    Dict(Vec<(String, Operand)>),
    Ref(ObjRef),
    /// A resource named by an operator, looked up in the page's resources.
    Resource(ResourceKind, String),
    /// Stream object: dictionary plus raw, still-encoded bytes.
    Stream {
        dict: Vec<(String, Operand)>,
        raw: Vec<u8>,
    },
}

impl Operand {
    pub fn name(name: impl Into<String>) -> Self {
        Operand::Name(name.into())
    }

    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Operand)>) -> Self {
        Operand::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn stream<K: Into<String>>(
        entries: impl IntoIterator<Item = (K, Operand)>,
        raw: impl Into<Vec<u8>>,
    ) -> Self {
        Operand::Stream {
            dict: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            raw: raw.into(),
        }
    }

    /// Dictionary entries of a dictionary or stream; last duplicate wins on lookup.
    pub fn entries(&self) -> Option<&[(String, Operand)]> {
        match self {
            Operand::Dict(entries) => Some(entries),
            Operand::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Operand> {
        self.entries()?
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Operand::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Int(i) => Some(*i as f64),
            Operand::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Length of the payload carried inline by this operand, if any.
    pub fn inline_len(&self) -> usize {
        match self {
            Operand::Stream { raw, .. } => raw.len(),
            Operand::Str(bytes) => bytes.len(),
            _ => 0,
        }
    }
}
