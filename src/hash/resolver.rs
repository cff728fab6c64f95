use std::collections::HashMap;

use crate::types::operand::{ObjRef, Operand, ResourceKind};

/// Object-model collaborator consulted while hashing.
///
/// Implementations return `None` for anything they cannot resolve; the hasher
/// treats a missing object as a malformed (non-cacheable) graph, not a failure.
pub trait ResourceResolver {
    fn resolve_indirect(&self, reference: ObjRef) -> Option<Operand>;

    /// Look up a named resource in the current page's resource dictionary.
    fn resource_lookup(&self, kind: ResourceKind, name: &str) -> Option<Operand>;
}

/// Map-backed resolver for callers that already hold the object graph in memory.
#[derive(Debug, Clone, Default)]
pub struct MapResolver {
    objects: HashMap<ObjRef, Operand>,
    resources: HashMap<(ResourceKind, String), Operand>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_object(&mut self, reference: ObjRef, value: Operand) -> &mut Self {
        self.objects.insert(reference, value);
        self
    }

    pub fn insert_resource(
        &mut self,
        kind: ResourceKind,
        name: impl Into<String>,
        value: Operand,
    ) -> &mut Self {
        self.resources.insert((kind, name.into()), value);
        self
    }
}

impl ResourceResolver for MapResolver {
    fn resolve_indirect(&self, reference: ObjRef) -> Option<Operand> {
        self.objects.get(&reference).cloned()
    }

    fn resource_lookup(&self, kind: ResourceKind, name: &str) -> Option<Operand> {
        self.resources.get(&(kind, name.to_string())).cloned()
    }
}
