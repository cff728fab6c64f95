use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::config::RetainConfig;
use crate::hash::digest::{tag, DigestWriter};
use crate::hash::resolver::ResourceResolver;
use crate::types::identifiers::ContentHash;
use crate::types::operand::{ObjRef, Operand, ResourceKind};

/// Side effects observed while hashing, consumed by later stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashFacts {
    pub is_form: bool,
    pub is_image: bool,
    pub large_image: bool,
    pub is_pattern: bool,
    pub transparency: bool,
    /// Some part of the value was reached through an indirect reference.
    pub explicit_reference: bool,
    /// The graph had an unexpected shape; whatever depends on it is not cacheable.
    pub malformed: bool,
    /// A construct the engine cannot cache at all (e.g. PostScript XObjects).
    pub unsupported: bool,
    /// Transparency parameters the value sets, for graphics-state dictionaries.
    pub compositing: Compositing,
}

/// Transparency parameters of a graphics-state dictionary. `Some(true)` is a
/// parameter set to something other than opaque, `Some(false)` one reset to
/// opaque, `None` one the dictionary leaves alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compositing {
    pub fill_alpha: Option<bool>,
    pub stroke_alpha: Option<bool>,
    pub blend: Option<bool>,
    pub soft_mask: Option<bool>,
}

impl Compositing {
    /// Apply a later dictionary on top of this one.
    pub fn overlay(&mut self, later: Compositing) {
        self.fill_alpha = later.fill_alpha.or(self.fill_alpha);
        self.stroke_alpha = later.stroke_alpha.or(self.stroke_alpha);
        self.blend = later.blend.or(self.blend);
        self.soft_mask = later.soft_mask.or(self.soft_mask);
    }

    pub fn translucent(&self) -> bool {
        [self.fill_alpha, self.stroke_alpha, self.blend, self.soft_mask]
            .into_iter()
            .any(|param| param == Some(true))
    }
}

impl HashFacts {
    pub fn cacheable(&self) -> bool {
        !self.malformed
    }

    pub fn absorb(&mut self, other: &HashFacts) {
        self.is_form |= other.is_form;
        self.is_image |= other.is_image;
        self.large_image |= other.large_image;
        self.is_pattern |= other.is_pattern;
        self.compositing.overlay(other.compositing);
        self.absorb_nested(other);
    }

    /// Only the flags that stay meaningful when a value is nested in another.
    fn absorb_nested(&mut self, nested: &HashFacts) {
        self.transparency |= nested.transparency;
        self.explicit_reference |= nested.explicit_reference;
        self.malformed |= nested.malformed;
        self.unsupported |= nested.unsupported;
    }

    fn malformed() -> Self {
        HashFacts {
            malformed: true,
            ..HashFacts::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    pub ref_hits: u64,
    pub ref_misses: u64,
    pub resource_hits: u64,
    pub resource_misses: u64,
}

/// How a value is framed inside its parent's digest.
///
/// Scalars are written in place and composites as the digest of their own
/// encoding. An indirect reference takes the framing of the value it resolves
/// to, so `Ref(x)` and `x` contribute identical bytes.
#[derive(Debug, Clone)]
enum Encoded {
    Scalar(Operand),
    Nested(ContentHash),
    Resource(ResourceKind, ContentHash),
    /// Distance back along the resolution stack to the object being revisited.
    BackRef(u32),
}

#[derive(Debug, Clone)]
enum MemoSlot {
    /// On the resolution stack at this position.
    Pending(usize),
    Done(Encoded, HashFacts),
}

/// Hashing state threaded through a job.
///
/// Indirect objects are memoised for the whole job. Resource names are only
/// meaningful against one page's resource dictionary, so that memo is dropped
/// by [`HashContext::begin_page`].
pub struct HashContext {
    refs: HashMap<ObjRef, MemoSlot>,
    resources: HashMap<(ResourceKind, String), (ContentHash, HashFacts)>,
    stack: Vec<ObjRef>,
    lowest_backref: usize,
    large_image_pixels: u64,
    max_depth: usize,
    stats: MemoStats,
}

impl HashContext {
    pub fn new(config: &RetainConfig) -> Self {
        Self::with_limits(config.large_image_pixels, config.max_resource_depth)
    }

    pub fn with_limits(large_image_pixels: u64, max_depth: usize) -> Self {
        HashContext {
            refs: HashMap::new(),
            resources: HashMap::new(),
            stack: Vec::new(),
            lowest_backref: usize::MAX,
            large_image_pixels,
            max_depth,
            stats: MemoStats::default(),
        }
    }

    pub fn begin_page(&mut self) {
        self.resources.clear();
        self.stack.clear();
        self.lowest_backref = usize::MAX;
    }

    pub fn stats(&self) -> MemoStats {
        self.stats
    }

    pub fn memoized_objects(&self) -> usize {
        self.refs.len()
    }

    pub fn hash_operand(
        &mut self,
        resolver: &dyn ResourceResolver,
        operand: &Operand,
    ) -> (ContentHash, HashFacts) {
        let mut w = DigestWriter::new("retain/operand");
        let mut facts = HashFacts::default();
        self.write_operand(resolver, &mut w, operand, &mut facts);
        (w.finish(), facts)
    }

    /// Digest of an operator together with its operands, in order.
    pub fn hash_operator(
        &mut self,
        resolver: &dyn ResourceResolver,
        op: &str,
        operands: &[Operand],
    ) -> (ContentHash, HashFacts) {
        let mut w = DigestWriter::new("retain/operator");
        let mut facts = HashFacts::default();
        w.tag(tag::OPERATOR).bytes(op.as_bytes()).u32(operands.len() as u32);
        for operand in operands {
            self.write_operand(resolver, &mut w, operand, &mut facts);
        }
        (w.finish(), facts)
    }

    /// Digest of a named resource's content. The name itself does not
    /// contribute, so two names bound to identical resources hash equal.
    pub fn hash_resource(
        &mut self,
        resolver: &dyn ResourceResolver,
        kind: ResourceKind,
        name: &str,
    ) -> (ContentHash, HashFacts) {
        if let Some(&memo) = self.resources.get(&(kind, name.to_string())) {
            self.stats.resource_hits += 1;
            return memo;
        }
        self.stats.resource_misses += 1;

        let mut w = DigestWriter::new("retain/resource");
        w.u8(kind.tag());
        let facts = match resolver.resource_lookup(kind, name) {
            None => {
                w.tag(tag::MALFORMED);
                HashFacts::malformed()
            }
            Some(value) => match self.encode(resolver, &value) {
                // Only reachable when a resource is looked up mid-resolution.
                (Encoded::BackRef(_), _) => {
                    w.tag(tag::MALFORMED);
                    HashFacts::malformed()
                }
                (encoded, facts) => {
                    write_encoded(&mut w, &encoded);
                    facts
                }
            },
        };

        let memo = (w.finish(), facts);
        self.resources.insert((kind, name.to_string()), memo);
        memo
    }

    fn write_operand(
        &mut self,
        resolver: &dyn ResourceResolver,
        w: &mut DigestWriter,
        operand: &Operand,
        facts: &mut HashFacts,
    ) {
        if write_scalar(w, operand) {
            return;
        }
        let (encoded, nested) = self.encode(resolver, operand);
        match operand {
            Operand::Resource(..) => facts.absorb(&nested),
            _ => facts.absorb_nested(&nested),
        }
        write_encoded(w, &encoded);
    }

    /// Framing for `value` plus everything learned about it. The facts are
    /// those of the value itself; callers decide how much of them a parent
    /// inherits.
    fn encode(&mut self, resolver: &dyn ResourceResolver, value: &Operand) -> (Encoded, HashFacts) {
        match value {
            Operand::Array(_) | Operand::Dict(_) | Operand::Stream { .. } => {
                let (hash, facts) = self.digest_composite(resolver, value);
                (Encoded::Nested(hash), facts)
            }
            Operand::Ref(reference) => {
                let (encoded, mut facts) = self.resolve_ref(resolver, *reference);
                if !matches!(encoded, Encoded::BackRef(_)) {
                    facts.explicit_reference = true;
                }
                (encoded, facts)
            }
            Operand::Resource(kind, name) => {
                let (hash, facts) = self.hash_resource(resolver, *kind, name);
                (Encoded::Resource(*kind, hash), facts)
            }
            scalar => (Encoded::Scalar(scalar.clone()), HashFacts::default()),
        }
    }

    fn digest_composite(
        &mut self,
        resolver: &dyn ResourceResolver,
        value: &Operand,
    ) -> (ContentHash, HashFacts) {
        let mut w = DigestWriter::new("retain/object");
        let mut nested = HashFacts::default();
        match value {
            Operand::Array(items) => {
                w.tag(tag::ARRAY).u32(items.len() as u32);
                for item in items {
                    self.write_operand(resolver, &mut w, item, &mut nested);
                }
            }
            Operand::Dict(entries) => {
                self.write_dict(resolver, &mut w, entries, &mut nested);
            }
            Operand::Stream { dict, raw } => {
                // Raw (still-filtered) bytes: decoding is not worth the cost.
                w.tag(tag::STREAM);
                self.write_dict(resolver, &mut w, dict, &mut nested);
                w.bytes(raw);
            }
            other => {
                write_scalar(&mut w, other);
            }
        }
        let mut facts = self.classify(resolver, value);
        facts.absorb_nested(&nested);
        (w.finish(), facts)
    }

    fn write_dict(
        &mut self,
        resolver: &dyn ResourceResolver,
        w: &mut DigestWriter,
        entries: &[(String, Operand)],
        facts: &mut HashFacts,
    ) {
        // Canonical order; a later duplicate key replaces an earlier one.
        let mut sorted: BTreeMap<&str, &Operand> = BTreeMap::new();
        for (key, value) in entries {
            sorted.insert(key.as_str(), value);
        }
        w.tag(tag::DICT).u32(sorted.len() as u32);
        for (key, value) in sorted {
            w.bytes(key.as_bytes());
            self.write_operand(resolver, w, value, facts);
        }
    }

    fn resolve_ref(&mut self, resolver: &dyn ResourceResolver, reference: ObjRef) -> (Encoded, HashFacts) {
        match self.refs.get(&reference) {
            Some(MemoSlot::Done(encoded, facts)) => {
                self.stats.ref_hits += 1;
                return (encoded.clone(), *facts);
            }
            Some(MemoSlot::Pending(index)) => {
                let index = *index;
                self.lowest_backref = self.lowest_backref.min(index);
                let distance = (self.stack.len() - index) as u32;
                return (Encoded::BackRef(distance), HashFacts::default());
            }
            None => {}
        }
        self.stats.ref_misses += 1;

        if self.stack.len() >= self.max_depth {
            return (Encoded::Nested(missing_digest()), HashFacts::malformed());
        }
        let Some(value) = resolver.resolve_indirect(reference) else {
            let facts = HashFacts::malformed();
            let encoded = Encoded::Nested(missing_digest());
            self.refs
                .insert(reference, MemoSlot::Done(encoded.clone(), facts));
            return (encoded, facts);
        };

        let index = self.stack.len();
        self.refs.insert(reference, MemoSlot::Pending(index));
        self.stack.push(reference);
        let outer_backref = std::mem::replace(&mut self.lowest_backref, usize::MAX);

        let (encoded, facts) = self.encode(resolver, &value);

        self.stack.pop();
        // A digest that leans on an ancestor further up the stack is only
        // valid in this resolution path and must not be memoised.
        let escaped = self.lowest_backref < index;
        self.lowest_backref = if self.stack.is_empty() {
            usize::MAX
        } else {
            self.lowest_backref.min(outer_backref)
        };
        if escaped {
            self.refs.remove(&reference);
        } else {
            self.refs
                .insert(reference, MemoSlot::Done(encoded.clone(), facts));
        }
        (encoded, facts)
    }

    fn classify(&self, resolver: &dyn ResourceResolver, value: &Operand) -> HashFacts {
        let mut facts = HashFacts::default();
        if value.entries().is_none() {
            return facts;
        }
        let get = |key: &str| self.direct(resolver, value.get(key)?);

        match get("Subtype").as_deref().and_then(Operand::as_name) {
            Some("Form") => facts.is_form = true,
            Some("Image") => {
                facts.is_image = true;
                let width = get("Width").as_deref().and_then(Operand::as_number);
                let height = get("Height").as_deref().and_then(Operand::as_number);
                match (width, height) {
                    (Some(w), Some(h)) if w >= 0.0 && h >= 0.0 => {
                        facts.large_image = w * h > self.large_image_pixels as f64;
                    }
                    _ => facts.malformed = true,
                }
            }
            Some("PS") => facts.unsupported = true,
            _ => {}
        }

        if value.get("PatternType").is_some() {
            facts.is_pattern = true;
        }
        let compositing = &mut facts.compositing;
        if let Some(smask) = get("SMask") {
            compositing.soft_mask = Some(smask.as_name() != Some("None"));
        }
        if let Some(blend) = get("BM") {
            compositing.blend = blend_is_separable_normal(&blend).map(|normal| !normal);
        }
        let alpha = |key: &str| get(key).as_deref().and_then(Operand::as_number).map(|a| a < 1.0);
        compositing.stroke_alpha = alpha("CA");
        compositing.fill_alpha = alpha("ca");
        facts.transparency = facts.compositing.translucent();
        if let Some(group) = get("Group") {
            let kind = group.get("S").and_then(|s| self.direct(resolver, s));
            facts.transparency |= kind.as_deref().and_then(Operand::as_name) == Some("Transparency");
        }
        facts
    }

    /// Follows indirect references until a direct value, giving up at the
    /// resolution depth limit.
    fn direct<'a>(&self, resolver: &dyn ResourceResolver, value: &'a Operand) -> Option<Cow<'a, Operand>> {
        let Operand::Ref(first) = value else {
            return Some(Cow::Borrowed(value));
        };
        let mut reference = *first;
        for _ in 0..self.max_depth {
            match resolver.resolve_indirect(reference)? {
                Operand::Ref(next) => reference = next,
                direct => return Some(Cow::Owned(direct)),
            }
        }
        None
    }
}

/// `Some(true)` for Normal/Compatible, `Some(false)` for any other mode,
/// `None` when the value has no recognisable shape.
fn blend_is_separable_normal(blend: &Operand) -> Option<bool> {
    match blend {
        Operand::Name(name) => Some(name == "Normal" || name == "Compatible"),
        Operand::Array(modes) => modes.first().and_then(blend_is_separable_normal),
        _ => None,
    }
}

/// Writes `operand` in place when it is a scalar. Returns false otherwise.
fn write_scalar(w: &mut DigestWriter, operand: &Operand) -> bool {
    match operand {
        Operand::Null => {
            w.tag(tag::NULL);
        }
        Operand::Bool(b) => {
            w.tag(tag::BOOL).u8(*b as u8);
        }
        Operand::Int(i) => {
            w.tag(tag::INT).i64(*i);
        }
        Operand::Real(r) => {
            w.number(*r);
        }
        Operand::Name(name) => {
            w.tag(tag::NAME).bytes(name.as_bytes());
        }
        Operand::Str(bytes) => {
            w.tag(tag::STRING).bytes(bytes);
        }
        _ => return false,
    }
    true
}

fn write_encoded(w: &mut DigestWriter, encoded: &Encoded) {
    match encoded {
        Encoded::Scalar(value) => {
            write_scalar(w, value);
        }
        Encoded::Nested(hash) => {
            w.tag(tag::NESTED).hash(hash);
        }
        Encoded::Resource(kind, hash) => {
            w.tag(tag::RESOURCE).u8(kind.tag()).hash(hash);
        }
        Encoded::BackRef(distance) => {
            w.tag(tag::BACKREF).u32(*distance);
        }
    }
}

fn missing_digest() -> ContentHash {
    let mut w = DigestWriter::new("retain/missing");
    w.tag(tag::MALFORMED);
    w.finish()
}
