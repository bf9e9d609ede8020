//! Identifier newtypes and hashing utilities.
use blake3::Hasher;

/// Canonical 256-bit digest used for species identity.
pub type Hash = [u8; 32];

/// Strongly typed index of a declared molecule type in the [`crate::decl::TypeTable`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TypeId(pub u32);

/// Index of a molecule instance within one species-graph arena.
///
/// `MolIdx` values are local to a single [`crate::graph::SpeciesGraph`]; they
/// are never stable across clone/merge/split and must not be stored outside
/// the graph that produced them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MolIdx(pub u32);

/// Permanent index of a registered species in the generated network.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SpeciesId(pub u32);

/// Index of a compiled reaction rule.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RuleId(pub u32);

/// Explicit bond label as written in a pattern (the `!1` in `A(b!1)`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BondLabel(pub u32);

/// A bond endpoint: a component slot on a molecule instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Site {
    /// Molecule instance within the owning arena.
    pub mol: MolIdx,
    /// Component slot within the molecule's declared component list.
    pub slot: u16,
}

impl Site {
    /// Convenience constructor.
    pub fn new(mol: MolIdx, slot: u16) -> Self {
        Self { mol, slot }
    }
}

/// Deterministic key identifying a graph's isomorphism class.
///
/// Two species graphs receive equal labels iff they are isomorphic. The label
/// is a BLAKE3 digest over the canonical byte stream produced by
/// [`crate::canonical::canonical_form`]; the stream layout is part of the
/// label's identity and changing it is a breaking change.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CanonicalLabel(pub Hash);

/// Hashes a canonical byte stream into a [`CanonicalLabel`].
pub fn label_from_bytes(bytes: &[u8]) -> CanonicalLabel {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    CanonicalLabel(hasher.finalize().into())
}
