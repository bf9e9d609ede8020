//! Pattern graphs: partial specifications of complexes used by rules,
//! seeds, and observables.
//!
//! A pattern constrains molecules by type and, per written component, by
//! state and bond status. Components the pattern does not mention are
//! unconstrained. Same-named components are symmetric: a written component
//! binds to *any* of the declared same-named slots, injectively, which is
//! resolved during matching rather than at construction.
use smallvec::SmallVec;

use crate::decl::{Compartment, DeclarationError, TypeTable};
use crate::ident::{BondLabel, TypeId};

/// Bond constraint carried by a written pattern component.
///
/// One closed variant per kind; the matcher is a single exhaustive match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BondPat {
    /// Written without a bond mark: the site must be unbound.
    Free,
    /// `!?` — bound or unbound, don't care.
    Any,
    /// `!+` — must be bound to something.
    Bound,
    /// `!n` — must be bound, and the partner endpoint carries the same label
    /// elsewhere in this pattern graph.
    Labeled(BondLabel),
}

/// One written component constraint inside a pattern molecule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternComponent {
    /// Representative slot of the component's name group (the first declared
    /// slot with this name). Matching assigns group members injectively.
    pub group: u16,
    /// Required state index, or `None` when the pattern leaves it open.
    pub state: Option<u16>,
    /// Bond constraint.
    pub bond: BondPat,
}

/// One molecule node of a pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternMolecule {
    /// Declared molecule type.
    pub ty: TypeId,
    /// Written component constraints, in written order.
    pub comps: SmallVec<[PatternComponent; 4]>,
}

/// A site inside a pattern: molecule node plus index into its written
/// component list (not a physical slot).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatSite {
    /// Pattern molecule index.
    pub mol: u32,
    /// Index into that molecule's written component list.
    pub comp: u32,
}

/// A partial graph over the declared vocabulary.
///
/// Bond labels pair exactly two written components within one pattern graph;
/// patterns joined by `+` in a rule are separate `PatternGraph` values and
/// may match across independent species.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatternGraph {
    /// Molecule nodes.
    pub molecules: Vec<PatternMolecule>,
    /// Optional compartment tag the matched species must carry (and, on the
    /// product side, the tag assigned to the produced species).
    pub compartment: Option<Compartment>,
}

impl PatternGraph {
    /// Creates an empty pattern.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags the pattern with a compartment.
    pub fn in_compartment(mut self, tag: Compartment) -> Self {
        self.compartment = Some(tag);
        self
    }

    /// Appends a molecule node of the named type, returning its index.
    ///
    /// # Errors
    /// [`DeclarationError::UnknownType`] for undeclared names.
    pub fn add_molecule(&mut self, types: &TypeTable, name: &str) -> Result<u32, DeclarationError> {
        let ty = types.lookup(name)?;
        self.molecules.push(PatternMolecule { ty, comps: SmallVec::new() });
        Ok(u32::try_from(self.molecules.len() - 1).unwrap_or(u32::MAX))
    }

    /// Writes a component constraint on molecule `mol`.
    ///
    /// `component` is resolved by name; each call adds one written component
    /// (call twice to constrain two symmetric sites). The written occurrence
    /// count must not exceed the declared same-named slot count.
    ///
    /// # Errors
    /// [`DeclarationError::UnknownComponent`] when the name does not resolve
    /// or the type declares fewer same-named slots than written here;
    /// [`DeclarationError::UnknownState`] for a disallowed state name.
    pub fn component(
        &mut self,
        types: &TypeTable,
        mol: u32,
        component: &str,
        state: Option<&str>,
        bond: BondPat,
    ) -> Result<(), DeclarationError> {
        let ty = self.molecules[mol as usize].ty;
        let group = types.component_slot(ty, component, 0)?;
        let written = self.molecules[mol as usize]
            .comps
            .iter()
            .filter(|c| c.group == group)
            .count();
        // Writing more occurrences than the type declares can never match.
        types.component_slot(ty, component, written)?;
        let state = match state {
            Some(s) => Some(types.state_index(ty, group, s)?),
            None => None,
        };
        self.molecules[mol as usize].comps.push(PatternComponent { group, state, bond });
        Ok(())
    }

    /// Total written components across all molecules.
    pub fn written_len(&self) -> usize {
        self.molecules.iter().map(|m| m.comps.len()).sum()
    }

    /// Resolves labeled bonds into endpoint pairs.
    ///
    /// # Errors
    /// Returns the offending label when it does not appear on exactly two
    /// written components.
    pub fn bonds(&self) -> Result<Vec<(PatSite, PatSite)>, BondLabel> {
        let mut endpoints: Vec<(BondLabel, PatSite)> = Vec::new();
        for (mi, mol) in self.molecules.iter().enumerate() {
            for (ci, comp) in mol.comps.iter().enumerate() {
                if let BondPat::Labeled(label) = comp.bond {
                    endpoints.push((
                        label,
                        PatSite {
                            mol: u32::try_from(mi).unwrap_or(u32::MAX),
                            comp: u32::try_from(ci).unwrap_or(u32::MAX),
                        },
                    ));
                }
            }
        }
        endpoints.sort_by_key(|(label, _)| *label);
        let mut bonds = Vec::new();
        let mut i = 0;
        while i < endpoints.len() {
            let label = endpoints[i].0;
            let run = endpoints[i..].iter().take_while(|(l, _)| *l == label).count();
            if run != 2 {
                return Err(label);
            }
            bonds.push((endpoints[i].1, endpoints[i + 1].1));
            i += 2;
        }
        Ok(bonds)
    }

    /// Adjacency over pattern molecules induced by labeled bonds.
    ///
    /// Used for search ordering; unbalanced labels yield no edges here (they
    /// are rejected separately at rule-compile time).
    pub fn neighbors(&self, mol: u32) -> Vec<u32> {
        let mut out = Vec::new();
        if let Ok(bonds) = self.bonds() {
            for (a, b) in bonds {
                if a.mol == mol && b.mol != mol {
                    out.push(b.mol);
                } else if b.mol == mol && a.mol != mol {
                    out.push(a.mol);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Specificity score of a pattern molecule: how strongly its written
    /// constraints prune the search. Labeled bonds propagate candidates and
    /// score highest.
    pub fn specificity(&self, mol: u32) -> u32 {
        let m = &self.molecules[mol as usize];
        let mut score = 0u32;
        for c in &m.comps {
            score += u32::from(c.state.is_some());
            score += match c.bond {
                BondPat::Labeled(_) => 2,
                BondPat::Free | BondPat::Bound => 1,
                BondPat::Any => 0,
            };
        }
        score
    }
}
