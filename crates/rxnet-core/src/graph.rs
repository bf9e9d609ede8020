// SPDX-License-Identifier: Apache-2.0
//! Species graphs: arena-addressed complexes of molecule instances.
//!
//! All transforming operations are value-producing. A matched species is
//! never mutated in place: callers clone, edit the owned clone, and hand the
//! result on. Nodes are addressed by small integer ids local to one arena,
//! so clone/merge/split are O(graph size) and alias-free.
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::decl::{Compartment, DeclarationError, TypeTable};
use crate::ident::{MolIdx, Site, TypeId};
use crate::pattern::{BondPat, PatternGraph};

/// One molecule instance inside a species graph.
///
/// `states` and `partners` are parallel to the declared component slots of
/// `ty`. Bond symmetry is maintained by the owning graph: if slot `a` names
/// `b` as partner then `b` names `a`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Molecule {
    /// Declared molecule type.
    pub ty: TypeId,
    /// Per-slot state index into the declared allowed set (`None` for
    /// stateless slots).
    pub states: SmallVec<[Option<u16>; 4]>,
    pub(crate) partners: SmallVec<[Option<Site>; 4]>,
}

/// A complex: molecule instances joined by symmetric bonds, plus an optional
/// compartment tag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpeciesGraph {
    /// Molecule arena.
    pub molecules: Vec<Molecule>,
    /// Optional compartment tag.
    pub compartment: Option<Compartment>,
}

impl SpeciesGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiates a concrete graph from a fully specified pattern, filling
    /// defaults where the pattern under-specifies: omitted components are
    /// unbound and take the first declared state.
    ///
    /// # Errors
    /// [`DeclarationError::NonConcreteSeed`] when the pattern carries a
    /// wildcard bond (`!+`/`!?`); label pairing errors surface as the same
    /// variant since a dangling label cannot be instantiated either.
    pub fn from_pattern(types: &TypeTable, pattern: &PatternGraph) -> Result<Self, DeclarationError> {
        let mut graph = Self { molecules: Vec::new(), compartment: pattern.compartment };
        // Written component -> physical slot, resolved per molecule by
        // consuming group slots in declaration order.
        let mut site_of: FxHashMap<(u32, u32), Site> = FxHashMap::default();
        for (pm_idx, pm) in pattern.molecules.iter().enumerate() {
            let mol = MolIdx(u32::try_from(graph.molecules.len()).unwrap_or(u32::MAX));
            let slots = types.slot_count(pm.ty);
            let mut m = Molecule {
                ty: pm.ty,
                states: (0..slots).map(|s| types.default_state(pm.ty, s)).collect(),
                partners: (0..slots).map(|_| None).collect(),
            };
            let mut used: SmallVec<[u16; 4]> = SmallVec::new();
            for (pc_idx, pc) in pm.comps.iter().enumerate() {
                match pc.bond {
                    BondPat::Any | BondPat::Bound => {
                        return Err(DeclarationError::NonConcreteSeed);
                    }
                    BondPat::Free | BondPat::Labeled(_) => {}
                }
                let slot = types
                    .group_slots(pm.ty, pc.group)
                    .into_iter()
                    .find(|s| !used.contains(s))
                    .ok_or(DeclarationError::NonConcreteSeed)?;
                used.push(slot);
                if let Some(state) = pc.state {
                    m.states[slot as usize] = Some(state);
                }
                site_of.insert(
                    (
                        u32::try_from(pm_idx).unwrap_or(u32::MAX),
                        u32::try_from(pc_idx).unwrap_or(u32::MAX),
                    ),
                    Site::new(mol, slot),
                );
            }
            graph.molecules.push(m);
        }
        let bonds = pattern.bonds().map_err(|_| DeclarationError::NonConcreteSeed)?;
        for (a, b) in bonds {
            let sa = site_of[&(a.mol, a.comp)];
            let sb = site_of[&(b.mol, b.comp)];
            graph.form_bond(sa, sb)?;
        }
        Ok(graph)
    }

    /// Number of molecule instances.
    pub fn molecule_count(&self) -> usize {
        self.molecules.len()
    }

    /// Count of instances of one molecule type.
    pub fn count_of_type(&self, ty: TypeId) -> usize {
        self.molecules.iter().filter(|m| m.ty == ty).count()
    }

    /// Per-type instance counts.
    pub fn type_counts(&self) -> FxHashMap<TypeId, usize> {
        let mut out = FxHashMap::default();
        for m in &self.molecules {
            *out.entry(m.ty).or_insert(0) += 1;
        }
        out
    }

    /// Bond partner of a site, when bound.
    pub fn partner(&self, site: Site) -> Option<Site> {
        self.molecules[site.mol.0 as usize].partners[site.slot as usize]
    }

    /// State of a site.
    pub fn state(&self, site: Site) -> Option<u16> {
        self.molecules[site.mol.0 as usize].states[site.slot as usize]
    }

    /// Sets the state of a site.
    pub fn set_state(&mut self, site: Site, state: u16) {
        self.molecules[site.mol.0 as usize].states[site.slot as usize] = Some(state);
    }

    /// Forms a bond between two free sites.
    ///
    /// # Errors
    /// [`DeclarationError::BondMultiplicity`] when either endpoint is
    /// already bound.
    pub fn form_bond(&mut self, a: Site, b: Site) -> Result<(), DeclarationError> {
        for site in [a, b] {
            if self.partner(site).is_some() {
                let ty = self.molecules[site.mol.0 as usize].ty;
                return Err(DeclarationError::BondMultiplicity {
                    ty: format!("type#{}", ty.0),
                    slot: site.slot,
                });
            }
        }
        self.molecules[a.mol.0 as usize].partners[a.slot as usize] = Some(b);
        self.molecules[b.mol.0 as usize].partners[b.slot as usize] = Some(a);
        Ok(())
    }

    /// Breaks the bond at `site`, if any, clearing both endpoints.
    pub fn break_bond(&mut self, site: Site) {
        if let Some(p) = self.partner(site) {
            self.molecules[p.mol.0 as usize].partners[p.slot as usize] = None;
            self.molecules[site.mol.0 as usize].partners[site.slot as usize] = None;
        }
    }

    /// Merges `other` into a copy of `self`, returning the merged graph and
    /// the index offset applied to `other`'s molecules.
    pub fn merge(&self, other: &Self) -> (Self, u32) {
        let mut merged = self.clone();
        let offset = u32::try_from(merged.molecules.len()).unwrap_or(u32::MAX);
        for m in &other.molecules {
            let mut m = m.clone();
            for p in &mut m.partners {
                if let Some(site) = p {
                    site.mol = MolIdx(site.mol.0 + offset);
                }
            }
            merged.molecules.push(m);
        }
        // A merged compartment only survives when unambiguous.
        if merged.compartment != other.compartment {
            merged.compartment = None;
        }
        (merged, offset)
    }

    /// Molecules reachable from `start` over bonds, ascending.
    pub fn connected_from(&self, start: MolIdx) -> Vec<MolIdx> {
        let mut seen = vec![false; self.molecules.len()];
        let mut stack = vec![start];
        seen[start.0 as usize] = true;
        let mut out = Vec::new();
        while let Some(cur) = stack.pop() {
            out.push(cur);
            for p in &self.molecules[cur.0 as usize].partners {
                if let Some(site) = p {
                    if !seen[site.mol.0 as usize] {
                        seen[site.mol.0 as usize] = true;
                        stack.push(site.mol);
                    }
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Returns a copy of the graph with `doomed` molecules removed, along
    /// with the old-index → new-index map. Bonds into the doomed set are
    /// severed.
    pub fn without(&self, doomed: &[MolIdx]) -> (Self, FxHashMap<MolIdx, MolIdx>) {
        let doomed_set: Vec<bool> = {
            let mut v = vec![false; self.molecules.len()];
            for d in doomed {
                v[d.0 as usize] = true;
            }
            v
        };
        let mut remap: FxHashMap<MolIdx, MolIdx> = FxHashMap::default();
        let mut out = Self { molecules: Vec::new(), compartment: self.compartment };
        for (idx, m) in self.molecules.iter().enumerate() {
            if doomed_set[idx] {
                continue;
            }
            remap.insert(
                MolIdx(u32::try_from(idx).unwrap_or(u32::MAX)),
                MolIdx(u32::try_from(out.molecules.len()).unwrap_or(u32::MAX)),
            );
            out.molecules.push(m.clone());
        }
        for m in &mut out.molecules {
            for p in &mut m.partners {
                *p = match p {
                    Some(site) => remap.get(&site.mol).map(|nm| Site::new(*nm, site.slot)),
                    None => None,
                };
            }
        }
        (out, remap)
    }

    /// Splits the graph into its connected components.
    ///
    /// Each returned entry pairs the component graph with the original
    /// molecule indices it was built from, in ascending order. Components
    /// are yielded in order of their smallest original index, so the split
    /// is deterministic.
    pub fn split(&self) -> Vec<(Self, Vec<MolIdx>)> {
        let mut assigned = vec![false; self.molecules.len()];
        let mut out = Vec::new();
        for start in 0..self.molecules.len() {
            if assigned[start] {
                continue;
            }
            let members = self.connected_from(MolIdx(u32::try_from(start).unwrap_or(u32::MAX)));
            for m in &members {
                assigned[m.0 as usize] = true;
            }
            let mut remap: FxHashMap<MolIdx, MolIdx> = FxHashMap::default();
            for (new_idx, old) in members.iter().enumerate() {
                remap.insert(*old, MolIdx(u32::try_from(new_idx).unwrap_or(u32::MAX)));
            }
            let mut graph = Self { molecules: Vec::new(), compartment: self.compartment };
            for old in &members {
                let mut m = self.molecules[old.0 as usize].clone();
                for p in &mut m.partners {
                    if let Some(site) = p {
                        *p = Some(Site::new(remap[&site.mol], site.slot));
                    }
                }
                graph.molecules.push(m);
            }
            out.push((graph, members));
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::decl::ComponentDecl;
    use crate::ident::BondLabel;

    fn table() -> TypeTable {
        let mut t = TypeTable::new();
        t.declare("A", vec![ComponentDecl::site("a"), ComponentDecl::site("b")]).unwrap();
        t.declare("B", vec![ComponentDecl::with_states("s", &["U", "P"])]).unwrap();
        t
    }

    fn dimer(types: &TypeTable) -> SpeciesGraph {
        let mut p = PatternGraph::new();
        let m0 = p.add_molecule(types, "A").unwrap();
        let m1 = p.add_molecule(types, "A").unwrap();
        p.component(types, m0, "b", None, BondPat::Labeled(BondLabel(1))).unwrap();
        p.component(types, m1, "a", None, BondPat::Labeled(BondLabel(1))).unwrap();
        SpeciesGraph::from_pattern(types, &p).unwrap()
    }

    #[test]
    fn from_pattern_fills_defaults() {
        let t = table();
        let mut p = PatternGraph::new();
        p.add_molecule(&t, "B").unwrap();
        let g = SpeciesGraph::from_pattern(&t, &p).unwrap();
        // Omitted stateful component takes the first declared state.
        assert_eq!(g.molecules[0].states[0], Some(0));
        assert_eq!(g.partner(Site::new(MolIdx(0), 0)), None);
    }

    #[test]
    fn from_pattern_rejects_wildcards() {
        let t = table();
        let mut p = PatternGraph::new();
        let m = p.add_molecule(&t, "A").unwrap();
        p.component(&t, m, "a", None, BondPat::Bound).unwrap();
        assert!(matches!(
            SpeciesGraph::from_pattern(&t, &p),
            Err(DeclarationError::NonConcreteSeed)
        ));
    }

    #[test]
    fn bonds_are_symmetric() {
        let t = table();
        let g = dimer(&t);
        let a = Site::new(MolIdx(0), 1);
        let b = Site::new(MolIdx(1), 0);
        assert_eq!(g.partner(a), Some(b));
        assert_eq!(g.partner(b), Some(a));
    }

    #[test]
    fn double_bond_on_one_slot_rejected() {
        let t = table();
        let mut g = dimer(&t);
        let err = g.form_bond(Site::new(MolIdx(0), 1), Site::new(MolIdx(1), 1));
        assert!(matches!(err, Err(DeclarationError::BondMultiplicity { .. })));
    }

    #[test]
    fn split_after_break_yields_two_components() {
        let t = table();
        let mut g = dimer(&t);
        g.break_bond(Site::new(MolIdx(0), 1));
        let parts = g.split();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|(g, _)| g.molecule_count() == 1));
    }

    #[test]
    fn merge_offsets_partner_indices() {
        let t = table();
        let d = dimer(&t);
        let (merged, offset) = d.merge(&d);
        assert_eq!(offset, 2);
        assert_eq!(merged.molecule_count(), 4);
        assert_eq!(
            merged.partner(Site::new(MolIdx(2), 1)),
            Some(Site::new(MolIdx(3), 0))
        );
    }

    #[test]
    fn without_severs_and_remaps() {
        let t = table();
        let g = dimer(&t);
        let (rest, remap) = g.without(&[MolIdx(0)]);
        assert_eq!(rest.molecule_count(), 1);
        assert_eq!(remap[&MolIdx(1)], MolIdx(0));
        assert_eq!(rest.partner(Site::new(MolIdx(0), 0)), None);
    }
}
