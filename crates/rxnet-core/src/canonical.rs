// SPDX-License-Identifier: Apache-2.0
//! Isomorphism-class canonicalization.
//!
//! Determinism contract
//! - The canonical label is a BLAKE3 digest over a canonical byte stream
//!   encoding the whole graph: compartment tag, molecules in canonical
//!   order, then bonds as a sorted edge list.
//! - Molecule order comes from iterative neighborhood-signature refinement
//!   (type + per-group state multiset seeds, folding sorted neighbor
//!   signatures until stable), with remaining ties broken by a bounded
//!   individualization search that keeps the lexicographically smallest
//!   stream.
//! - Within a molecule, same-named slots are interchangeable; the stream
//!   orders them by (state, bond status, partner position, partner group)
//!   and straightens parallel bonds between tied slot groups, so a slot
//!   permutation never changes the label.
//! - All integers are little-endian with fixed widths. Changing any part of
//!   the stream layout is a breaking change to species identity.
use std::hash::Hasher as _;

use rustc_hash::FxHasher;

use crate::decl::TypeTable;
use crate::graph::SpeciesGraph;
use crate::ident::{label_from_bytes, CanonicalLabel, MolIdx};
use crate::matcher::Embeddings;
use crate::pattern::{BondPat, PatternGraph};

/// Canonical form of a species graph: its label plus the molecule order the
/// label was derived from.
#[derive(Clone, Debug)]
pub struct CanonicalForm {
    /// Isomorphism-class key.
    pub label: CanonicalLabel,
    /// Original molecule indices in canonical order.
    pub order: Vec<MolIdx>,
}

/// Computes the canonical form of `graph`.
pub fn canonical_form(types: &TypeTable, graph: &SpeciesGraph) -> CanonicalForm {
    if graph.molecules.is_empty() {
        let bytes = serialize(types, graph, &[]);
        return CanonicalForm { label: label_from_bytes(&bytes), order: Vec::new() };
    }
    let colors = refine(types, graph, initial_colors(types, graph));
    let (order, bytes) = search_minimal(types, graph, &colors);
    CanonicalForm {
        label: label_from_bytes(&bytes),
        order: order.into_iter().map(MolIdx).collect(),
    }
}

/// Computes only the label.
pub fn canonical_label(types: &TypeTable, graph: &SpeciesGraph) -> CanonicalLabel {
    canonical_form(types, graph).label
}

/// Exact isomorphism check, independent of the label machinery. Used as the
/// strict-mode fallback that guards against canonical-form collisions.
pub fn isomorphic(types: &TypeTable, a: &SpeciesGraph, b: &SpeciesGraph) -> bool {
    if a.molecules.len() != b.molecules.len() || a.compartment != b.compartment {
        return false;
    }
    let exact = exact_pattern(types, a);
    Embeddings::new(types, &exact, b).next().is_some()
}

fn mix(h: &mut FxHasher, v: u64) {
    h.write_u64(v);
}

fn initial_colors(types: &TypeTable, graph: &SpeciesGraph) -> Vec<u64> {
    graph
        .molecules
        .iter()
        .map(|m| {
            let mut h = FxHasher::default();
            mix(&mut h, u64::from(m.ty.0));
            let decl = types.get(m.ty);
            let mut done = vec![false; decl.components.len()];
            for rep in 0..decl.components.len() {
                if done[rep] {
                    continue;
                }
                let rep16 = u16::try_from(rep).unwrap_or(u16::MAX);
                let slots = types.group_slots(m.ty, rep16);
                if slots.first() != Some(&rep16) {
                    continue;
                }
                let mut items: Vec<(u16, bool)> = slots
                    .iter()
                    .map(|&s| {
                        done[s as usize] = true;
                        (
                            m.states[s as usize].unwrap_or(u16::MAX),
                            m.partners[s as usize].is_some(),
                        )
                    })
                    .collect();
                items.sort_unstable();
                mix(&mut h, u64::from(rep16));
                for (state, bound) in items {
                    mix(&mut h, (u64::from(state) << 1) | u64::from(bound));
                }
            }
            h.finish()
        })
        .collect()
}

/// One refinement sweep folds each molecule's sorted bond signatures into
/// its color; sweeps repeat until the partition stops splitting.
fn refine(types: &TypeTable, graph: &SpeciesGraph, mut colors: Vec<u64>) -> Vec<u64> {
    let n = graph.molecules.len();
    for _ in 0..n {
        let mut next = Vec::with_capacity(n);
        for (mi, m) in graph.molecules.iter().enumerate() {
            let mut sigs: Vec<(u16, u16, u64)> = Vec::new();
            for (slot, partner) in m.partners.iter().enumerate() {
                if let Some(p) = partner {
                    let my_group = group_of(types, m.ty, u16::try_from(slot).unwrap_or(u16::MAX));
                    let p_ty = graph.molecules[p.mol.0 as usize].ty;
                    let p_group = group_of(types, p_ty, p.slot);
                    sigs.push((my_group, p_group, colors[p.mol.0 as usize]));
                }
            }
            sigs.sort_unstable();
            let mut h = FxHasher::default();
            mix(&mut h, colors[mi]);
            for (a, b, c) in sigs {
                mix(&mut h, u64::from(a));
                mix(&mut h, u64::from(b));
                mix(&mut h, c);
            }
            next.push(h.finish());
        }
        let stable = partition_size(&colors) == partition_size(&next);
        colors = next;
        if stable {
            break;
        }
    }
    colors
}

fn partition_size(colors: &[u64]) -> usize {
    let mut sorted = colors.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.len()
}

fn group_of(types: &TypeTable, ty: crate::ident::TypeId, slot: u16) -> u16 {
    types.group_slots(ty, slot)[0]
}

/// Bounded backtracking over the residual automorphism group: individualize
/// one member of the first tied cell, re-refine, recurse, and keep the
/// lexicographically smallest serialized stream.
fn search_minimal(
    types: &TypeTable,
    graph: &SpeciesGraph,
    colors: &[u64],
) -> (Vec<u32>, Vec<u8>) {
    let mut indices: Vec<u32> = (0..u32::try_from(colors.len()).unwrap_or(u32::MAX)).collect();
    indices.sort_by_key(|&i| (colors[i as usize], i));

    // Find the first cell (by color order) holding more than one molecule.
    let mut cell: Option<Vec<u32>> = None;
    let mut i = 0;
    while i < indices.len() {
        let c = colors[indices[i] as usize];
        let run: Vec<u32> = indices[i..]
            .iter()
            .take_while(|&&j| colors[j as usize] == c)
            .copied()
            .collect();
        if run.len() > 1 {
            cell = Some(run.clone());
            break;
        }
        i += run.len();
    }

    match cell {
        None => {
            let bytes = serialize(types, graph, &indices);
            (indices, bytes)
        }
        Some(members) => {
            let mut best: Option<(Vec<u32>, Vec<u8>)> = None;
            for m in members {
                let mut branched = colors.to_vec();
                let mut h = FxHasher::default();
                mix(&mut h, branched[m as usize]);
                mix(&mut h, 0x9E37_79B9_7F4A_7C15);
                branched[m as usize] = h.finish();
                let refined = refine(types, graph, branched);
                let candidate = search_minimal(types, graph, &refined);
                let better = match &best {
                    None => true,
                    Some((_, bytes)) => candidate.1 < *bytes,
                };
                if better {
                    best = Some(candidate);
                }
            }
            best.unwrap_or_else(|| {
                let bytes = serialize(types, graph, &indices);
                (indices, bytes)
            })
        }
    }
}

/// Canonical slot output order for one molecule: declaration order between
/// name groups, and within a group by (state, bound, partner position,
/// partner group).
fn slot_order(
    types: &TypeTable,
    graph: &SpeciesGraph,
    mol: u32,
    pos_of: &[u32],
) -> Vec<u16> {
    let m = &graph.molecules[mol as usize];
    let mut slots: Vec<u16> =
        (0..u16::try_from(m.states.len()).unwrap_or(u16::MAX)).collect();
    slots.sort_by_key(|&s| {
        let key_partner = m.partners[s as usize].map_or((u32::MAX, u16::MAX), |p| {
            let p_ty = graph.molecules[p.mol.0 as usize].ty;
            (pos_of[p.mol.0 as usize], group_of(types, p_ty, p.slot))
        });
        (
            group_of(types, m.ty, s),
            m.states[s as usize].unwrap_or(u16::MAX),
            m.partners[s as usize].is_none(),
            key_partner,
            s,
        )
    });
    slots
}

/// Serializes the graph in the given molecule order into the canonical byte
/// stream. `order[pos]` is the original molecule index at canonical
/// position `pos`.
fn serialize(types: &TypeTable, graph: &SpeciesGraph, order: &[u32]) -> Vec<u8> {
    let mut pos_of = vec![0u32; graph.molecules.len()];
    for (pos, &orig) in order.iter().enumerate() {
        pos_of[orig as usize] = u32::try_from(pos).unwrap_or(u32::MAX);
    }

    let mut bytes = Vec::new();
    bytes.extend_from_slice(
        &graph.compartment.map_or(u32::MAX, |c| c.0).to_le_bytes(),
    );
    bytes.extend_from_slice(&(order.len() as u64).to_le_bytes());

    // Per-molecule slot output orders, and the inverse (slot -> out index).
    let mut out_index: Vec<Vec<u16>> = vec![Vec::new(); graph.molecules.len()];
    for &orig in order {
        let slots = slot_order(types, graph, orig, &pos_of);
        let mut inv = vec![0u16; slots.len()];
        for (oi, &s) in slots.iter().enumerate() {
            inv[s as usize] = u16::try_from(oi).unwrap_or(u16::MAX);
        }
        let m = &graph.molecules[orig as usize];
        bytes.extend_from_slice(&m.ty.0.to_le_bytes());
        bytes.extend_from_slice(&(u16::try_from(slots.len()).unwrap_or(u16::MAX)).to_le_bytes());
        for &s in &slots {
            bytes.extend_from_slice(&m.states[s as usize].unwrap_or(u16::MAX).to_le_bytes());
        }
        out_index[orig as usize] = inv;
    }

    // Edge list over (position, out-slot) endpoints, normalized and sorted.
    // Parallel bonds between tied slot groups are straightened: endpoint
    // out-slots within one bundle are re-paired ascending, which maps the
    // graph to an isomorphic one and makes the stream invariant under
    // same-name slot permutations.
    let mut edges: Vec<Edge> = Vec::new();
    for &orig in order {
        let m = &graph.molecules[orig as usize];
        for (slot, partner) in m.partners.iter().enumerate() {
            let Some(p) = partner else { continue };
            let slot16 = u16::try_from(slot).unwrap_or(u16::MAX);
            let a = (pos_of[orig as usize], out_index[orig as usize][slot]);
            let b = (pos_of[p.mol.0 as usize], out_index[p.mol.0 as usize][p.slot as usize]);
            if (a.0, a.1) < (b.0, b.1) {
                let pm = &graph.molecules[p.mol.0 as usize];
                edges.push(Edge {
                    pa: a.0,
                    sa: a.1,
                    pb: b.0,
                    sb: b.1,
                    ga: group_of(types, m.ty, slot16),
                    gb: group_of(types, pm.ty, p.slot),
                    za: m.states[slot].unwrap_or(u16::MAX),
                    zb: pm.states[p.slot as usize].unwrap_or(u16::MAX),
                });
            }
        }
    }
    straighten_bundles(&mut edges);
    edges.sort_unstable_by_key(|e| (e.pa, e.sa, e.pb, e.sb));
    bytes.extend_from_slice(&(edges.len() as u64).to_le_bytes());
    for e in edges {
        bytes.extend_from_slice(&e.pa.to_le_bytes());
        bytes.extend_from_slice(&e.sa.to_le_bytes());
        bytes.extend_from_slice(&e.pb.to_le_bytes());
        bytes.extend_from_slice(&e.sb.to_le_bytes());
    }
    bytes
}

/// A bond in canonical coordinates, with the name group and state of each
/// endpoint.
#[derive(Clone, Copy, Debug)]
struct Edge {
    pa: u32,
    sa: u16,
    pb: u32,
    sb: u16,
    ga: u16,
    gb: u16,
    za: u16,
    zb: u16,
}

/// Re-pairs parallel edges whose endpoints are interchangeable.
///
/// Two edges belong to one bundle when their endpoint molecules, endpoint
/// name groups, and endpoint states all coincide; such slots carry
/// identical sort keys, so pairing the sorted out-slots ascending yields an
/// isomorphic graph with a unique stream. Endpoints distinguished by state
/// land in different bundles and keep their true pairing.
fn straighten_bundles(edges: &mut [Edge]) {
    let mut by_bundle: rustc_hash::FxHashMap<(u32, u16, u16, u32, u16, u16), Vec<usize>> =
        rustc_hash::FxHashMap::default();
    for (i, e) in edges.iter().enumerate() {
        by_bundle.entry((e.pa, e.ga, e.za, e.pb, e.gb, e.zb)).or_default().push(i);
    }
    for (_, members) in by_bundle {
        if members.len() < 2 {
            continue;
        }
        let mut lhs: Vec<u16> = members.iter().map(|&i| edges[i].sa).collect();
        let mut rhs: Vec<u16> = members.iter().map(|&i| edges[i].sb).collect();
        lhs.sort_unstable();
        rhs.sort_unstable();
        let mut sorted_members = members;
        sorted_members.sort_unstable();
        for (k, &i) in sorted_members.iter().enumerate() {
            edges[i].sa = lhs[k];
            edges[i].sb = rhs[k];
        }
    }
}

/// Builds an exact pattern from a concrete graph: every slot written with
/// its state and either its bond label or an explicit-unbound mark. An
/// injective embedding of this pattern into an equal-sized graph is a
/// bijection preserving all structure, i.e. an isomorphism.
fn exact_pattern(types: &TypeTable, graph: &SpeciesGraph) -> PatternGraph {
    use crate::pattern::{PatternComponent, PatternMolecule};
    let mut pattern = PatternGraph::new();
    if let Some(c) = graph.compartment {
        pattern = pattern.in_compartment(c);
    }
    // Assign a label per bond.
    let mut label_of: rustc_hash::FxHashMap<(u32, u16), u32> = rustc_hash::FxHashMap::default();
    let mut next_label = 1u32;
    for (mi, m) in graph.molecules.iter().enumerate() {
        for (slot, partner) in m.partners.iter().enumerate() {
            if let Some(p) = partner {
                let key = (
                    u32::try_from(mi).unwrap_or(u32::MAX),
                    u16::try_from(slot).unwrap_or(u16::MAX),
                );
                if !label_of.contains_key(&key) {
                    label_of.insert(key, next_label);
                    label_of.insert((p.mol.0, p.slot), next_label);
                    next_label += 1;
                }
            }
        }
    }
    for (mi, m) in graph.molecules.iter().enumerate() {
        let mut pm = PatternMolecule { ty: m.ty, comps: smallvec::SmallVec::new() };
        for slot in 0..m.states.len() {
            let slot16 = u16::try_from(slot).unwrap_or(u16::MAX);
            let key = (u32::try_from(mi).unwrap_or(u32::MAX), slot16);
            let bond = label_of
                .get(&key)
                .map_or(BondPat::Free, |l| BondPat::Labeled(crate::ident::BondLabel(*l)));
            pm.comps.push(PatternComponent {
                group: group_of(types, m.ty, slot16),
                state: m.states[slot],
                bond,
            });
        }
        pattern.molecules.push(pm);
    }
    pattern
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
        t.declare("L", vec![ComponentDecl::site("r"), ComponentDecl::site("r")]).unwrap();
        t
    }

    fn chain(types: &TypeTable, len: usize) -> SpeciesGraph {
        // A(b!1).A(a!1,b!2).A(a!2)... linear chain of A molecules.
        let mut p = PatternGraph::new();
        let mols: Vec<u32> =
            (0..len).map(|_| p.add_molecule(types, "A").unwrap()).collect();
        for (i, w) in mols.windows(2).enumerate() {
            let label = BondLabel(u32::try_from(i).unwrap_or(u32::MAX) + 1);
            p.component(types, w[0], "b", None, BondPat::Labeled(label)).unwrap();
            p.component(types, w[1], "a", None, BondPat::Labeled(label)).unwrap();
        }
        SpeciesGraph::from_pattern(types, &p).unwrap()
    }

    #[test]
    fn label_stable_for_same_graph() {
        let t = table();
        let g = chain(&t, 3);
        assert_eq!(canonical_label(&t, &g), canonical_label(&t, &g));
    }

    #[test]
    fn label_invariant_under_molecule_permutation() {
        let t = table();
        let g = chain(&t, 3);
        // Rebuild the same chain with molecules declared in reverse order.
        let mut p = PatternGraph::new();
        let m2 = p.add_molecule(&t, "A").unwrap();
        let m1 = p.add_molecule(&t, "A").unwrap();
        let m0 = p.add_molecule(&t, "A").unwrap();
        p.component(&t, m0, "b", None, BondPat::Labeled(BondLabel(1))).unwrap();
        p.component(&t, m1, "a", None, BondPat::Labeled(BondLabel(1))).unwrap();
        p.component(&t, m1, "b", None, BondPat::Labeled(BondLabel(2))).unwrap();
        p.component(&t, m2, "a", None, BondPat::Labeled(BondLabel(2))).unwrap();
        let g2 = SpeciesGraph::from_pattern(&t, &p).unwrap();
        assert_eq!(canonical_label(&t, &g), canonical_label(&t, &g2));
        assert!(isomorphic(&t, &g, &g2));
    }

    #[test]
    fn distinct_states_get_distinct_labels() {
        let t = table();
        let mut pu = PatternGraph::new();
        let m = pu.add_molecule(&t, "B").unwrap();
        pu.component(&t, m, "s", Some("U"), BondPat::Free).unwrap();
        let gu = SpeciesGraph::from_pattern(&t, &pu).unwrap();
        let mut pp = PatternGraph::new();
        let m = pp.add_molecule(&t, "B").unwrap();
        pp.component(&t, m, "s", Some("P"), BondPat::Free).unwrap();
        let gp = SpeciesGraph::from_pattern(&t, &pp).unwrap();
        assert_ne!(canonical_label(&t, &gu), canonical_label(&t, &gp));
        assert!(!isomorphic(&t, &gu, &gp));
    }

    #[test]
    fn symmetric_slot_choice_does_not_change_label() {
        let t = table();
        // L(r!1,r).A(a!1) vs L(r,r!1).A(a!1): same species, bond through the
        // other symmetric slot.
        let build = |first: bool| {
            let mut p = PatternGraph::new();
            let l = p.add_molecule(&t, "L").unwrap();
            let a = p.add_molecule(&t, "A").unwrap();
            if first {
                p.component(&t, l, "r", None, BondPat::Labeled(BondLabel(1))).unwrap();
                p.component(&t, l, "r", None, BondPat::Free).unwrap();
            } else {
                p.component(&t, l, "r", None, BondPat::Free).unwrap();
                p.component(&t, l, "r", None, BondPat::Labeled(BondLabel(1))).unwrap();
            }
            p.component(&t, a, "a", None, BondPat::Labeled(BondLabel(1))).unwrap();
            SpeciesGraph::from_pattern(&t, &p).unwrap()
        };
        assert_eq!(
            canonical_label(&t, &build(true)),
            canonical_label(&t, &build(false))
        );
    }

    #[test]
    fn chain_and_star_differ() {
        let t = table();
        let g_chain = chain(&t, 3);
        // Same molecule counts, different topology: A(b!1).A(a!1) + free A.
        let mut p = PatternGraph::new();
        let m0 = p.add_molecule(&t, "A").unwrap();
        let m1 = p.add_molecule(&t, "A").unwrap();
        p.add_molecule(&t, "A").unwrap();
        p.component(&t, m0, "b", None, BondPat::Labeled(BondLabel(1))).unwrap();
        p.component(&t, m1, "a", None, BondPat::Labeled(BondLabel(1))).unwrap();
        let g_other = SpeciesGraph::from_pattern(&t, &p).unwrap();
        assert_ne!(canonical_label(&t, &g_chain), canonical_label(&t, &g_other));
    }
}
