// SPDX-License-Identifier: Apache-2.0
//! Subgraph pattern matching.
//!
//! [`Embeddings`] lazily yields every injective, structure-preserving map
//! from a pattern's molecule nodes into a target graph. The search is a
//! constraint-propagating backtracking walk over an explicit frame stack —
//! an iterator, not a recursion — so it composes with batching and
//! cooperative cancellation.
//!
//! Matching never mutates its inputs and yields an empty sequence, not an
//! error, when no embedding exists. Structural pattern defects are caught at
//! rule-compile time, before the matcher ever runs.
use smallvec::SmallVec;

use crate::decl::TypeTable;
use crate::graph::SpeciesGraph;
use crate::ident::{MolIdx, Site};
use crate::pattern::{BondPat, PatSite, PatternGraph};

/// Physical slot assignment for one pattern molecule: per written component,
/// the target slot it consumed.
type Assignment = SmallVec<[u16; 4]>;

/// An embedding of a pattern into a target graph.
///
/// `mols[p]` is the target molecule matched by pattern molecule `p`;
/// `sites[p][c]` is the physical slot consumed by the `c`-th written
/// component of pattern molecule `p`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Embedding {
    /// Target molecule per pattern molecule.
    pub mols: Vec<MolIdx>,
    /// Target slot per written pattern component.
    pub sites: Vec<Assignment>,
}

impl Embedding {
    /// Resolves a pattern site to the target site it matched.
    pub fn site(&self, ps: PatSite) -> Site {
        Site::new(self.mols[ps.mol as usize], self.sites[ps.mol as usize][ps.comp as usize])
    }

    /// Sorted target-molecule image, used for automorphism-class collapsing
    /// under MatchOnce.
    pub fn image(&self) -> Vec<MolIdx> {
        let mut image = self.mols.clone();
        image.sort_unstable();
        image
    }
}

struct Frame {
    /// Candidate target molecules for this search position.
    cands: Vec<u32>,
    /// Index of the candidate currently bound (`usize::MAX` before entry).
    cand_i: usize,
    /// Feasible component assignments for the bound candidate.
    assigns: Vec<Assignment>,
    /// Index of the assignment currently bound.
    assign_i: usize,
}

/// Lazy iterator over embeddings of `pattern` in `target`.
pub struct Embeddings<'a> {
    types: &'a TypeTable,
    pattern: &'a PatternGraph,
    target: &'a SpeciesGraph,
    /// Pattern molecules in search order: most-constrained first, then
    /// connected-first so labeled bonds propagate candidates.
    order: Vec<u32>,
    /// Labeled pattern bonds, resolved to written-component endpoints.
    bonds: Vec<(PatSite, PatSite)>,
    frames: Vec<Frame>,
    /// Target molecule per pattern molecule (by pattern index).
    mol_of: Vec<Option<MolIdx>>,
    /// Slot assignment per pattern molecule (by pattern index).
    sites_of: Vec<Assignment>,
    /// Target molecules already consumed (injectivity).
    used: Vec<bool>,
    started: bool,
    done: bool,
}

impl<'a> Embeddings<'a> {
    /// Starts a search. The pattern is expected to be structurally valid
    /// (paired bond labels); an unpairable label yields an empty sequence.
    pub fn new(types: &'a TypeTable, pattern: &'a PatternGraph, target: &'a SpeciesGraph) -> Self {
        let bonds = pattern.bonds().unwrap_or_default();
        let dead = pattern.bonds().is_err()
            || (pattern.compartment.is_some() && pattern.compartment != target.compartment);
        let n = pattern.molecules.len();
        Self {
            types,
            pattern,
            target,
            order: search_order(pattern),
            bonds,
            frames: Vec::with_capacity(n),
            mol_of: vec![None; n],
            sites_of: vec![Assignment::new(); n],
            used: vec![false; target.molecules.len()],
            started: false,
            done: dead,
        }
    }

    fn pattern_mol_at(&self, depth: usize) -> u32 {
        self.order[depth]
    }

    /// Candidate target molecules for the pattern molecule entered at
    /// `depth`. When a labeled bond connects it to an already-bound pattern
    /// molecule, the partner of the bound endpoint is the only candidate.
    fn candidates(&self, depth: usize) -> Vec<u32> {
        let p = self.pattern_mol_at(depth);
        let ty = self.pattern.molecules[p as usize].ty;
        for (a, b) in &self.bonds {
            let other = if a.mol == p && b.mol != p {
                *b
            } else if b.mol == p && a.mol != p {
                *a
            } else {
                continue;
            };
            if let Some(bound_mol) = self.mol_of[other.mol as usize] {
                let slots = &self.sites_of[other.mol as usize];
                if (other.comp as usize) < slots.len() {
                    let anchor = Site::new(bound_mol, slots[other.comp as usize]);
                    return match self.target.partner(anchor) {
                        Some(partner)
                            if !self.used[partner.mol.0 as usize]
                                && self.target.molecules[partner.mol.0 as usize].ty == ty =>
                        {
                            vec![partner.mol.0]
                        }
                        _ => Vec::new(),
                    };
                }
            }
        }
        (0..self.target.molecules.len())
            .filter(|&t| !self.used[t] && self.target.molecules[t].ty == ty)
            .map(|t| u32::try_from(t).unwrap_or(u32::MAX))
            .collect()
    }

    /// Enumerates injective component-to-slot assignments for pattern
    /// molecule `p` on target molecule `t`, checking state and local bond
    /// feasibility. Cross-molecule bond endpoints are verified against
    /// already-bound partners here and re-verified globally on completion.
    fn assignments(&self, p: u32, t: MolIdx) -> Vec<Assignment> {
        let pm = &self.pattern.molecules[p as usize];
        let mut out = Vec::new();
        let mut current = Assignment::new();
        self.assign_rec(p, t, pm.comps.len(), &mut current, &mut out);
        out
    }

    fn assign_rec(
        &self,
        p: u32,
        t: MolIdx,
        total: usize,
        current: &mut Assignment,
        out: &mut Vec<Assignment>,
    ) {
        if current.len() == total {
            out.push(current.clone());
            return;
        }
        let pm = &self.pattern.molecules[p as usize];
        let pc = &pm.comps[current.len()];
        for slot in self.types.group_slots(pm.ty, pc.group) {
            if current.contains(&slot) {
                continue;
            }
            let site = Site::new(t, slot);
            if let Some(required) = pc.state {
                if self.target.state(site) != Some(required) {
                    continue;
                }
            }
            let partner = self.target.partner(site);
            let feasible = match pc.bond {
                BondPat::Free => partner.is_none(),
                BondPat::Any => true,
                BondPat::Bound => partner.is_some(),
                BondPat::Labeled(_) => {
                    partner.is_some() && self.labeled_endpoint_ok(p, current.len(), site)
                }
            };
            if !feasible {
                continue;
            }
            current.push(slot);
            self.assign_rec(p, t, total, current, out);
            current.pop();
        }
    }

    /// Checks a labeled endpoint against its pattern partner when that
    /// partner is already bound (constraint propagation); defers otherwise.
    fn labeled_endpoint_ok(&self, p: u32, comp: usize, site: Site) -> bool {
        let me = PatSite { mol: p, comp: u32::try_from(comp).unwrap_or(u32::MAX) };
        for (a, b) in &self.bonds {
            let other = if *a == me {
                *b
            } else if *b == me {
                *a
            } else {
                continue;
            };
            if other.mol == p {
                // Intramolecular bond: the partner endpoint may not be
                // assigned yet; completion re-verifies.
                return true;
            }
            if let Some(bound_mol) = self.mol_of[other.mol as usize] {
                let slots = &self.sites_of[other.mol as usize];
                if (other.comp as usize) < slots.len() {
                    let expect = Site::new(bound_mol, slots[other.comp as usize]);
                    return self.target.partner(site) == Some(expect);
                }
            }
            return true;
        }
        true
    }

    fn bind(&mut self, depth: usize, t: u32, assign: Assignment) {
        let p = self.pattern_mol_at(depth) as usize;
        self.mol_of[p] = Some(MolIdx(t));
        self.sites_of[p] = assign;
        self.used[t as usize] = true;
    }

    fn unbind(&mut self, depth: usize) {
        let p = self.pattern_mol_at(depth) as usize;
        if let Some(m) = self.mol_of[p].take() {
            self.used[m.0 as usize] = false;
        }
        self.sites_of[p].clear();
    }

    /// Advances the frame at `depth` to its next (candidate, assignment)
    /// pair, rebinding state. Returns false when exhausted.
    fn advance(&mut self, depth: usize) -> bool {
        let (entered, cand_i, more_assigns) = {
            let frame = &self.frames[depth];
            (
                frame.cand_i != usize::MAX,
                frame.cand_i,
                frame.cand_i != usize::MAX && frame.assign_i + 1 < frame.assigns.len(),
            )
        };
        if more_assigns {
            let t = self.frames[depth].cands[cand_i];
            self.frames[depth].assign_i += 1;
            let assign = self.frames[depth].assigns[self.frames[depth].assign_i].clone();
            self.unbind(depth);
            self.bind(depth, t, assign);
            return true;
        }
        let next_cand = if entered { cand_i + 1 } else { 0 };
        self.unbind(depth);
        let mut found = None;
        for ci in next_cand..self.frames[depth].cands.len() {
            let t = self.frames[depth].cands[ci];
            let p = self.pattern_mol_at(depth);
            let assigns = self.assignments(p, MolIdx(t));
            if !assigns.is_empty() {
                found = Some((ci, t, assigns));
                break;
            }
        }
        match found {
            Some((ci, t, assigns)) => {
                let assign = assigns[0].clone();
                let frame = &mut self.frames[depth];
                frame.cand_i = ci;
                frame.assigns = assigns;
                frame.assign_i = 0;
                self.bind(depth, t, assign);
                true
            }
            None => false,
        }
    }

    /// Final structural verification: every labeled pattern bond must map to
    /// an actual bond between the mapped target sites.
    fn verify_bonds(&self) -> bool {
        for (a, b) in &self.bonds {
            let sa = Site::new(
                match self.mol_of[a.mol as usize] {
                    Some(m) => m,
                    None => return false,
                },
                self.sites_of[a.mol as usize][a.comp as usize],
            );
            let sb = Site::new(
                match self.mol_of[b.mol as usize] {
                    Some(m) => m,
                    None => return false,
                },
                self.sites_of[b.mol as usize][b.comp as usize],
            );
            if self.target.partner(sa) != Some(sb) {
                return false;
            }
        }
        true
    }

    fn capture(&self) -> Embedding {
        Embedding {
            mols: self.mol_of.iter().map(|m| m.unwrap_or(MolIdx(u32::MAX))).collect(),
            sites: self.sites_of.clone(),
        }
    }
}

impl Iterator for Embeddings<'_> {
    type Item = Embedding;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let n = self.pattern.molecules.len();
        if n == 0 {
            // The empty pattern embeds exactly once in any target.
            self.done = true;
            return Some(Embedding { mols: Vec::new(), sites: Vec::new() });
        }
        loop {
            if self.frames.is_empty() {
                if self.started {
                    self.done = true;
                    return None;
                }
                self.started = true;
                let cands = self.candidates(0);
                self.frames.push(Frame {
                    cands,
                    cand_i: usize::MAX,
                    assigns: Vec::new(),
                    assign_i: 0,
                });
            }
            let depth = self.frames.len() - 1;
            if self.advance(depth) {
                if self.frames.len() == n {
                    if self.verify_bonds() {
                        return Some(self.capture());
                    }
                } else {
                    let cands = self.candidates(self.frames.len());
                    self.frames.push(Frame {
                        cands,
                        cand_i: usize::MAX,
                        assigns: Vec::new(),
                        assign_i: 0,
                    });
                }
            } else {
                self.frames.pop();
                if self.frames.is_empty() {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

/// Search order: highest specificity first, then prefer molecules adjacent
/// to already-placed ones so bond propagation prunes early.
fn search_order(pattern: &PatternGraph) -> Vec<u32> {
    let n = pattern.molecules.len();
    let mut order: Vec<u32> = Vec::with_capacity(n);
    let mut placed = vec![false; n];
    while order.len() < n {
        let mut best: Option<(bool, u32, std::cmp::Reverse<u32>)> = None;
        let mut best_idx = 0u32;
        for i in 0..n {
            if placed[i] {
                continue;
            }
            let i32u = u32::try_from(i).unwrap_or(u32::MAX);
            let adjacent = pattern
                .neighbors(i32u)
                .iter()
                .any(|q| placed[*q as usize]);
            let key = (adjacent, pattern.specificity(i32u), std::cmp::Reverse(i32u));
            if best.is_none() || key > best.unwrap_or(key) {
                best = Some(key);
                best_idx = i32u;
            }
        }
        placed[best_idx as usize] = true;
        order.push(best_idx);
    }
    order
}

/// True when at least one embedding exists.
pub fn has_embedding(types: &TypeTable, pattern: &PatternGraph, target: &SpeciesGraph) -> bool {
    Embeddings::new(types, pattern, target).next().is_some()
}

/// Number of embeddings (exhaustive).
pub fn count_embeddings(types: &TypeTable, pattern: &PatternGraph, target: &SpeciesGraph) -> usize {
    Embeddings::new(types, pattern, target).count()
}

/// Collapses embeddings to one representative per automorphism-equivalence
/// class in the target, keyed by the sorted target-molecule image. Used for
/// MatchOnce counting.
pub fn distinct_images(embeddings: Vec<Embedding>) -> Vec<Embedding> {
    let mut seen: Vec<Vec<MolIdx>> = Vec::new();
    let mut out = Vec::new();
    for e in embeddings {
        let image = e.image();
        if !seen.contains(&image) {
            seen.push(image);
            out.push(e);
        }
    }
    out
}
