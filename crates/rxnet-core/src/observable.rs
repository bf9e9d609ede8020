//! Observable projection against the final species table.
//!
//! Once generation terminates, each declared observable compiles to a
//! sparse (species index, coefficient) vector the simulation layer can dot
//! against a population vector. Candidate species are prefiltered through
//! an inverted molecule-type index before running the matcher.
use rustc_hash::FxHashMap;

use crate::decl::TypeTable;
use crate::ident::{SpeciesId, TypeId};
use crate::matcher::{count_embeddings, has_embedding};
use crate::network::Species;
use crate::pattern::PatternGraph;

/// Counting mode of an observable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservableKind {
    /// Count pattern embeddings per species (molecule counting).
    Molecules,
    /// Count each matching species once.
    SpeciesCount,
    /// Counter-style accumulation: the `p`-th pattern contributes with
    /// weight `p`, encoding an accumulating level.
    Counter,
}

/// An observable as declared by the front end.
#[derive(Clone, Debug)]
pub struct ObservableDecl {
    /// Observable name.
    pub name: String,
    /// Counting mode.
    pub kind: ObservableKind,
    /// Patterns, each contributing matches independently.
    pub patterns: Vec<PatternGraph>,
}

/// A compiled observable: sparse coefficients over the species table.
#[derive(Clone, Debug)]
pub struct CompiledObservable {
    /// Observable name.
    pub name: String,
    /// Counting mode.
    pub kind: ObservableKind,
    /// (species, coefficient) pairs, ascending by species index.
    pub coefficients: Vec<(SpeciesId, f64)>,
}

/// Compiles all observables against the final species table.
pub fn compile_observables(
    types: &TypeTable,
    decls: &[ObservableDecl],
    species: &[Species],
) -> Vec<CompiledObservable> {
    // Inverted index: molecule type -> species containing it. Patterns only
    // need to visit species carrying every type they mention.
    let mut by_type: FxHashMap<TypeId, Vec<usize>> = FxHashMap::default();
    for (idx, s) in species.iter().enumerate() {
        let mut seen: Vec<TypeId> = Vec::new();
        for m in &s.graph.molecules {
            if !seen.contains(&m.ty) {
                seen.push(m.ty);
                by_type.entry(m.ty).or_default().push(idx);
            }
        }
    }

    decls
        .iter()
        .map(|decl| {
            let mut coeff: FxHashMap<usize, f64> = FxHashMap::default();
            for (p_idx, pattern) in decl.patterns.iter().enumerate() {
                let candidates = candidate_species(&by_type, pattern, species.len());
                for s_idx in candidates {
                    let target = &species[s_idx].graph;
                    let count = match decl.kind {
                        ObservableKind::Molecules => {
                            count_embeddings(types, pattern, target) as f64
                        }
                        ObservableKind::SpeciesCount => {
                            f64::from(u8::from(has_embedding(types, pattern, target)))
                        }
                        ObservableKind::Counter => {
                            if has_embedding(types, pattern, target) {
                                p_idx as f64
                            } else {
                                0.0
                            }
                        }
                    };
                    if count > 0.0 {
                        *coeff.entry(s_idx).or_insert(0.0) += count;
                    }
                }
            }
            let mut coefficients: Vec<(SpeciesId, f64)> = coeff
                .into_iter()
                .map(|(idx, c)| (species[idx].id, c))
                .collect();
            coefficients.sort_by_key(|(id, _)| *id);
            CompiledObservable { name: decl.name.clone(), kind: decl.kind, coefficients }
        })
        .collect()
}

/// Species containing every molecule type the pattern mentions; all species
/// for an empty pattern.
fn candidate_species(
    by_type: &FxHashMap<TypeId, Vec<usize>>,
    pattern: &PatternGraph,
    total: usize,
) -> Vec<usize> {
    let mut required: Vec<TypeId> = pattern.molecules.iter().map(|m| m.ty).collect();
    required.sort_unstable();
    required.dedup();
    if required.is_empty() {
        return (0..total).collect();
    }
    let mut lists: Vec<&Vec<usize>> = Vec::with_capacity(required.len());
    for ty in &required {
        match by_type.get(ty) {
            Some(list) => lists.push(list),
            None => return Vec::new(),
        }
    }
    // Intersect the sorted candidate lists, smallest first.
    lists.sort_by_key(|l| l.len());
    let mut out: Vec<usize> = lists[0].clone();
    for list in &lists[1..] {
        out.retain(|idx| list.binary_search(idx).is_ok());
        if out.is_empty() {
            break;
        }
    }
    out
}
