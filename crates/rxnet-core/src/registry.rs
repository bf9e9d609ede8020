//! The canonical species registry.
//!
//! One explicitly-owned, single-writer, append-only table keyed by canonical
//! label, created at generation start and returned as part of the result.
//! Workers discover candidate species in parallel; all insertion goes
//! through the owning generator thread, so at most one index exists per
//! isomorphism class.
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::canonical::isomorphic;
use crate::decl::TypeTable;
use crate::graph::SpeciesGraph;
use crate::ident::{CanonicalLabel, SpeciesId};
use crate::network::Species;

/// Registry failure. Only strict mode can fail: a canonical-label collision
/// between non-isomorphic graphs means the label function is unsound for
/// this model and the run must not silently merge species.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two non-isomorphic graphs produced the same canonical label.
    #[error("canonical label collision between non-isomorphic graphs")]
    CanonicalCollision,
}

/// Append-only species table keyed by canonical label.
#[derive(Debug, Default)]
pub struct SpeciesRegistry {
    by_label: FxHashMap<CanonicalLabel, SpeciesId>,
    table: Vec<Species>,
    strict: bool,
}

impl SpeciesRegistry {
    /// Creates an empty registry. With `strict` set, every label hit is
    /// re-verified with an exact isomorphism check.
    pub fn new(strict: bool) -> Self {
        Self { by_label: FxHashMap::default(), table: Vec::new(), strict }
    }

    /// Number of registered species.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when no species are registered.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Looks up a species by label.
    pub fn get_by_label(&self, label: CanonicalLabel) -> Option<&Species> {
        self.by_label.get(&label).map(|id| &self.table[id.0 as usize])
    }

    /// Shared view of a registered species.
    pub fn get(&self, id: SpeciesId) -> &Species {
        &self.table[id.0 as usize]
    }

    /// Inserts a graph under its canonical label, reusing the existing
    /// index when the isomorphism class is already registered. Returns the
    /// index and whether the species is new.
    ///
    /// # Errors
    /// [`RegistryError::CanonicalCollision`] in strict mode when the label
    /// hit is not actually isomorphic.
    pub fn insert(
        &mut self,
        types: &TypeTable,
        graph: SpeciesGraph,
        label: CanonicalLabel,
        discovered_iter: u32,
    ) -> Result<(SpeciesId, bool), RegistryError> {
        if let Some(id) = self.by_label.get(&label) {
            if self.strict && !isomorphic(types, &self.table[id.0 as usize].graph, &graph) {
                return Err(RegistryError::CanonicalCollision);
            }
            return Ok((*id, false));
        }
        let id = SpeciesId(u32::try_from(self.table.len()).unwrap_or(u32::MAX));
        self.by_label.insert(label, id);
        self.table.push(Species { id, graph, label, initial_amount: 0.0, discovered_iter });
        Ok((id, true))
    }

    /// Adds to a species' initial population. Duplicate seed declarations
    /// resolving to the same isomorphism class accumulate.
    pub fn add_initial(&mut self, id: SpeciesId, amount: f64) {
        self.table[id.0 as usize].initial_amount += amount;
    }

    /// Species discovered at the given iteration, ascending by index.
    pub fn discovered_at(&self, iteration: u32) -> Vec<SpeciesId> {
        self.table
            .iter()
            .filter(|s| s.discovered_iter == iteration)
            .map(|s| s.id)
            .collect()
    }

    /// Consumes the registry into the final ordered species table.
    pub fn into_table(self) -> Vec<Species> {
        self.table
    }
}
