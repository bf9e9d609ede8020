//! Generated-network data model: species, reactions, terminal status.
use crate::expr::{Bindings, EvaluationError, Expr};
use crate::graph::SpeciesGraph;
use crate::ident::{CanonicalLabel, RuleId, SpeciesId};
use crate::observable::CompiledObservable;

/// A registered species: canonical graph, permanent index, seed population.
///
/// Species are created on first discovery and never mutated afterwards —
/// only referenced by index.
#[derive(Clone, Debug)]
pub struct Species {
    /// Permanent index in the network table.
    pub id: SpeciesId,
    /// Canonical representative graph.
    pub graph: SpeciesGraph,
    /// Isomorphism-class key.
    pub label: CanonicalLabel,
    /// Initial population; zero for species discovered during expansion.
    pub initial_amount: f64,
    /// Expansion iteration that discovered the species (0 for seeds).
    pub discovered_iter: u32,
}

/// Compiled rate law: the expression plus its pre-evaluated mass-action
/// constant where the expression resolves against global parameters alone.
#[derive(Clone, Debug)]
pub struct RateLaw {
    /// Rate expression as declared.
    pub expr: Expr,
    /// Constant value when the expression binds fully at compile time;
    /// `None` for functional rates referencing observables.
    pub constant: Option<f64>,
}

impl RateLaw {
    /// Evaluates the law against `bindings`.
    ///
    /// # Errors
    /// Propagates [`EvaluationError`] from the expression.
    pub fn value(&self, bindings: &Bindings) -> Result<f64, EvaluationError> {
        match self.constant {
            Some(v) => Ok(v),
            None => self.expr.eval(bindings),
        }
    }
}

/// One concrete reaction between registered species.
#[derive(Clone, Debug)]
pub struct Reaction {
    /// Originating rule.
    pub rule: RuleId,
    /// Rule label, kept for diagnostics and output naming.
    pub rule_label: String,
    /// Reactant species indices, in rule position order.
    pub reactants: Vec<SpeciesId>,
    /// Product species indices, in deterministic product order.
    pub products: Vec<SpeciesId>,
    /// Compiled rate law.
    pub rate: RateLaw,
    /// Number of distinct embeddings that collapsed into this reaction.
    pub symmetry_factor: u32,
    /// When set, the rate law is an aggregate: the symmetry factor is
    /// reported but not folded into the rate.
    pub total_rate: bool,
}

impl Reaction {
    /// Effective mass-action rate: the law's value scaled by the symmetry
    /// factor, except under TotalRate where the law is used verbatim.
    ///
    /// # Errors
    /// Propagates [`EvaluationError`] from the rate law.
    pub fn rate_value(&self, bindings: &Bindings) -> Result<f64, EvaluationError> {
        let base = self.rate.value(bindings)?;
        if self.total_rate {
            Ok(base)
        } else {
            Ok(base * f64::from(self.symmetry_factor))
        }
    }
}

/// Which configured ceiling stopped the expansion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Limit {
    /// Iteration cap.
    MaxIter,
    /// Total molecule count per candidate species.
    MaxAgg,
    /// Per-molecule-type count per candidate species.
    MaxStoich,
    /// Total species table size.
    MaxSpecies,
    /// Total reaction count.
    MaxReactions,
    /// External cooperative cancellation.
    Cancelled,
}

/// Terminal status of a generation run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationStatus {
    /// Fixed point: no new species were discoverable.
    Converged,
    /// A limit intervened; the network is a valid partial result.
    LimitReached(Limit),
}

/// The generated network: species table, reaction list, observable
/// projections, and the terminal status. Grows monotonically during
/// generation and is immutable once handed to the caller.
#[derive(Clone, Debug)]
pub struct Network {
    /// Ordered species table.
    pub species: Vec<Species>,
    /// Ordered reaction list.
    pub reactions: Vec<Reaction>,
    /// Observable projections against the final species table.
    pub observables: Vec<CompiledObservable>,
    /// Terminal status.
    pub status: GenerationStatus,
    /// Resolved global parameter bindings the rates were compiled against.
    pub parameters: Bindings,
}
