// SPDX-License-Identifier: Apache-2.0
//! Fixed-point network generation.
//!
//! The generator owns the canonical species registry for one run. Each
//! iteration takes the frontier (species discovered in the previous
//! iteration), evaluates every (rule, species-tuple) pair — in parallel,
//! since they are independent — and serially inserts the surviving
//! candidates so exactly one index exists per isomorphism class. Iterations
//! are strictly ordered: the next one starts only once the registry
//! reflects everything discovered so far.
//!
//! Limits are checked before insertion; a rejected candidate is simply not
//! added, so the result is always a valid (possibly partial) network.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::canonical::canonical_form;
use crate::decl::{DeclarationError, TypeTable};
use crate::expr::{resolve_parameters, Bindings, EvaluationError, Expr, ParameterError};
use crate::graph::SpeciesGraph;
use crate::ident::{CanonicalLabel, SpeciesId, TypeId};
use crate::matcher::{distinct_images, Embedding, Embeddings};
use crate::network::{GenerationStatus, Limit, Network, RateLaw, Reaction};
use crate::observable::ObservableDecl;
use crate::pattern::PatternGraph;
use crate::registry::{RegistryError, SpeciesRegistry};
use crate::rule::{compile_rule, PatternError, ReactionRule, RuleDecl};
use crate::transform::apply_rule;

/// A seed species declaration: a concrete pattern plus its initial-amount
/// expression, evaluated against global parameters.
#[derive(Clone, Debug)]
pub struct SeedDecl {
    /// Concrete species pattern.
    pub pattern: PatternGraph,
    /// Initial population expression.
    pub amount: Expr,
}

/// The declaration model handed over by the (external) front end.
#[derive(Clone, Debug, Default)]
pub struct DeclarationModel {
    /// Declared molecule types and compartments.
    pub types: TypeTable,
    /// Named parameters, possibly referencing each other.
    pub parameters: Vec<(String, Expr)>,
    /// Seed species.
    pub seeds: Vec<SeedDecl>,
    /// Reaction rules.
    pub rules: Vec<RuleDecl>,
    /// Observables.
    pub observables: Vec<ObservableDecl>,
}

/// Per-molecule-type stoichiometry ceiling.
#[derive(Clone, Debug, Default)]
pub enum StoichLimit {
    /// No stoichiometry limit.
    #[default]
    Unbounded,
    /// One ceiling applying to every molecule type.
    Uniform(usize),
    /// Individual ceilings; unlisted types are unbounded.
    PerType(FxHashMap<TypeId, usize>),
}

impl StoichLimit {
    fn allows(&self, graph: &SpeciesGraph) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Uniform(cap) => graph.type_counts().values().all(|c| c <= cap),
            Self::PerType(caps) => graph
                .type_counts()
                .iter()
                .all(|(ty, c)| caps.get(ty).is_none_or(|cap| c <= cap)),
        }
    }
}

/// Expansion limits and toggles.
#[derive(Clone, Debug)]
pub struct GeneratorOptions {
    /// Expansion iteration cap.
    pub max_iter: u32,
    /// Total molecule count ceiling per candidate species.
    pub max_agg: usize,
    /// Per-type molecule count ceiling per candidate species.
    pub max_stoich: StoichLimit,
    /// Species table size ceiling.
    pub max_species: usize,
    /// Reaction list size ceiling.
    pub max_reactions: usize,
    /// Re-verify every canonical-label hit with an exact isomorphism check.
    pub strict_canonical: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            max_iter: 50,
            max_agg: 500,
            max_stoich: StoichLimit::Unbounded,
            max_species: 20_000,
            max_reactions: 100_000,
            strict_canonical: false,
        }
    }
}

/// Cooperative cancellation handle. Cancelling stops the run between
/// batches; everything discovered so far is returned.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fatal failures raised before or during generation. Structural errors are
/// eager; nothing is partially generated when one fires.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Invalid declaration reference.
    #[error(transparent)]
    Declaration(#[from] DeclarationError),
    /// Structurally invalid rule pattern pair.
    #[error(transparent)]
    Pattern(#[from] PatternError),
    /// Global parameter resolution failed.
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    /// A seed amount expression failed to evaluate; global context, fatal.
    #[error("seed amount failed to evaluate: {0}")]
    SeedAmount(EvaluationError),
    /// Canonical-label collision in strict mode.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

struct CompiledRule {
    rule: ReactionRule,
    rate: RateLaw,
    /// Set when the rate law failed structurally at compile time; the rule
    /// still participates in nothing, and the failure was reported once.
    skip: bool,
}

/// The network generation engine: compiled model plus limits.
pub struct NetworkGenerator {
    types: TypeTable,
    params: Bindings,
    rules: Vec<CompiledRule>,
    seeds: Vec<(SpeciesGraph, f64)>,
    observables: Vec<ObservableDecl>,
    options: GeneratorOptions,
    cancel: CancelToken,
}

impl NetworkGenerator {
    /// Compiles a declaration model. All structural validation happens
    /// here: parameter resolution, rule compilation (including the
    /// bidirectional split), seed instantiation, and observable pattern
    /// checks.
    ///
    /// # Errors
    /// The first [`GenerateError`] encountered; nothing is generated.
    pub fn new(model: DeclarationModel, options: GeneratorOptions) -> Result<Self, GenerateError> {
        let params = resolve_parameters(&model.parameters)?;

        let mut rules = Vec::new();
        let mut next_id = 0u32;
        for decl in &model.rules {
            for rule in compile_rule(&model.types, decl, next_id)? {
                next_id = rule.id.0 + 1;
                let (rate, skip) = match rule.rate.eval(&params) {
                    Ok(v) => (RateLaw { expr: rule.rate.clone(), constant: Some(v) }, false),
                    Err(EvaluationError::Unbound { .. }) => {
                        // Functional rate: resolved per evaluation by the
                        // simulation layer.
                        (RateLaw { expr: rule.rate.clone(), constant: None }, false)
                    }
                    Err(err) => {
                        warn!(rule = %rule.label, %err, "rate law failed to evaluate; rule disabled");
                        (RateLaw { expr: rule.rate.clone(), constant: None }, true)
                    }
                };
                rules.push(CompiledRule { rule, rate, skip });
            }
        }
        // Higher priority expands first; rule id breaks ties.
        rules.sort_by_key(|r| (std::cmp::Reverse(r.rule.modifiers.priority), r.rule.id.0));

        let mut seeds = Vec::with_capacity(model.seeds.len());
        for seed in &model.seeds {
            let graph = SpeciesGraph::from_pattern(&model.types, &seed.pattern)?;
            let amount = seed.amount.eval(&params).map_err(GenerateError::SeedAmount)?;
            seeds.push((graph, amount));
        }

        for obs in &model.observables {
            for pattern in &obs.patterns {
                if let Err(label) = pattern.bonds() {
                    return Err(GenerateError::Pattern(PatternError::UnbalancedBond {
                        rule: obs.name.clone(),
                        label: label.0,
                    }));
                }
            }
        }

        Ok(Self {
            types: model.types,
            params,
            rules,
            seeds,
            observables: model.observables,
            options,
            cancel: CancelToken::new(),
        })
    }

    /// Handle for cooperative cancellation of a running generation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs expansion to a fixed point or a limit and returns the network.
    ///
    /// # Errors
    /// [`GenerateError::Registry`] on a strict-mode canonical collision; all
    /// other failure modes were caught at compile time or are localized.
    pub fn generate(&self) -> Result<Network, GenerateError> {
        let types = &self.types;
        let mut registry = SpeciesRegistry::new(self.options.strict_canonical);
        for (graph, amount) in &self.seeds {
            let form = canonical_form(types, graph);
            let (id, _) = registry.insert(types, graph.clone(), form.label, 0)?;
            registry.add_initial(id, *amount);
        }

        // Per (rule, position) candidate species, kept ascending; appended
        // as new species are discovered.
        let mut candidates: Vec<Vec<Vec<SpeciesId>>> = self
            .rules
            .iter()
            .map(|r| vec![Vec::new(); r.rule.reactants.len()])
            .collect();

        let mut reactions: Vec<Reaction> = Vec::new();
        let mut reaction_index: FxHashMap<ReactionKey, usize> = FxHashMap::default();
        let mut limit_hit: Option<Limit> = None;
        let mut iteration = 0u32;
        let mut frontier: Vec<SpeciesId> = registry.discovered_at(0);
        // Pure-synthesis rules fire on the first iteration even for a
        // seedless model.
        let has_synthesis =
            self.rules.iter().any(|r| !r.skip && r.rule.reactants.is_empty());

        'expansion: while !frontier.is_empty() || (iteration == 0 && has_synthesis) {
            if iteration >= self.options.max_iter {
                limit_hit.get_or_insert(Limit::MaxIter);
                break;
            }
            if self.cancel.is_cancelled() {
                limit_hit.get_or_insert(Limit::Cancelled);
                break;
            }
            iteration += 1;

            // Extend candidate caches with the frontier, in parallel: the
            // (rule, position, species) checks are independent.
            let new_matches: Vec<Vec<Vec<SpeciesId>>> = self
                .rules
                .par_iter()
                .map(|cr| {
                    cr.rule
                        .reactants
                        .iter()
                        .map(|pattern| {
                            frontier
                                .iter()
                                .filter(|id| {
                                    Embeddings::new(types, pattern, &registry.get(**id).graph)
                                        .next()
                                        .is_some()
                                })
                                .copied()
                                .collect()
                        })
                        .collect()
                })
                .collect();
            for (per_rule, fresh) in candidates.iter_mut().zip(new_matches) {
                for (list, mut add) in per_rule.iter_mut().zip(fresh) {
                    list.append(&mut add);
                }
            }

            let mut frontier_flag = vec![false; registry.len()];
            for id in &frontier {
                frontier_flag[id.0 as usize] = true;
            }

            // Work items: every (rule, species tuple) with at least one
            // frontier member. Equal patterns at adjacent positions
            // enumerate unordered (ascending ids) to avoid double counting.
            let mut items: Vec<(usize, Vec<SpeciesId>)> = Vec::new();
            for (ri, cr) in self.rules.iter().enumerate() {
                if cr.skip {
                    continue;
                }
                if cr.rule.reactants.is_empty() {
                    if iteration == 1 {
                        items.push((ri, Vec::new()));
                    }
                    continue;
                }
                let identical_prev: Vec<bool> = cr
                    .rule
                    .reactants
                    .iter()
                    .enumerate()
                    .map(|(j, p)| j > 0 && *p == cr.rule.reactants[j - 1])
                    .collect();
                let mut tuple = Vec::with_capacity(cr.rule.reactants.len());
                enumerate_tuples(
                    &candidates[ri],
                    &identical_prev,
                    &frontier_flag,
                    &mut tuple,
                    &mut |t| items.push((ri, t.to_vec())),
                );
            }

            // Parallel phase: match, apply, canonicalize, pre-check limits.
            let outcomes: Vec<Vec<CandidateApp>> = items
                .par_iter()
                .map(|(ri, tuple)| self.evaluate_item(&registry, *ri, tuple))
                .collect();

            if self.cancel.is_cancelled() {
                limit_hit.get_or_insert(Limit::Cancelled);
                break;
            }

            // Serial insertion, in deterministic work-item order.
            for ((ri, tuple), apps) in items.iter().zip(outcomes) {
                let cr = &self.rules[*ri];
                for app in apps {
                    if let Some(limit) = app.rejected {
                        limit_hit.get_or_insert(limit);
                        continue;
                    }
                    let fresh = app
                        .products
                        .iter()
                        .filter(|(_, label)| registry.get_by_label(*label).is_none())
                        .map(|(_, label)| *label)
                        .collect::<std::collections::BTreeSet<_>>()
                        .len();
                    if registry.len() + fresh > self.options.max_species {
                        limit_hit.get_or_insert(Limit::MaxSpecies);
                        continue;
                    }
                    let mut product_ids = Vec::with_capacity(app.products.len());
                    for (graph, label) in app.products {
                        let (id, _) = registry.insert(types, graph, label, iteration)?;
                        product_ids.push(id);
                    }
                    let key = ReactionKey::new(cr.rule.id.0, tuple, &product_ids);
                    match reaction_index.get(&key).copied() {
                        Some(idx) => reactions[idx].symmetry_factor += 1,
                        None => {
                            if reactions.len() >= self.options.max_reactions {
                                limit_hit.get_or_insert(Limit::MaxReactions);
                                break 'expansion;
                            }
                            reaction_index.insert(key, reactions.len());
                            reactions.push(Reaction {
                                rule: cr.rule.id,
                                rule_label: cr.rule.label.clone(),
                                reactants: tuple.clone(),
                                products: product_ids,
                                rate: cr.rate.clone(),
                                symmetry_factor: 1,
                                total_rate: cr.rule.modifiers.total_rate,
                            });
                        }
                    }
                }
            }

            frontier = registry.discovered_at(iteration);
            debug!(
                iteration,
                species = registry.len(),
                reactions = reactions.len(),
                frontier = frontier.len(),
                "expansion iteration complete"
            );
        }

        let status = match limit_hit {
            Some(limit) => GenerationStatus::LimitReached(limit),
            None => GenerationStatus::Converged,
        };
        let species = registry.into_table();
        let observables =
            crate::observable::compile_observables(types, &self.observables, &species);
        Ok(Network { species, reactions, observables, status, parameters: self.params.clone() })
    }

    /// Evaluates one (rule, tuple) work item: enumerate embedding combos,
    /// apply the rule, canonicalize products, pre-check size limits.
    fn evaluate_item(
        &self,
        registry: &SpeciesRegistry,
        ri: usize,
        tuple: &[SpeciesId],
    ) -> Vec<CandidateApp> {
        let types = &self.types;
        let cr = &self.rules[ri];
        let graphs: Vec<&SpeciesGraph> =
            tuple.iter().map(|id| &registry.get(*id).graph).collect();

        let mut per_position: Vec<Vec<Embedding>> = Vec::with_capacity(graphs.len());
        for (pattern, graph) in cr.rule.reactants.iter().zip(&graphs) {
            let found: Vec<Embedding> = Embeddings::new(types, pattern, graph).collect();
            let found = if cr.rule.modifiers.match_once { distinct_images(found) } else { found };
            if found.is_empty() {
                return Vec::new();
            }
            per_position.push(found);
        }

        let identical_prev: Vec<bool> = cr
            .rule
            .reactants
            .iter()
            .enumerate()
            .map(|(j, p)| {
                j > 0 && *p == cr.rule.reactants[j - 1] && tuple[j] == tuple[j - 1]
            })
            .collect();

        let mut out = Vec::new();
        let mut combo: Vec<usize> = Vec::with_capacity(per_position.len());
        enumerate_combos(&per_position, &identical_prev, &mut combo, &mut |chosen| {
            let embeddings: Vec<Embedding> = chosen
                .iter()
                .zip(&per_position)
                .map(|(i, list)| list[*i].clone())
                .collect();
            match apply_rule(types, &cr.rule, &graphs, &embeddings) {
                Ok(Some(application)) => {
                    let mut rejected = None;
                    for product in &application.products {
                        if product.molecule_count() > self.options.max_agg {
                            rejected = Some(Limit::MaxAgg);
                            break;
                        }
                        if !self.options.max_stoich.allows(product) {
                            rejected = Some(Limit::MaxStoich);
                            break;
                        }
                    }
                    let products = if rejected.is_some() {
                        Vec::new()
                    } else {
                        application
                            .products
                            .into_iter()
                            .map(|g| {
                                let label = canonical_form(types, &g).label;
                                (g, label)
                            })
                            .collect()
                    };
                    out.push(CandidateApp { products, rejected });
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(rule = %cr.rule.label, %err, "rule application failed; skipped");
                }
            }
        });
        out
    }
}

/// One surviving rule application awaiting serial insertion.
struct CandidateApp {
    products: Vec<(SpeciesGraph, CanonicalLabel)>,
    rejected: Option<Limit>,
}

/// Reaction identity: rule plus order-insensitive reactant/product sets.
#[derive(Clone, PartialEq, Eq, Hash)]
struct ReactionKey {
    rule: u32,
    reactants: Vec<SpeciesId>,
    products: Vec<SpeciesId>,
}

impl ReactionKey {
    fn new(rule: u32, reactants: &[SpeciesId], products: &[SpeciesId]) -> Self {
        let mut reactants = reactants.to_vec();
        let mut products = products.to_vec();
        reactants.sort_unstable();
        products.sort_unstable();
        Self { rule, reactants, products }
    }
}

/// Depth-first tuple enumeration over per-position candidate lists. Equal
/// adjacent patterns enumerate ascending species ids; tuples without a
/// frontier member are skipped.
fn enumerate_tuples(
    cands: &[Vec<SpeciesId>],
    identical_prev: &[bool],
    frontier: &[bool],
    tuple: &mut Vec<SpeciesId>,
    sink: &mut impl FnMut(&[SpeciesId]),
) {
    let pos = tuple.len();
    if pos == cands.len() {
        if tuple.iter().any(|id| frontier[id.0 as usize]) {
            sink(tuple);
        }
        return;
    }
    for id in &cands[pos] {
        if identical_prev[pos] {
            if let Some(prev) = tuple.last() {
                if id < prev {
                    continue;
                }
            }
        }
        tuple.push(*id);
        enumerate_tuples(cands, identical_prev, frontier, tuple, sink);
        tuple.pop();
    }
}

/// Embedding-combo enumeration; positions sharing pattern and species with
/// their predecessor enumerate non-decreasing embedding indices so that
/// swapping identical reactant roles is not double-counted.
fn enumerate_combos(
    per_position: &[Vec<Embedding>],
    identical_prev: &[bool],
    combo: &mut Vec<usize>,
    sink: &mut impl FnMut(&[usize]),
) {
    let pos = combo.len();
    if pos == per_position.len() {
        sink(combo);
        return;
    }
    let start = if identical_prev[pos] { combo.last().copied().unwrap_or(0) } else { 0 };
    for i in start..per_position[pos].len() {
        combo.push(i);
        enumerate_combos(per_position, identical_prev, combo, sink);
        combo.pop();
    }
}
