//! rxnet-core: rule-based reaction network generation engine.
//!
//! Takes a declaration model (molecule types, parameters, seed species,
//! reaction rules, observables) and generates the concrete reaction network
//! by repeatedly applying rules to discovered species until a fixed point or
//! a configured limit. Parsing source text into the declaration model and
//! simulating the generated network belong to other crates.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]

mod ident;
mod decl;
mod expr;
mod pattern;
mod graph;
mod matcher;
mod canonical;
mod rule;
mod transform;
mod registry;
mod network;
mod observable;
mod generator;

// Re-exports for stable public API
pub use canonical::{canonical_form, canonical_label, isomorphic, CanonicalForm};
pub use decl::{Compartment, ComponentDecl, DeclarationError, MoleculeTypeDecl, TypeTable};
pub use expr::{resolve_parameters, Bindings, EvaluationError, Expr, ParameterError};
pub use generator::{
    CancelToken, DeclarationModel, GenerateError, GeneratorOptions, NetworkGenerator, SeedDecl,
    StoichLimit,
};
pub use graph::{Molecule, SpeciesGraph};
pub use ident::{BondLabel, CanonicalLabel, Hash, MolIdx, RuleId, Site, SpeciesId, TypeId};
pub use matcher::{count_embeddings, distinct_images, has_embedding, Embedding, Embeddings};
pub use network::{GenerationStatus, Limit, Network, RateLaw, Reaction, Species};
pub use observable::{compile_observables, CompiledObservable, ObservableDecl, ObservableKind};
pub use pattern::{BondPat, PatSite, PatternComponent, PatternGraph, PatternMolecule};
pub use registry::{RegistryError, SpeciesRegistry};
pub use rule::{compile_rule, PatternError, ReactionRule, RuleDecl, RuleModifiers};
pub use transform::{apply_rule, Application};
