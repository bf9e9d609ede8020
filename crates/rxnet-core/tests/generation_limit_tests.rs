//! Termination-under-limits scenarios from the chain-growth model.
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::polymer_model;
use rxnet_core::{
    GenerationStatus, GeneratorOptions, Limit, NetworkGenerator, SpeciesId, StoichLimit,
};

#[test]
fn max_iter_halts_after_one_iteration() {
    let options = GeneratorOptions { max_iter: 1, ..GeneratorOptions::default() };
    let network = NetworkGenerator::new(polymer_model(100.0), options)
        .unwrap()
        .generate()
        .unwrap();
    assert_eq!(network.status, GenerationStatus::LimitReached(Limit::MaxIter));
    // One iteration discovers exactly the dimer; the network is non-empty
    // but incomplete.
    assert_eq!(network.species.len(), 2);
    assert_eq!(network.reactions.len(), 1);
    assert_eq!(network.species[0].initial_amount, 100.0);
    assert_eq!(network.species[1].initial_amount, 0.0);
}

#[test]
fn max_agg_three_yields_monomer_dimer_trimer() {
    let options = GeneratorOptions { max_agg: 3, ..GeneratorOptions::default() };
    let network = NetworkGenerator::new(polymer_model(100.0), options)
        .unwrap()
        .generate()
        .unwrap();
    assert_eq!(network.status, GenerationStatus::LimitReached(Limit::MaxAgg));
    // Monomer, dimer, linear trimer; nothing larger.
    assert_eq!(network.species.len(), 3);
    let sizes: Vec<usize> =
        network.species.iter().map(|s| s.graph.molecule_count()).collect();
    assert_eq!(sizes, vec![1, 2, 3]);
    // Monomer+monomer -> dimer and monomer+dimer -> trimer.
    assert_eq!(network.reactions.len(), 2);
    assert_eq!(network.reactions[0].reactants, vec![SpeciesId(0), SpeciesId(0)]);
    assert_eq!(network.reactions[0].products, vec![SpeciesId(1)]);
    let mut second = network.reactions[1].reactants.clone();
    second.sort_unstable();
    assert_eq!(second, vec![SpeciesId(0), SpeciesId(1)]);
    assert_eq!(network.reactions[1].products, vec![SpeciesId(2)]);
    // Monomer+dimer binds through either end of the dimer.
    assert_eq!(network.reactions[1].symmetry_factor, 2);
}

#[test]
fn max_stoich_limits_per_type_count() {
    let model = polymer_model(100.0);
    let ty = model.types.lookup("A").unwrap();
    let mut caps = rustc_hash::FxHashMap::default();
    caps.insert(ty, 2usize);
    let options = GeneratorOptions {
        max_stoich: StoichLimit::PerType(caps),
        ..GeneratorOptions::default()
    };
    let network = NetworkGenerator::new(model, options).unwrap().generate().unwrap();
    assert_eq!(network.status, GenerationStatus::LimitReached(Limit::MaxStoich));
    // The trimer is rejected, so only monomer and dimer exist.
    assert_eq!(network.species.len(), 2);
}

#[test]
fn max_species_keeps_partial_network_valid() {
    let options = GeneratorOptions {
        max_species: 4,
        max_agg: usize::MAX,
        max_iter: 100,
        ..GeneratorOptions::default()
    };
    let network = NetworkGenerator::new(polymer_model(100.0), options)
        .unwrap()
        .generate()
        .unwrap();
    assert_eq!(network.status, GenerationStatus::LimitReached(Limit::MaxSpecies));
    assert!(network.species.len() <= 4);
    // Every recorded reaction references registered species only.
    for r in &network.reactions {
        for id in r.reactants.iter().chain(&r.products) {
            assert!((id.0 as usize) < network.species.len());
        }
    }
}

#[test]
fn unbounded_small_model_converges() {
    // A single binding that saturates: no limit fires.
    let model = common::symmetric_sites_model(false);
    let network = NetworkGenerator::new(model, GeneratorOptions::default())
        .unwrap()
        .generate()
        .unwrap();
    assert_eq!(network.status, GenerationStatus::Converged);
    // L, R, L.R, L.R.R
    assert_eq!(network.species.len(), 4);
}

#[test]
fn cancellation_returns_partial_network() {
    let generator =
        NetworkGenerator::new(polymer_model(100.0), GeneratorOptions::default()).unwrap();
    generator.cancel_token().cancel();
    let network = generator.generate().unwrap();
    assert_eq!(network.status, GenerationStatus::LimitReached(Limit::Cancelled));
    // Seeds are registered before the first iteration runs.
    assert_eq!(network.species.len(), 1);
    assert!(network.reactions.is_empty());
}
