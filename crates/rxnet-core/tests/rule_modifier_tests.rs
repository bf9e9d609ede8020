//! Modifier semantics: MatchOnce, TotalRate, DeleteMolecules and
//! MoveConnected, including their combined behavior on one rule.
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)]

mod common;

use common::symmetric_sites_model;
use rxnet_core::{
    apply_rule, compile_rule, BondLabel, BondPat, ComponentDecl, Embeddings, Expr,
    GeneratorOptions, NetworkGenerator, PatternGraph, RuleDecl, RuleModifiers, SpeciesGraph,
    TypeTable,
};

#[test]
fn symmetric_sites_without_match_once_double_count() {
    let network = NetworkGenerator::new(symmetric_sites_model(false), GeneratorOptions::default())
        .unwrap()
        .generate()
        .unwrap();
    // L(r,r) + R(l) -> L.R matches through either r slot; both embeddings
    // collapse into one reaction with symmetry factor 2.
    let first = &network.reactions[0];
    assert_eq!(first.symmetry_factor, 2);
    assert_eq!(first.rate_value(&network.parameters).unwrap(), 4.0);
}

#[test]
fn match_once_collapses_automorphic_embeddings() {
    let network = NetworkGenerator::new(symmetric_sites_model(true), GeneratorOptions::default())
        .unwrap()
        .generate()
        .unwrap();
    let first = &network.reactions[0];
    assert_eq!(first.symmetry_factor, 1);
    assert_eq!(first.rate_value(&network.parameters).unwrap(), 2.0);
}

#[test]
fn total_rate_reports_factor_without_folding_it() {
    let mut model = symmetric_sites_model(false);
    model.rules[0].modifiers.total_rate = true;
    let network =
        NetworkGenerator::new(model, GeneratorOptions::default()).unwrap().generate().unwrap();
    let first = &network.reactions[0];
    assert_eq!(first.symmetry_factor, 2);
    // The aggregate rate is the law's value, untouched by the factor.
    assert_eq!(first.rate_value(&network.parameters).unwrap(), 2.0);
}

/// Fixture for the combined-modifier scenario: a transport-degradation rule
/// `A(x!1).B(x!1) -> B(x) @nuc` against the complex `A(x!1).B(x!1,c!2).C(a!2)`
/// in `cyt`, where `C` is a bystander bonded to the surviving `B`.
struct MoveDelete {
    types: TypeTable,
    complex: SpeciesGraph,
    decl: RuleDecl,
}

fn move_delete_fixture(delete_molecules: bool, move_connected: bool) -> MoveDelete {
    let mut types = TypeTable::new();
    let cyt = types.declare_compartment("cyt");
    let nuc = types.declare_compartment("nuc");
    types.declare("A", vec![ComponentDecl::site("x")]).unwrap();
    types.declare("B", vec![ComponentDecl::site("x"), ComponentDecl::site("c")]).unwrap();
    types.declare("C", vec![ComponentDecl::site("a")]).unwrap();

    let mut seed = PatternGraph::new().in_compartment(cyt);
    let a = seed.add_molecule(&types, "A").unwrap();
    let b = seed.add_molecule(&types, "B").unwrap();
    let c = seed.add_molecule(&types, "C").unwrap();
    seed.component(&types, a, "x", None, BondPat::Labeled(BondLabel(1))).unwrap();
    seed.component(&types, b, "x", None, BondPat::Labeled(BondLabel(1))).unwrap();
    seed.component(&types, b, "c", None, BondPat::Labeled(BondLabel(2))).unwrap();
    seed.component(&types, c, "a", None, BondPat::Labeled(BondLabel(2))).unwrap();
    let complex = SpeciesGraph::from_pattern(&types, &seed).unwrap();

    let mut reactant = PatternGraph::new();
    let a = reactant.add_molecule(&types, "A").unwrap();
    let b = reactant.add_molecule(&types, "B").unwrap();
    reactant.component(&types, a, "x", None, BondPat::Labeled(BondLabel(1))).unwrap();
    reactant.component(&types, b, "x", None, BondPat::Labeled(BondLabel(1))).unwrap();
    let mut product = PatternGraph::new().in_compartment(nuc);
    let b = product.add_molecule(&types, "B").unwrap();
    product.component(&types, b, "x", None, BondPat::Free).unwrap();

    let decl = RuleDecl {
        label: "import".to_owned(),
        reactants: vec![reactant],
        products: vec![product],
        rate: Expr::constant(1.0),
        reverse_rate: None,
        modifiers: RuleModifiers {
            delete_molecules,
            move_connected,
            ..RuleModifiers::default()
        },
    };
    MoveDelete { types, complex, decl }
}

fn run_fixture(fx: &MoveDelete) -> Option<Vec<SpeciesGraph>> {
    let rules = compile_rule(&fx.types, &fx.decl, 0).unwrap();
    let rule = &rules[0];
    let embedding = Embeddings::new(&fx.types, &rule.reactants[0], &fx.complex)
        .next()
        .unwrap();
    apply_rule(&fx.types, rule, &[&fx.complex], &[embedding])
        .unwrap()
        .map(|app| app.products)
}

#[test]
fn delete_molecules_and_move_connected_combine() {
    // DeleteMolecules governs the consumed A: it alone is removed. Then
    // MoveConnected governs the surviving B: its bonded bystander C rides
    // along into the nucleus.
    let fx = move_delete_fixture(true, true);
    let products = run_fixture(&fx).unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].molecule_count(), 2);
    assert_eq!(products[0].compartment, Some(fx.types.lookup_compartment("nuc").unwrap()));
}

#[test]
fn move_without_move_connected_is_suppressed() {
    // Without MoveConnected, relocating B would strand the bonded C; the
    // application is suppressed rather than splitting the bond silently.
    let fx = move_delete_fixture(true, false);
    assert!(run_fixture(&fx).is_none());
}

#[test]
fn survivor_boundary_protects_complex_without_delete_molecules() {
    // Even without DeleteMolecules the consumed A's deletion stops at the
    // matched survivor B, so only A itself is removed here; the move then
    // requires MoveConnected as above.
    let fx = move_delete_fixture(false, true);
    let products = run_fixture(&fx).unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].molecule_count(), 2);
}
