//! Shared model fixtures for integration tests.
#![allow(missing_docs, dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use rxnet_core::{
    BondLabel, BondPat, ComponentDecl, DeclarationModel, Expr, PatternGraph, RuleDecl,
    RuleModifiers, SeedDecl, TypeTable,
};

/// `A(a,b)` with seed `A(a,b)` × `amount` and the chain-growth rule
/// `A(b) + A(a) -> A(b!1).A(a!1)` at rate `kp`.
pub fn polymer_model(amount: f64) -> DeclarationModel {
    let mut types = TypeTable::new();
    types
        .declare("A", vec![ComponentDecl::site("a"), ComponentDecl::site("b")])
        .unwrap();

    let mut seed = PatternGraph::new();
    seed.add_molecule(&types, "A").unwrap();

    let mut r0 = PatternGraph::new();
    let m = r0.add_molecule(&types, "A").unwrap();
    r0.component(&types, m, "b", None, BondPat::Free).unwrap();
    let mut r1 = PatternGraph::new();
    let m = r1.add_molecule(&types, "A").unwrap();
    r1.component(&types, m, "a", None, BondPat::Free).unwrap();
    let mut p = PatternGraph::new();
    let m0 = p.add_molecule(&types, "A").unwrap();
    let m1 = p.add_molecule(&types, "A").unwrap();
    p.component(&types, m0, "b", None, BondPat::Labeled(BondLabel(1))).unwrap();
    p.component(&types, m1, "a", None, BondPat::Labeled(BondLabel(1))).unwrap();

    DeclarationModel {
        parameters: vec![("kp".to_owned(), Expr::constant(1.0))],
        seeds: vec![SeedDecl { pattern: seed, amount: Expr::constant(amount) }],
        rules: vec![RuleDecl {
            label: "bind".to_owned(),
            reactants: vec![r0, r1],
            products: vec![p],
            rate: Expr::param("kp"),
            reverse_rate: None,
            modifiers: RuleModifiers::default(),
        }],
        observables: Vec::new(),
        types,
    }
}

/// `L(r,r)` + `R(l)` with seeds for both monomers and the binding rule
/// `L(r) + R(l) -> L(r!1).R(l!1)`; `match_once` toggles the modifier.
pub fn symmetric_sites_model(match_once: bool) -> DeclarationModel {
    let mut types = TypeTable::new();
    types
        .declare("L", vec![ComponentDecl::site("r"), ComponentDecl::site("r")])
        .unwrap();
    types.declare("R", vec![ComponentDecl::site("l")]).unwrap();

    let mut seed_l = PatternGraph::new();
    seed_l.add_molecule(&types, "L").unwrap();
    let mut seed_r = PatternGraph::new();
    seed_r.add_molecule(&types, "R").unwrap();

    let mut r0 = PatternGraph::new();
    let m = r0.add_molecule(&types, "L").unwrap();
    r0.component(&types, m, "r", None, BondPat::Free).unwrap();
    let mut r1 = PatternGraph::new();
    let m = r1.add_molecule(&types, "R").unwrap();
    r1.component(&types, m, "l", None, BondPat::Free).unwrap();
    let mut p = PatternGraph::new();
    let m0 = p.add_molecule(&types, "L").unwrap();
    let m1 = p.add_molecule(&types, "R").unwrap();
    p.component(&types, m0, "r", None, BondPat::Labeled(BondLabel(1))).unwrap();
    p.component(&types, m1, "l", None, BondPat::Labeled(BondLabel(1))).unwrap();

    DeclarationModel {
        parameters: vec![("kon".to_owned(), Expr::constant(2.0))],
        seeds: vec![
            SeedDecl { pattern: seed_l, amount: Expr::constant(10.0) },
            SeedDecl { pattern: seed_r, amount: Expr::constant(10.0) },
        ],
        rules: vec![RuleDecl {
            label: "bind".to_owned(),
            reactants: vec![r0, r1],
            products: vec![p],
            rate: Expr::param("kon"),
            reverse_rate: None,
            modifiers: RuleModifiers { match_once, ..RuleModifiers::default() },
        }],
        observables: Vec::new(),
        types,
    }
}
