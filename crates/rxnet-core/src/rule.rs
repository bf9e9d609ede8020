// SPDX-License-Identifier: Apache-2.0
//! Reaction rules: declarations, compile-time validation, and the
//! precompiled edit script executed by the transformer.
//!
//! A rule compiles once, before generation starts. Everything structural —
//! bond label pairing, reactant/product molecule correspondence, which bonds
//! break and form, which molecules are created or consumed — is resolved
//! here, so rule application is a straight-line replay against an embedding.
use thiserror::Error;

use crate::decl::TypeTable;
use crate::expr::Expr;
use crate::ident::{RuleId, TypeId};
use crate::pattern::{BondPat, PatSite, PatternGraph};

/// Rule modifiers, all defaulting to off.
#[derive(Clone, Debug, Default)]
pub struct RuleModifiers {
    /// Delete only the matched molecules on consumption, preserving bonded
    /// bystanders; without this, consuming a molecule destroys its entire
    /// complex.
    pub delete_molecules: bool,
    /// A repositioned molecule carries its whole connected subgraph into the
    /// product pattern's compartment.
    pub move_connected: bool,
    /// Count one embedding per automorphism-equivalence class per target.
    pub match_once: bool,
    /// Use the rate expression verbatim as an aggregate rate instead of
    /// scaling it by the embedding symmetry factor.
    pub total_rate: bool,
    /// Application ordering hint; higher priorities expand first within an
    /// iteration.
    pub priority: i32,
    /// The indexed reactant's whole graph must contain the pattern.
    pub include_reactants: Vec<(usize, PatternGraph)>,
    /// The indexed reactant's whole graph must not contain the pattern.
    pub exclude_reactants: Vec<(usize, PatternGraph)>,
    /// The indexed product's whole graph must contain the pattern.
    pub include_products: Vec<(usize, PatternGraph)>,
    /// The indexed product's whole graph must not contain the pattern.
    pub exclude_products: Vec<(usize, PatternGraph)>,
}

/// A reaction rule as declared by the front end.
#[derive(Clone, Debug)]
pub struct RuleDecl {
    /// Rule label used in diagnostics and reaction provenance.
    pub label: String,
    /// Reactant patterns; one entry per `+`-separated pattern.
    pub reactants: Vec<PatternGraph>,
    /// Product patterns.
    pub products: Vec<PatternGraph>,
    /// Forward rate law.
    pub rate: Expr,
    /// Reverse rate law; present iff the rule is bidirectional.
    pub reverse_rate: Option<Expr>,
    /// Modifier set.
    pub modifiers: RuleModifiers,
}

/// Structural defects in a rule's reactant/product pattern pair. Fatal per
/// rule, raised at compile time before generation starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// A bond label does not appear on exactly two components of one pattern
    /// graph.
    #[error("rule {rule}: bond label !{label} is unbalanced")]
    UnbalancedBond {
        /// Rule label.
        rule: String,
        /// Offending bond label.
        label: u32,
    },
    /// A product molecule writes a component its reactant counterpart does
    /// not mention, so the edit has no anchored site to act on.
    #[error("rule {rule}: product component has no counterpart in the reactant pattern")]
    UnmatchedProductComponent {
        /// Rule label.
        rule: String,
    },
    /// A formed bond lands on a site the reactant pattern does not guarantee
    /// to be free.
    #[error("rule {rule}: formed bond endpoint is not free in the reactant pattern")]
    FormedBondEndpointNotFree {
        /// Rule label.
        rule: String,
    },
    /// A molecule created by the product pattern carries a wildcard bond.
    #[error("rule {rule}: created product molecule carries a wildcard bond")]
    CreatedMoleculeWildcard {
        /// Rule label.
        rule: String,
    },
}

/// One endpoint of a bond formed by a rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BondEnd {
    /// A site on a matched reactant molecule, addressed through the
    /// embedding of the given reactant pattern.
    Reactant {
        /// Reactant pattern index.
        graph: usize,
        /// Written component inside that pattern.
        site: PatSite,
    },
    /// A site on a molecule created by the product pattern.
    Created {
        /// Index into [`RuleOps::created`].
        index: usize,
        /// Physical slot on the created molecule.
        slot: u16,
    },
}

/// A molecule instantiated fresh by the product pattern.
#[derive(Clone, Debug)]
pub(crate) struct CreatedMol {
    /// Declared type.
    pub ty: TypeId,
    /// Explicit states written by the pattern, as (slot, state) pairs;
    /// everything else takes declared defaults.
    pub states: Vec<(u16, u16)>,
    /// Product pattern this molecule belongs to.
    pub product_graph: usize,
}

/// Precompiled edit script.
#[derive(Clone, Debug, Default)]
pub(crate) struct RuleOps {
    /// Bonds present only on the reactant side, to break. Both endpoints
    /// live in the same reactant pattern.
    pub broken: Vec<(usize, PatSite, PatSite)>,
    /// Bonds present only on the product side, to form.
    pub formed: Vec<(BondEnd, BondEnd)>,
    /// State writes: reactant-side site plus the new state index.
    pub state_changes: Vec<(usize, PatSite, u16)>,
    /// Matched reactant molecules with no product counterpart, as
    /// (reactant pattern, pattern molecule) pairs.
    pub consumed: Vec<(usize, u32)>,
    /// Molecules created fresh by the product side.
    pub created: Vec<CreatedMol>,
    /// For each surviving reactant molecule (reactant pattern, molecule):
    /// the product pattern it lands in.
    pub survivor_graph: Vec<((usize, u32), usize)>,
}

/// A compiled, validated reaction rule.
#[derive(Clone, Debug)]
pub struct ReactionRule {
    /// Compiled rule identifier.
    pub id: RuleId,
    /// Label (bidirectional reverses carry a `_rev` suffix).
    pub label: String,
    /// Reactant patterns.
    pub reactants: Vec<PatternGraph>,
    /// Product patterns.
    pub products: Vec<PatternGraph>,
    /// Rate law for this direction.
    pub rate: Expr,
    /// Modifier set (reverse rules carry mirrored constraints).
    pub modifiers: RuleModifiers,
    pub(crate) ops: RuleOps,
}

/// Compiles a declaration into one or two unidirectional rules.
///
/// A bidirectional declaration splits into a forward rule and a reverse rule
/// whose reactants are the forward products; Include/Exclude constraints are
/// mirrored across the split (a product constraint becomes the reverse
/// rule's reactant constraint and vice versa).
///
/// # Errors
/// Any [`PatternError`] found in either direction.
pub fn compile_rule(
    types: &TypeTable,
    decl: &RuleDecl,
    next_id: u32,
) -> Result<Vec<ReactionRule>, PatternError> {
    let forward = compile_one(
        types,
        &decl.label,
        &decl.reactants,
        &decl.products,
        decl.rate.clone(),
        decl.modifiers.clone(),
        RuleId(next_id),
    )?;
    let Some(reverse_rate) = &decl.reverse_rate else {
        return Ok(vec![forward]);
    };
    let mirrored = RuleModifiers {
        include_reactants: decl.modifiers.include_products.clone(),
        exclude_reactants: decl.modifiers.exclude_products.clone(),
        include_products: decl.modifiers.include_reactants.clone(),
        exclude_products: decl.modifiers.exclude_reactants.clone(),
        ..decl.modifiers.clone()
    };
    let reverse = compile_one(
        types,
        &format!("{}_rev", decl.label),
        &decl.products,
        &decl.reactants,
        reverse_rate.clone(),
        mirrored,
        RuleId(next_id + 1),
    )?;
    Ok(vec![forward, reverse])
}

/// Global (pattern graph, molecule, written component) coordinates used
/// while diffing the two sides.
type GSite = (usize, PatSite);

fn compile_one(
    types: &TypeTable,
    label: &str,
    reactants: &[PatternGraph],
    products: &[PatternGraph],
    rate: Expr,
    modifiers: RuleModifiers,
    id: RuleId,
) -> Result<ReactionRule, PatternError> {
    // 1. Bond labels must pair within every pattern graph on both sides.
    for side in [reactants, products] {
        for graph in side {
            if let Err(bad) = graph.bonds() {
                return Err(PatternError::UnbalancedBond { rule: label.to_owned(), label: bad.0 });
            }
        }
    }

    // 2. Correspondence: the k-th reactant molecule of a type pairs with the
    // k-th product molecule of the same type, in listed order.
    let r_mols: Vec<(usize, u32, TypeId)> = flatten(reactants);
    let p_mols: Vec<(usize, u32, TypeId)> = flatten(products);
    let mut r_used = vec![false; r_mols.len()];
    // product global index -> reactant global index
    let mut source: Vec<Option<usize>> = vec![None; p_mols.len()];
    for (pi, &(_, _, ty)) in p_mols.iter().enumerate() {
        for (ri, &(_, _, rty)) in r_mols.iter().enumerate() {
            if !r_used[ri] && rty == ty {
                r_used[ri] = true;
                source[pi] = Some(ri);
                break;
            }
        }
    }

    let mut ops = RuleOps::default();
    for (ri, used) in r_used.iter().enumerate() {
        if !used {
            let (g, m, _) = r_mols[ri];
            ops.consumed.push((g, m));
        }
    }

    // 3. Component correspondence per surviving pair, plus state changes.
    // Written components pair by (name group, occurrence) within their
    // molecule.
    let mut comp_map: rustc_hash::FxHashMap<GSite, GSite> = rustc_hash::FxHashMap::default();
    let mut created_of: rustc_hash::FxHashMap<usize, usize> = rustc_hash::FxHashMap::default();
    for (pi, src) in source.iter().enumerate() {
        let (pg, pm, ty) = p_mols[pi];
        let product_mol = &products[pg].molecules[pm as usize];
        match src {
            Some(ri) => {
                let (rg, rm, _) = r_mols[*ri];
                ops.survivor_graph.push(((rg, rm), pg));
                let reactant_mol = &reactants[rg].molecules[rm as usize];
                for (pc_idx, pc) in product_mol.comps.iter().enumerate() {
                    let occurrence = product_mol.comps[..pc_idx]
                        .iter()
                        .filter(|c| c.group == pc.group)
                        .count();
                    let mut found = None;
                    let mut seen = 0usize;
                    for (rc_idx, rc) in reactant_mol.comps.iter().enumerate() {
                        if rc.group == pc.group {
                            if seen == occurrence {
                                found = Some(rc_idx);
                                break;
                            }
                            seen += 1;
                        }
                    }
                    let Some(rc_idx) = found else {
                        return Err(PatternError::UnmatchedProductComponent {
                            rule: label.to_owned(),
                        });
                    };
                    let p_site = (
                        pg,
                        PatSite { mol: pm, comp: u32::try_from(pc_idx).unwrap_or(u32::MAX) },
                    );
                    let r_site = (
                        rg,
                        PatSite { mol: rm, comp: u32::try_from(rc_idx).unwrap_or(u32::MAX) },
                    );
                    comp_map.insert(p_site, r_site);
                    if let Some(state) = pc.state {
                        let r_state = reactant_mol.comps[rc_idx].state;
                        if r_state != Some(state) {
                            ops.state_changes.push((r_site.0, r_site.1, state));
                        }
                    }
                }
            }
            None => {
                // Created molecule: resolve written components to physical
                // slots in group-occurrence order, reject wildcards.
                let mut states = Vec::new();
                let mut used_slots: Vec<u16> = Vec::new();
                for pc in &product_mol.comps {
                    match pc.bond {
                        BondPat::Any | BondPat::Bound => {
                            return Err(PatternError::CreatedMoleculeWildcard {
                                rule: label.to_owned(),
                            });
                        }
                        BondPat::Free | BondPat::Labeled(_) => {}
                    }
                    let slot = types
                        .group_slots(ty, pc.group)
                        .into_iter()
                        .find(|s| !used_slots.contains(s))
                        .ok_or_else(|| PatternError::CreatedMoleculeWildcard {
                            rule: label.to_owned(),
                        })?;
                    used_slots.push(slot);
                    if let Some(state) = pc.state {
                        states.push((slot, state));
                    }
                }
                created_of.insert(pi, ops.created.len());
                ops.created.push(CreatedMol { ty, states, product_graph: pg });
            }
        }
    }

    // 4. Bond diff. Reactant bonds translated nowhere (they are already in
    // reactant coordinates); product bonds translate through the component
    // correspondence, with created-molecule endpoints resolved to physical
    // slots.
    let mut r_bonds: Vec<(GSite, GSite)> = Vec::new();
    for (rg, graph) in reactants.iter().enumerate() {
        for (a, b) in graph.bonds().unwrap_or_default() {
            r_bonds.push(norm((rg, a), (rg, b)));
        }
    }
    let mut p_bonds_translated: Vec<(GSite, GSite)> = Vec::new();
    for (pg, graph) in products.iter().enumerate() {
        for (a, b) in graph.bonds().unwrap_or_default() {
            let ga = (pg, a);
            let gb = (pg, b);
            match (comp_map.get(&ga), comp_map.get(&gb)) {
                (Some(ra), Some(rb)) => {
                    let pair = norm(*ra, *rb);
                    p_bonds_translated.push(pair);
                    if !r_bonds.contains(&pair) {
                        ops.formed.push((
                            BondEnd::Reactant { graph: ra.0, site: ra.1 },
                            BondEnd::Reactant { graph: rb.0, site: rb.1 },
                        ));
                    }
                }
                _ => {
                    let end_a = translate_end(products, &comp_map, &created_of, &source, ga, types);
                    let end_b = translate_end(products, &comp_map, &created_of, &source, gb, types);
                    ops.formed.push((end_a, end_b));
                }
            }
        }
    }
    for (a, b) in &r_bonds {
        if !p_bonds_translated.contains(&(*a, *b)) {
            ops.broken.push((a.0, a.1, b.1));
        }
    }

    // 5. A formed bond on a surviving site must be guaranteed free at apply
    // time: the reactant pattern marks it Free, or this rule breaks its
    // existing bond first.
    for (a, b) in &ops.formed {
        for end in [a, b] {
            if let BondEnd::Reactant { graph, site } = end {
                let comp = &reactants[*graph].molecules[site.mol as usize].comps
                    [site.comp as usize];
                let ok = match comp.bond {
                    BondPat::Free => true,
                    BondPat::Labeled(_) => {
                        ops.broken.iter().any(|(g, x, y)| g == graph && (x == site || y == site))
                    }
                    BondPat::Any | BondPat::Bound => false,
                };
                if !ok {
                    return Err(PatternError::FormedBondEndpointNotFree {
                        rule: label.to_owned(),
                    });
                }
            }
        }
    }

    Ok(ReactionRule {
        id,
        label: label.to_owned(),
        reactants: reactants.to_vec(),
        products: products.to_vec(),
        rate,
        modifiers,
        ops,
    })
}

fn flatten(side: &[PatternGraph]) -> Vec<(usize, u32, TypeId)> {
    let mut out = Vec::new();
    for (g, graph) in side.iter().enumerate() {
        for (m, mol) in graph.molecules.iter().enumerate() {
            out.push((g, u32::try_from(m).unwrap_or(u32::MAX), mol.ty));
        }
    }
    out
}

fn norm(a: GSite, b: GSite) -> (GSite, GSite) {
    if (a.0, a.1.mol, a.1.comp) <= (b.0, b.1.mol, b.1.comp) {
        (a, b)
    } else {
        (b, a)
    }
}

fn translate_end(
    products: &[PatternGraph],
    comp_map: &rustc_hash::FxHashMap<GSite, GSite>,
    created_of: &rustc_hash::FxHashMap<usize, usize>,
    source: &[Option<usize>],
    end: GSite,
    types: &TypeTable,
) -> BondEnd {
    if let Some(r) = comp_map.get(&end) {
        return BondEnd::Reactant { graph: r.0, site: r.1 };
    }
    // Created endpoint: find the created molecule's global product index and
    // re-derive the slot the written component resolved to.
    let (pg, site) = end;
    let mut global = 0usize;
    for (g, graph) in products.iter().enumerate() {
        for m in 0..graph.molecules.len() {
            if g == pg && u32::try_from(m).unwrap_or(u32::MAX) == site.mol {
                if source[global].is_none() {
                    if let Some(created_idx) = created_of.get(&global) {
                        let mol = &graph.molecules[m];
                        let mut used_slots: Vec<u16> = Vec::new();
                        for (ci, pc) in mol.comps.iter().enumerate() {
                            let slot = types
                                .group_slots(mol.ty, pc.group)
                                .into_iter()
                                .find(|s| !used_slots.contains(s))
                                .unwrap_or(u16::MAX);
                            used_slots.push(slot);
                            if u32::try_from(ci).unwrap_or(u32::MAX) == site.comp {
                                return BondEnd::Created { index: *created_idx, slot };
                            }
                        }
                    }
                }
            }
            global += 1;
        }
    }
    // Unreachable for validated rules; a dangling endpoint forms no bond.
    BondEnd::Created { index: usize::MAX, slot: u16::MAX }
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
        t
    }

    fn binding_rule(types: &TypeTable) -> RuleDecl {
        // A(b) + A(a) -> A(b!1).A(a!1)
        let mut r0 = PatternGraph::new();
        let m = r0.add_molecule(types, "A").unwrap();
        r0.component(types, m, "b", None, BondPat::Free).unwrap();
        let mut r1 = PatternGraph::new();
        let m = r1.add_molecule(types, "A").unwrap();
        r1.component(types, m, "a", None, BondPat::Free).unwrap();
        let mut p = PatternGraph::new();
        let m0 = p.add_molecule(types, "A").unwrap();
        let m1 = p.add_molecule(types, "A").unwrap();
        p.component(types, m0, "b", None, BondPat::Labeled(BondLabel(1))).unwrap();
        p.component(types, m1, "a", None, BondPat::Labeled(BondLabel(1))).unwrap();
        RuleDecl {
            label: "bind".into(),
            reactants: vec![r0, r1],
            products: vec![p],
            rate: Expr::constant(1.0),
            reverse_rate: None,
            modifiers: RuleModifiers::default(),
        }
    }

    #[test]
    fn binding_rule_compiles_to_one_formed_bond() {
        let t = table();
        let rules = compile_rule(&t, &binding_rule(&t), 0).unwrap();
        assert_eq!(rules.len(), 1);
        let ops = &rules[0].ops;
        assert_eq!(ops.formed.len(), 1);
        assert!(ops.broken.is_empty());
        assert!(ops.consumed.is_empty());
        assert!(ops.created.is_empty());
    }

    #[test]
    fn bidirectional_rule_splits_and_mirrors() {
        let t = table();
        let mut decl = binding_rule(&t);
        decl.reverse_rate = Some(Expr::constant(0.1));
        let mut gate = PatternGraph::new();
        let m = gate.add_molecule(&t, "B").unwrap();
        gate.component(&t, m, "s", Some("P"), BondPat::Any).unwrap();
        decl.modifiers.exclude_products.push((0, gate.clone()));
        let rules = compile_rule(&t, &decl, 0).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].label, "bind_rev");
        // The forward product constraint mirrors into a reverse reactant
        // constraint.
        assert_eq!(rules[1].modifiers.exclude_reactants.len(), 1);
        // And the reverse rule breaks the bond the forward rule forms.
        assert_eq!(rules[1].ops.broken.len(), 1);
        assert!(rules[1].ops.formed.is_empty());
    }

    #[test]
    fn unbalanced_bond_label_is_a_pattern_error() {
        let t = table();
        let mut decl = binding_rule(&t);
        let mut bad = PatternGraph::new();
        let m = bad.add_molecule(&t, "A").unwrap();
        bad.component(&t, m, "a", None, BondPat::Labeled(BondLabel(7))).unwrap();
        decl.products.push(bad);
        let err = compile_rule(&t, &decl, 0).unwrap_err();
        assert!(matches!(err, PatternError::UnbalancedBond { label: 7, .. }));
    }

    #[test]
    fn degradation_consumes_molecule() {
        let t = table();
        let mut r = PatternGraph::new();
        r.add_molecule(&t, "A").unwrap();
        let decl = RuleDecl {
            label: "deg".into(),
            reactants: vec![r],
            products: vec![],
            rate: Expr::constant(1.0),
            reverse_rate: None,
            modifiers: RuleModifiers::default(),
        };
        let rules = compile_rule(&t, &decl, 0).unwrap();
        assert_eq!(rules[0].ops.consumed, vec![(0, 0)]);
    }

    #[test]
    fn synthesis_creates_molecule_with_written_state() {
        let t = table();
        let mut p = PatternGraph::new();
        let m = p.add_molecule(&t, "B").unwrap();
        p.component(&t, m, "s", Some("P"), BondPat::Free).unwrap();
        let decl = RuleDecl {
            label: "synth".into(),
            reactants: vec![],
            products: vec![p],
            rate: Expr::constant(1.0),
            reverse_rate: None,
            modifiers: RuleModifiers::default(),
        };
        let rules = compile_rule(&t, &decl, 0).unwrap();
        assert_eq!(rules[0].ops.created.len(), 1);
        assert_eq!(rules[0].ops.created[0].states, vec![(0, 1)]);
    }

    #[test]
    fn state_flip_rule_records_change() {
        let t = table();
        let mut r = PatternGraph::new();
        let m = r.add_molecule(&t, "B").unwrap();
        r.component(&t, m, "s", Some("U"), BondPat::Any).unwrap();
        let mut p = PatternGraph::new();
        let m = p.add_molecule(&t, "B").unwrap();
        p.component(&t, m, "s", Some("P"), BondPat::Any).unwrap();
        let decl = RuleDecl {
            label: "phos".into(),
            reactants: vec![r],
            products: vec![p],
            rate: Expr::constant(1.0),
            reverse_rate: None,
            modifiers: RuleModifiers::default(),
        };
        let rules = compile_rule(&t, &decl, 0).unwrap();
        assert_eq!(rules[0].ops.state_changes.len(), 1);
        assert_eq!(rules[0].ops.state_changes[0].2, 1);
    }
}
