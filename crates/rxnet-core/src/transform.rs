// SPDX-License-Identifier: Apache-2.0
//! Rule application: turning a matched embedding into product graphs.
//!
//! The transformer never touches the matched species. Reactant graphs are
//! merged into one owned arena, the rule's precompiled edit script replays
//! against it (break, form, set-state, consume, create), and the arena is
//! split back into product species. Include/Exclude context checks run
//! against whole graphs before any edit is made.
use rustc_hash::FxHashMap;

use crate::decl::{Compartment, DeclarationError, TypeTable};
use crate::graph::{Molecule, SpeciesGraph};
use crate::ident::{MolIdx, Site};
use crate::matcher::{has_embedding, Embedding};
use crate::pattern::PatSite;
use crate::rule::{BondEnd, ReactionRule};

/// Products of one successful rule application.
#[derive(Clone, Debug)]
pub struct Application {
    /// Product graphs, one per connected component, in deterministic order.
    pub products: Vec<SpeciesGraph>,
}

/// Applies `rule` to a tuple of reactant species under the given embeddings
/// (one per reactant pattern).
///
/// Returns `Ok(None)` when an Include/Exclude context check suppresses the
/// application, or when a compartment move would strand bonded partners
/// without `MoveConnected`.
///
/// # Errors
/// Structural failures during replay (a formed bond landing on an occupied
/// slot) indicate a rule the compile-time checks could not fully guarantee;
/// they abort only this application.
pub fn apply_rule(
    types: &TypeTable,
    rule: &ReactionRule,
    reactant_graphs: &[&SpeciesGraph],
    embeddings: &[Embedding],
) -> Result<Option<Application>, DeclarationError> {
    // 1. Reactant context checks, before any edit.
    for (idx, pat) in &rule.modifiers.include_reactants {
        if *idx < reactant_graphs.len() && !has_embedding(types, pat, reactant_graphs[*idx]) {
            return Ok(None);
        }
    }
    for (idx, pat) in &rule.modifiers.exclude_reactants {
        if *idx < reactant_graphs.len() && has_embedding(types, pat, reactant_graphs[*idx]) {
            return Ok(None);
        }
    }

    // 2. Merge the reactant tuple into one owned arena. Per-molecule source
    // compartments survive the merge for later tag resolution.
    let mut combined = SpeciesGraph::new();
    let mut offsets: Vec<u32> = Vec::with_capacity(reactant_graphs.len());
    let mut source_tag: Vec<Option<Compartment>> = Vec::new();
    for g in reactant_graphs {
        let (merged, offset) = combined.merge(g);
        combined = merged;
        offsets.push(offset);
        source_tag.extend(std::iter::repeat(g.compartment).take(g.molecules.len()));
    }

    let resolve = |graph: usize, site: PatSite| -> Site {
        let s = embeddings[graph].site(site);
        Site::new(MolIdx(s.mol.0 + offsets[graph]), s.slot)
    };
    let resolve_mol =
        |graph: usize, mol: u32| MolIdx(embeddings[graph].mols[mol as usize].0 + offsets[graph]);

    // 3. Create product-only molecules with declared defaults, then the
    // pattern's explicit states.
    let mut created_idx: Vec<MolIdx> = Vec::with_capacity(rule.ops.created.len());
    for c in &rule.ops.created {
        let slots = types.slot_count(c.ty);
        let mut m = Molecule {
            ty: c.ty,
            states: (0..slots).map(|s| types.default_state(c.ty, s)).collect(),
            partners: (0..slots).map(|_| None).collect(),
        };
        for (slot, state) in &c.states {
            m.states[*slot as usize] = Some(*state);
        }
        let idx = MolIdx(u32::try_from(combined.molecules.len()).unwrap_or(u32::MAX));
        combined.molecules.push(m);
        source_tag.push(rule.products[c.product_graph].compartment);
        created_idx.push(idx);
    }

    // 4. Replay the edit script: break, form, set state.
    for (graph, a, _) in &rule.ops.broken {
        // Breaking one endpoint clears both sides of the bond.
        combined.break_bond(resolve(*graph, *a));
    }
    for (a, b) in &rule.ops.formed {
        let sa = resolve_end(a, &resolve, &created_idx);
        let sb = resolve_end(b, &resolve, &created_idx);
        combined.form_bond(sa, sb)?;
    }
    for (graph, site, state) in &rule.ops.state_changes {
        let s = resolve(*graph, *site);
        combined.set_state(s, *state);
    }

    // 5. Consumption. Matched molecules with no product counterpart die;
    // without DeleteMolecules their entire post-break complex dies with
    // them, with matched survivors acting as traversal boundaries.
    let consumed: Vec<MolIdx> =
        rule.ops.consumed.iter().map(|(g, m)| resolve_mol(*g, *m)).collect();
    let mut protected = vec![false; combined.molecules.len()];
    for ((g, m), _) in &rule.ops.survivor_graph {
        protected[resolve_mol(*g, *m).0 as usize] = true;
    }
    for idx in &created_idx {
        protected[idx.0 as usize] = true;
    }
    let doomed: Vec<MolIdx> = if rule.modifiers.delete_molecules {
        consumed
    } else {
        let mut doomed = vec![false; combined.molecules.len()];
        let mut stack = consumed.clone();
        for c in &consumed {
            doomed[c.0 as usize] = true;
        }
        while let Some(cur) = stack.pop() {
            for p in &combined.molecules[cur.0 as usize].partners {
                if let Some(site) = p {
                    let i = site.mol.0 as usize;
                    if !doomed[i] && !protected[i] {
                        doomed[i] = true;
                        stack.push(site.mol);
                    }
                }
            }
        }
        (0..combined.molecules.len())
            .filter(|i| doomed[*i])
            .map(|i| MolIdx(u32::try_from(i).unwrap_or(u32::MAX)))
            .collect()
    };
    let (survived, remap) = combined.without(&doomed);
    let surviving_tag: Vec<Option<Compartment>> = source_tag
        .iter()
        .enumerate()
        .filter(|(i, _)| remap.contains_key(&MolIdx(u32::try_from(*i).unwrap_or(u32::MAX))))
        .map(|(_, t)| *t)
        .collect();

    // 6. Split into product components and resolve compartment tags.
    let parts = survived.split();

    // Desired tag per surviving molecule: the product pattern's compartment
    // for matched survivors and created molecules.
    let mut desired: FxHashMap<MolIdx, Compartment> = FxHashMap::default();
    let mut matched_after: Vec<bool> = vec![false; survived.molecules.len()];
    let mut pattern_home: FxHashMap<usize, MolIdx> = FxHashMap::default();
    for ((g, m), pg) in &rule.ops.survivor_graph {
        let old = resolve_mol(*g, *m);
        if let Some(new) = remap.get(&old) {
            matched_after[new.0 as usize] = true;
            pattern_home.entry(*pg).or_insert(*new);
            if let Some(tag) = rule.products[*pg].compartment {
                desired.insert(*new, tag);
            }
        }
    }
    for (ci, c) in rule.ops.created.iter().enumerate() {
        let old = created_idx[ci];
        if let Some(new) = remap.get(&old) {
            matched_after[new.0 as usize] = true;
            pattern_home.entry(c.product_graph).or_insert(*new);
            if let Some(tag) = rule.products[c.product_graph].compartment {
                desired.insert(*new, tag);
            }
        }
    }

    let mut products = Vec::with_capacity(parts.len());
    let mut component_of: FxHashMap<MolIdx, usize> = FxHashMap::default();
    for (part_idx, (mut graph, members)) in parts.into_iter().enumerate() {
        for m in &members {
            component_of.insert(*m, part_idx);
        }
        let wanted: Vec<Compartment> =
            members.iter().filter_map(|m| desired.get(m).copied()).collect();
        let member_tags: Vec<Option<Compartment>> =
            members.iter().map(|m| surviving_tag[m.0 as usize]).collect();
        if let Some(tag) = wanted.first() {
            let moved = member_tags.iter().any(|t| *t != Some(*tag));
            let baggage = members.iter().any(|m| !matched_after[m.0 as usize]);
            if moved && baggage && !rule.modifiers.move_connected {
                // A species-level move that would drag along molecules the
                // pattern never mentioned; only MoveConnected authorizes it.
                return Ok(None);
            }
            graph.compartment = Some(*tag);
        } else {
            // Unanimous source tag, else untagged.
            let first = member_tags.first().copied().flatten();
            graph.compartment =
                if member_tags.iter().all(|t| *t == first) { first } else { None };
        }
        products.push(graph);
    }

    // 7. Product context checks against whole product graphs.
    for (idx, pat) in &rule.modifiers.include_products {
        if let Some(graph_idx) =
            pattern_home.get(idx).and_then(|home| component_of.get(home).copied())
        {
            if !has_embedding(types, pat, &products[graph_idx]) {
                return Ok(None);
            }
        }
    }
    for (idx, pat) in &rule.modifiers.exclude_products {
        if let Some(graph_idx) =
            pattern_home.get(idx).and_then(|home| component_of.get(home).copied())
        {
            if has_embedding(types, pat, &products[graph_idx]) {
                return Ok(None);
            }
        }
    }

    Ok(Some(Application { products }))
}

fn resolve_end(
    end: &BondEnd,
    resolve: &impl Fn(usize, PatSite) -> Site,
    created_idx: &[MolIdx],
) -> Site {
    match end {
        BondEnd::Reactant { graph, site } => resolve(*graph, *site),
        BondEnd::Created { index, slot } => Site::new(created_idx[*index], *slot),
    }
}
