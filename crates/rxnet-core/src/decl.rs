//! Declaration model: molecule types, compartments, and the errors raised
//! while validating references into them.
//!
//! Declarations are parsed once by the (external) front end and are immutable
//! inputs to the engine. All name resolution happens here, eagerly, so that
//! generation never observes an undeclared molecule, component, or state.
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ident::TypeId;

/// A declared component slot: a name plus its finite allowed-state set.
///
/// An empty state set declares a stateless binding site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentDecl {
    /// Component name as written in the declaration.
    pub name: String,
    /// Allowed state names, in declaration order. The first entry is the
    /// default used when a seed or created product leaves the state
    /// unspecified.
    pub states: Vec<String>,
}

impl ComponentDecl {
    /// A stateless component.
    pub fn site(name: &str) -> Self {
        Self { name: name.to_owned(), states: Vec::new() }
    }

    /// A component with a finite allowed-state set.
    pub fn with_states(name: &str, states: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            states: states.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

/// A declared molecule type: name plus ordered component declarations.
///
/// Component names may repeat within a type; repeated names declare
/// structurally identical (symmetric) sites.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoleculeTypeDecl {
    /// Type name.
    pub name: String,
    /// Ordered component slots. Slot order is part of the type's identity.
    pub components: Vec<ComponentDecl>,
}

/// Errors detected while validating the declaration model.
///
/// All variants are fatal and raised before generation starts; nothing is
/// partially generated when one fires.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    /// A molecule type name was declared twice.
    #[error("duplicate molecule type: {0}")]
    DuplicateType(String),
    /// A pattern referenced a molecule type that was never declared.
    #[error("undeclared molecule type: {0}")]
    UnknownType(String),
    /// A pattern referenced a component the molecule type does not declare.
    #[error("molecule type {ty} has no component {component} (occurrence {occurrence})")]
    UnknownComponent {
        /// Molecule type name.
        ty: String,
        /// Component name as referenced.
        component: String,
        /// Zero-based occurrence index among same-named components.
        occurrence: usize,
    },
    /// A pattern referenced a state the component does not allow.
    #[error("component {component} of {ty} has no state {state}")]
    UnknownState {
        /// Molecule type name.
        ty: String,
        /// Component name.
        component: String,
        /// Offending state name.
        state: String,
    },
    /// A seed or pattern bound one component slot more than once.
    #[error("component slot {slot} of {ty} carries more than one bond")]
    BondMultiplicity {
        /// Molecule type name.
        ty: String,
        /// Offending slot index.
        slot: u16,
    },
    /// A compartment tag was referenced but never declared.
    #[error("undeclared compartment: {0}")]
    UnknownCompartment(String),
    /// Parameter definitions form a reference cycle.
    #[error("parameter definitions form a cycle through {0}")]
    ParameterCycle(String),
    /// A seed species pattern is not concrete (wildcard bond or missing
    /// required structure).
    #[error("seed species for rule-free instantiation contains a wildcard bond")]
    NonConcreteSeed,
    /// Same-named component slots declared with different state sets;
    /// symmetric sites must be structurally identical.
    #[error("molecule type {ty}: same-named component {component} declared with differing states")]
    SymmetricSiteMismatch {
        /// Molecule type name.
        ty: String,
        /// Component name.
        component: String,
    },
}

/// Interned compartment tag.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Compartment(pub u32);

/// The immutable table of declared molecule types and compartments.
///
/// Built once from the declaration model; every pattern and graph in the
/// engine resolves names through it at construction time, so downstream code
/// works exclusively with typed indices.
#[derive(Clone, Debug, Default)]
pub struct TypeTable {
    types: Vec<MoleculeTypeDecl>,
    by_name: FxHashMap<String, TypeId>,
    compartments: Vec<String>,
    compartments_by_name: FxHashMap<String, Compartment>,
}

impl TypeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a molecule type.
    ///
    /// # Errors
    /// [`DeclarationError::DuplicateType`] when the name is taken;
    /// [`DeclarationError::SymmetricSiteMismatch`] when same-named slots
    /// disagree on their allowed states.
    pub fn declare(
        &mut self,
        name: &str,
        components: Vec<ComponentDecl>,
    ) -> Result<TypeId, DeclarationError> {
        if self.by_name.contains_key(name) {
            return Err(DeclarationError::DuplicateType(name.to_owned()));
        }
        for (i, a) in components.iter().enumerate() {
            for b in &components[i + 1..] {
                if a.name == b.name && a.states != b.states {
                    return Err(DeclarationError::SymmetricSiteMismatch {
                        ty: name.to_owned(),
                        component: a.name.clone(),
                    });
                }
            }
        }
        let id = TypeId(u32::try_from(self.types.len()).unwrap_or(u32::MAX));
        self.types.push(MoleculeTypeDecl { name: name.to_owned(), components });
        self.by_name.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Declares a compartment tag, returning the existing tag when the name
    /// was declared before.
    pub fn declare_compartment(&mut self, name: &str) -> Compartment {
        if let Some(tag) = self.compartments_by_name.get(name) {
            return *tag;
        }
        let tag = Compartment(u32::try_from(self.compartments.len()).unwrap_or(u32::MAX));
        self.compartments.push(name.to_owned());
        self.compartments_by_name.insert(name.to_owned(), tag);
        tag
    }

    /// Resolves a molecule type name.
    ///
    /// # Errors
    /// Returns [`DeclarationError::UnknownType`] for undeclared names.
    pub fn lookup(&self, name: &str) -> Result<TypeId, DeclarationError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| DeclarationError::UnknownType(name.to_owned()))
    }

    /// Resolves a compartment name.
    ///
    /// # Errors
    /// Returns [`DeclarationError::UnknownCompartment`] for undeclared names.
    pub fn lookup_compartment(&self, name: &str) -> Result<Compartment, DeclarationError> {
        self.compartments_by_name
            .get(name)
            .copied()
            .ok_or_else(|| DeclarationError::UnknownCompartment(name.to_owned()))
    }

    /// Returns the declaration for a type id.
    pub fn get(&self, id: TypeId) -> &MoleculeTypeDecl {
        &self.types[id.0 as usize]
    }

    /// Number of declared molecule types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when no types have been declared.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Resolves the slot index of the `occurrence`-th component named
    /// `component` on type `ty` (zero-based among same-named slots).
    ///
    /// # Errors
    /// Returns [`DeclarationError::UnknownComponent`] when no such slot
    /// exists.
    pub fn component_slot(
        &self,
        ty: TypeId,
        component: &str,
        occurrence: usize,
    ) -> Result<u16, DeclarationError> {
        let decl = self.get(ty);
        let mut seen = 0usize;
        for (slot, comp) in decl.components.iter().enumerate() {
            if comp.name == component {
                if seen == occurrence {
                    return Ok(u16::try_from(slot).unwrap_or(u16::MAX));
                }
                seen += 1;
            }
        }
        Err(DeclarationError::UnknownComponent {
            ty: decl.name.clone(),
            component: component.to_owned(),
            occurrence,
        })
    }

    /// Resolves a state name on a component slot to its index in the allowed
    /// set.
    ///
    /// # Errors
    /// Returns [`DeclarationError::UnknownState`] when the component does not
    /// allow the state.
    pub fn state_index(
        &self,
        ty: TypeId,
        slot: u16,
        state: &str,
    ) -> Result<u16, DeclarationError> {
        let decl = self.get(ty);
        let comp = &decl.components[slot as usize];
        comp.states
            .iter()
            .position(|s| s == state)
            .map(|i| u16::try_from(i).unwrap_or(u16::MAX))
            .ok_or_else(|| DeclarationError::UnknownState {
                ty: decl.name.clone(),
                component: comp.name.clone(),
                state: state.to_owned(),
            })
    }

    /// Physical slot indices belonging to the same name group as `group`
    /// (the representative slot), in declaration order.
    pub fn group_slots(&self, ty: TypeId, group: u16) -> Vec<u16> {
        let decl = self.get(ty);
        let name = &decl.components[group as usize].name;
        decl.components
            .iter()
            .enumerate()
            .filter(|(_, c)| &c.name == name)
            .map(|(i, _)| u16::try_from(i).unwrap_or(u16::MAX))
            .collect()
    }

    /// Number of component slots declared on `ty`.
    pub fn slot_count(&self, ty: TypeId) -> u16 {
        u16::try_from(self.get(ty).components.len()).unwrap_or(u16::MAX)
    }

    /// Default state index for a slot: the first declared state, or `None`
    /// for stateless components.
    pub fn default_state(&self, ty: TypeId, slot: u16) -> Option<u16> {
        let comp = &self.get(ty).components[slot as usize];
        if comp.states.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}
