//! In-memory acoustic model.
//!
//! A set of physical HMMs whose states share Gaussian mixture densities,
//! plus a logical-name layer that maps context-dependent (triphone) names
//! onto physical models. Pseudo phones synthesised from partial-context
//! state clusters stand in for triphones that have no physical model.
//!
//! All cross-references are dense 0-based ids into the arenas held here.

pub mod binhmm;

use crate::error::{DecodeError, Result};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Log probability value.
pub type LogProb = f32;

/// Smallest representable log probability ("minus infinity").
pub const LOG_ZERO: LogProb = -1.0e10;

/// A single Gaussian density with pre-inverted variance.
#[derive(Debug, Clone)]
pub struct Density {
    /// Mean vector.
    pub mean: Vec<f32>,
    /// Element-wise inverse variance.
    pub ivar: Vec<f32>,
    /// Precomputed `veclen * ln(2*pi) + sum(ln var)`.
    pub gconst: f32,
}

impl Density {
    /// Build a density from a mean and a (non-inverted) variance vector,
    /// computing the Gaussian constant.
    #[must_use]
    pub fn from_variance(mean: Vec<f32>, var: &[f32]) -> Self {
        let gconst = mean.len() as f32 * (2.0 * std::f32::consts::PI).ln()
            + var.iter().map(|v| v.max(1e-10).ln()).sum::<f32>();
        let ivar = var.iter().map(|v| 1.0 / v.max(1e-10)).collect();
        Self { mean, ivar, gconst }
    }
}

/// One mixture component of a state: density id and log weight.
#[derive(Debug, Clone, Copy)]
pub struct Mixture {
    /// Index into [`AcousticModel::densities`].
    pub density: usize,
    /// Log mixture weight.
    pub weight: LogProb,
}

/// An emitting HMM state.
#[derive(Debug, Clone)]
pub struct HmmState {
    /// Mixture components.
    pub mixtures: Vec<Mixture>,
}

/// A transition matrix over `nstate` states including the non-emitting
/// entry (0) and exit (nstate-1) states. Entries are log probabilities,
/// [`LOG_ZERO`] where no transition exists.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Total number of states covered by this matrix.
    pub nstate: usize,
    /// Row-major `nstate * nstate` log probabilities.
    pub a: Vec<LogProb>,
}

impl Transition {
    /// Log probability of the transition `from -> to`.
    #[must_use]
    pub fn prob(&self, from: usize, to: usize) -> LogProb {
        self.a[from * self.nstate + to]
    }
}

/// A physical HMM: a chain of emitting states plus a transition matrix.
#[derive(Debug, Clone)]
pub struct PhysicalHmm {
    /// Model name as defined.
    pub name: String,
    /// Ids of the emitting states, in order (length `nstate - 2`).
    pub states: Vec<usize>,
    /// Index into [`AcousticModel::transitions`].
    pub trans: usize,
}

/// A pseudo phone: per-position state clusters standing in for an
/// unseen context-dependent model.
#[derive(Debug, Clone)]
pub struct PseudoPhone {
    /// The (partial-context) name this pseudo phone answers to.
    pub name: String,
    /// For each emitting state position, the set of candidate state ids.
    pub state_sets: Vec<Vec<usize>>,
    /// Transition matrix borrowed from one member model.
    pub trans: usize,
}

/// Target of a logical HMM name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalBody {
    /// Resolves to a physical model.
    Physical(usize),
    /// Resolves to a synthesised pseudo phone.
    Pseudo(usize),
}

/// A logical HMM name (possibly context-dependent).
#[derive(Debug, Clone)]
pub struct LogicalHmm {
    /// Full logical name, e.g. `a-b+c`.
    pub name: String,
    /// What the name resolves to.
    pub body: LogicalBody,
}

/// The complete acoustic model.
#[derive(Debug, Clone, Default)]
pub struct AcousticModel {
    /// Feature vector length all densities are defined over.
    pub veclen: usize,
    /// True when variances were stored pre-inverted in the source file.
    pub variance_inverted: bool,
    /// True when the model is a tied-mixture model.
    pub tied_mixture: bool,
    /// Maximum number of mixtures in any state.
    pub max_mixture: usize,
    /// True when logical names carry triphone context.
    pub is_triphone: bool,

    /// Gaussian densities.
    pub densities: Vec<Density>,
    /// Emitting states.
    pub states: Vec<HmmState>,
    /// Transition matrices.
    pub transitions: Vec<Transition>,
    /// Physical models.
    pub physical: Vec<PhysicalHmm>,
    /// Pseudo phones.
    pub pseudo: Vec<PseudoPhone>,
    /// Logical name layer.
    pub logical: Vec<LogicalHmm>,

    phys_index: HashMap<String, usize>,
    logical_index: HashMap<String, usize>,
}

/// Reference to the emission source of one lexicon tree position: either a
/// concrete state or a left-context cluster of alternative states.
#[derive(Debug, Clone)]
pub enum StateRef {
    /// One concrete emitting state.
    Single(usize),
    /// A set of alternative states (cross-word context cluster).
    Set(Vec<usize>),
}

impl AcousticModel {
    /// Create an empty model for vectors of `veclen` elements.
    #[must_use]
    pub fn new(veclen: usize) -> Self {
        Self {
            veclen,
            ..Self::default()
        }
    }

    /// Add a density and return its id.
    pub fn add_density(&mut self, density: Density) -> usize {
        self.densities.push(density);
        self.densities.len() - 1
    }

    /// Add a state and return its id.
    pub fn add_state(&mut self, state: HmmState) -> usize {
        self.max_mixture = self.max_mixture.max(state.mixtures.len());
        self.states.push(state);
        self.states.len() - 1
    }

    /// Add a transition matrix and return its id.
    pub fn add_transition(&mut self, trans: Transition) -> usize {
        self.transitions.push(trans);
        self.transitions.len() - 1
    }

    /// Add a physical model, registering it under its name and as a
    /// logical name as well.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already defined.
    pub fn add_physical(&mut self, hmm: PhysicalHmm) -> Result<usize> {
        let name = hmm.name.clone();
        let id = self.physical.len();
        match self.phys_index.entry(name.clone()) {
            Entry::Occupied(_) => {
                return Err(DecodeError::Model(format!("duplicate HMM name: {name}")));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        self.physical.push(hmm);
        if name.contains('-') || name.contains('+') {
            self.is_triphone = true;
        }
        self.add_logical_body(&name, LogicalBody::Physical(id));
        Ok(id)
    }

    /// Map a logical name onto a physical model by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the physical model does not exist.
    pub fn add_logical(&mut self, logical_name: &str, phys_name: &str) -> Result<()> {
        let phys = *self.phys_index.get(phys_name).ok_or_else(|| {
            DecodeError::Model(format!(
                "logical name {logical_name} maps to unknown model {phys_name}"
            ))
        })?;
        if logical_name.contains('-') || logical_name.contains('+') {
            self.is_triphone = true;
        }
        self.add_logical_body(logical_name, LogicalBody::Physical(phys));
        Ok(())
    }

    fn add_logical_body(&mut self, name: &str, body: LogicalBody) {
        if self.logical_index.contains_key(name) {
            return;
        }
        self.logical_index
            .insert(name.to_owned(), self.logical.len());
        self.logical.push(LogicalHmm {
            name: name.to_owned(),
            body,
        });
    }

    /// Look up a logical name.
    #[must_use]
    pub fn logical_id(&self, name: &str) -> Option<usize> {
        self.logical_index.get(name).copied()
    }

    /// Look up a physical model by name.
    #[must_use]
    pub fn physical_id(&self, name: &str) -> Option<usize> {
        self.phys_index.get(name).copied()
    }

    /// Synthesise pseudo phones for every partial-context prefix of the
    /// known context-dependent names (`b`, `b+r`, `l-b`).
    ///
    /// For each position the pseudo phone clusters the states of all
    /// matching physical models. Call once after all models are loaded.
    pub fn make_pseudo_phones(&mut self) {
        if !self.is_triphone {
            return;
        }
        let mut clusters: HashMap<String, Vec<usize>> = HashMap::new();
        for (id, hmm) in self.physical.iter().enumerate() {
            let base = center_name(&hmm.name);
            let right = right_context(&hmm.name);
            let left = left_context(&hmm.name);
            clusters.entry(base.to_owned()).or_default().push(id);
            if let Some(r) = right {
                clusters.entry(format!("{base}+{r}")).or_default().push(id);
            }
            if let Some(l) = left {
                clusters.entry(format!("{l}-{base}")).or_default().push(id);
            }
        }
        for (name, members) in clusters {
            if self.logical_index.contains_key(&name) {
                continue;
            }
            let positions = members
                .iter()
                .map(|&m| self.physical[m].states.len())
                .max()
                .unwrap_or(0);
            if positions == 0 {
                continue;
            }
            let mut state_sets = vec![Vec::new(); positions];
            for &m in &members {
                for (pos, &st) in self.physical[m].states.iter().enumerate() {
                    if !state_sets[pos].contains(&st) {
                        state_sets[pos].push(st);
                    }
                }
            }
            let trans = self.physical[members[0]].trans;
            let pid = self.pseudo.len();
            self.pseudo.push(PseudoPhone {
                name: name.clone(),
                state_sets,
                trans,
            });
            self.add_logical_body(&name, LogicalBody::Pseudo(pid));
        }
    }

    /// The state chain and transition matrix of a logical model.
    ///
    /// Physical models yield singleton state refs; pseudo phones yield
    /// per-position clusters.
    #[must_use]
    pub fn state_chain(&self, logical_id: usize) -> (Vec<StateRef>, usize) {
        match self.logical[logical_id].body {
            LogicalBody::Physical(p) => {
                let hmm = &self.physical[p];
                (
                    hmm.states.iter().map(|&s| StateRef::Single(s)).collect(),
                    hmm.trans,
                )
            }
            LogicalBody::Pseudo(p) => {
                let ps = &self.pseudo[p];
                (
                    ps.state_sets
                        .iter()
                        .map(|set| {
                            if set.len() == 1 {
                                StateRef::Single(set[0])
                            } else {
                                StateRef::Set(set.clone())
                            }
                        })
                        .collect(),
                    ps.trans,
                )
            }
        }
    }

    /// Number of emitting states of a logical model.
    #[must_use]
    pub fn num_states(&self, logical_id: usize) -> usize {
        match self.logical[logical_id].body {
            LogicalBody::Physical(p) => self.physical[p].states.len(),
            LogicalBody::Pseudo(p) => self.pseudo[p].state_sets.len(),
        }
    }
}

/// Center (base) phone of a possibly context-dependent name.
#[must_use]
pub fn center_name(name: &str) -> &str {
    let after_left = match name.find('-') {
        Some(i) => &name[i + 1..],
        None => name,
    };
    match after_left.find('+') {
        Some(i) => &after_left[..i],
        None => after_left,
    }
}

/// Left context of a triphone name, if any.
#[must_use]
pub fn left_context(name: &str) -> Option<&str> {
    name.find('-').map(|i| &name[..i])
}

/// Right context of a triphone name, if any.
#[must_use]
pub fn right_context(name: &str) -> Option<&str> {
    name.rfind('+').map(|i| &name[i + 1..])
}

/// Compose a triphone name from its parts.
#[must_use]
pub fn compose_triphone(left: Option<&str>, base: &str, right: Option<&str>) -> String {
    match (left, right) {
        (Some(l), Some(r)) => format!("{l}-{base}+{r}"),
        (Some(l), None) => format!("{l}-{base}"),
        (None, Some(r)) => format!("{base}+{r}"),
        (None, None) => base.to_owned(),
    }
}
