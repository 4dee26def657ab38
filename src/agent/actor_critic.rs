//! Actor-critic agent that builds molecules one atom at a time.
//!
//! A single [`ActorCritic::step`] call turns a batch of observations into one
//! placement decision per observation. The decision is staged: focus atom,
//! element, bond distance, bond angle, dihedral, and finally the dihedral's
//! sign (kappa). Each stage conditions on the ones before it, and every stage
//! is chosen with the same [`Selection`] strategy.

use tch::{nn, Device, Kind, Tensor};

use super::action::{Action, ActionMask, Selection, SubAction, ACTION_WIDTH};
use super::config::AgentConfig;
use super::heads::ActionHeads;
use super::kappa::{Candidate, KappaResolver};
use crate::error::{AgentError, Result};
use crate::geometry::position_atom_helper;
use crate::graph::{GraphBatcher, GraphBuilder};
use crate::nn::{masked_softmax, to_one_hot, Categorical, MessagePassingEncoder, Normal, Sampler};
use crate::spaces::{ActionSpace, Atom, Bag, Observation, ObservationSpace, PlacementAction};

/// Smallest bond distance a sampled action may carry.
pub const MIN_SAMPLED_DISTANCE: f64 = 0.001;

/// Per-observation tensors derived from the parsed molecules.
#[derive(Debug)]
pub struct AtomicTensors {
    /// `(batch, canvas, num_afeats)` atom embeddings, zero beyond the atom count.
    pub features: Tensor,
    /// `(batch, canvas)` atoms eligible as focus.
    pub focus_mask: Tensor,
    /// `(batch, canvas)` focus mask after one more atom is placed.
    pub focus_mask_next: Tensor,
    /// `(batch, num_zs)` remaining bag counts.
    pub element_count: Tensor,
    /// `(batch, 6)` validity of each sub-action.
    pub action_mask: Tensor,
}

/// Result of one [`ActorCritic::step`].
#[derive(Debug)]
pub struct StepOutput {
    /// One internal action per observation.
    pub actions: Vec<Action>,
    /// `(batch, 7)` flat form of `actions`.
    pub action_tensor: Tensor,
    /// `(batch,)` masked sum of the six sub-action log-probabilities.
    pub log_prob: Tensor,
    /// `(batch,)` masked entropy of the focus and element choices.
    pub entropy: Tensor,
    /// `(batch,)` value estimate.
    pub value: Tensor,
    /// `(batch, 6)` masked log-probability of every sub-action.
    pub sub_log_probs: Tensor,
    /// `actions` expressed in the environment's action space.
    pub domain_actions: Vec<PlacementAction>,
}

/// Parsed observation: placed atoms and the remaining bag.
type Parsed = (Vec<Atom>, Bag);

/// Graph-network actor-critic over molecular canvases.
pub struct ActorCritic {
    vs: nn::VarStore,
    encoder: MessagePassingEncoder,
    heads: ActionHeads,
    builder: GraphBuilder,
    batcher: GraphBatcher,
    sampler: Sampler,
    observation_space: ObservationSpace,
    action_space: ActionSpace,
    config: AgentConfig,
    training: bool,
    device: Device,
}

impl ActorCritic {
    /// Creates an agent with freshly initialised weights on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidConfig`] for unusable settings or empty
    /// spaces, and [`AgentError::UnknownElement`] if a bag element cannot be
    /// expressed in the action space.
    pub fn new(
        observation_space: ObservationSpace,
        action_space: ActionSpace,
        config: AgentConfig,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        if observation_space.canvas_size() == 0 {
            return Err(AgentError::InvalidConfig("canvas size must be positive".into()));
        }
        if observation_space.num_zs() == 0 {
            return Err(AgentError::InvalidConfig("bag vocabulary is empty".into()));
        }
        if let Some(&z) = observation_space
            .bag_zs()
            .iter()
            .find(|&&z| action_space.element_index(z).is_none())
        {
            return Err(AgentError::UnknownElement(z));
        }

        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let encoder = MessagePassingEncoder::new(
            &(&root / "encoder"),
            config.num_afeats(),
            config.num_interactions,
            config.update_edges,
            config.cutoff,
        );
        let heads = ActionHeads::new(&(&root / "heads"), &config, observation_space.num_zs() as i64);

        log::info!(
            "actor-critic: width {}, {} interaction blocks, edge updates {}, cutoff {}, canvas {}, {} bag elements, device {:?}",
            config.network_width,
            config.num_interactions,
            config.update_edges,
            config.cutoff,
            observation_space.canvas_size(),
            observation_space.num_zs(),
            device,
        );

        Ok(Self {
            vs,
            encoder,
            heads,
            builder: GraphBuilder::new(config.cutoff),
            batcher: GraphBatcher::new(device),
            sampler: Sampler::new(config.seed),
            observation_space,
            action_space,
            config,
            training: true,
            device,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn observation_space(&self) -> &ObservationSpace {
        &self.observation_space
    }

    pub fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    /// Switches between sampling (training) and argmax (evaluation).
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Restarts the sampling stream.
    pub fn reseed(&mut self, seed: u64) {
        self.sampler.reseed(seed);
    }

    fn parse_all(&self, observations: &[Observation]) -> Result<Vec<Parsed>> {
        observations
            .iter()
            .map(|o| self.observation_space.parse(o))
            .collect()
    }

    /// Embeds every observation's atoms and derives the focus, bag and
    /// sub-action masks.
    pub fn make_atomic_tensors(&self, observations: &[Observation]) -> Result<AtomicTensors> {
        let parsed = self.parse_all(observations)?;
        self.atomic_tensors(&parsed)
    }

    fn atomic_tensors(&self, parsed: &[Parsed]) -> Result<AtomicTensors> {
        let batch = parsed.len();
        let canvas = self.observation_space.canvas_size();
        let num_zs = self.observation_space.num_zs();

        let mut focus_mask = vec![0i32; batch * canvas];
        let mut focus_mask_next = vec![0i32; batch * canvas];
        let mut element_count = Vec::with_capacity(batch * num_zs);
        let mut action_mask = Vec::with_capacity(batch * SubAction::COUNT);

        for (i, (atoms, bag)) in parsed.iter().enumerate() {
            let n = atoms.len();
            // An empty molecule focuses on a null atom in slot 0.
            let (valid, valid_next) = if n > 0 { (n, n + 1) } else { (1, 2) };
            let row = i * canvas;
            focus_mask[row..row + valid.min(canvas)].fill(1);
            focus_mask_next[row..row + valid_next.min(canvas)].fill(1);

            element_count.extend(bag.counts().iter().map(|&c| c as f32));
            action_mask.extend(ActionMask::for_atom_count(n).as_array());
        }

        let molecules: Vec<_> = parsed.iter().map(|(atoms, _)| self.builder.build(atoms)).collect();
        let graphs = self.batcher.collate(&molecules);
        log::debug!(
            "encoding {} graphs: {} nodes, {} edges",
            graphs.len(),
            graphs.total_nodes(),
            graphs.total_edges()
        );
        let nodes = self.encoder.forward(&graphs.concatenate());

        // Scatter node rows into their (observation, slot) positions.
        let slots: Vec<i64> = graphs
            .num_nodes()
            .iter()
            .enumerate()
            .flat_map(|(i, &n)| (0..n).map(move |k| (i * canvas) as i64 + k))
            .collect();
        let (b, a) = (batch as i64, canvas as i64);
        let node_size = self.encoder.node_size();
        let features = Tensor::zeros([b * a, node_size], (Kind::Float, self.device))
            .index_copy(
                0,
                &Tensor::from_slice(&slots).to_device(self.device),
                &nodes,
            )
            .view([b, a, node_size]);

        let to_device = |t: Tensor| t.to_device(self.device);
        Ok(AtomicTensors {
            features,
            focus_mask: to_device(Tensor::from_slice(&focus_mask).view([b, a])),
            focus_mask_next: to_device(Tensor::from_slice(&focus_mask_next).view([b, a])),
            element_count: to_device(Tensor::from_slice(&element_count).view([b, num_zs as i64])),
            action_mask: to_device(Tensor::from_slice(&action_mask).view([b, SubAction::COUNT as i64])),
        })
    }

    /// Runs the staged decision process on a batch of observations.
    ///
    /// With `actions` given, those actions are re-evaluated. Otherwise
    /// actions are sampled in training mode and chosen greedily in
    /// evaluation mode.
    pub fn step(&mut self, observations: &[Observation], actions: Option<&[Action]>) -> Result<StepOutput> {
        let selection = match actions {
            Some(actions) => Selection::Replay(actions),
            None if self.training => Selection::Sample,
            None => Selection::Argmax,
        };
        self.step_with(observations, selection)
    }

    /// [`ActorCritic::step`] with an explicit selection strategy.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ShapeMismatch`] when an observation does not fit
    /// the observation space, or when replayed actions do not match the batch
    /// or index outside the canvas or bag.
    pub fn step_with(&mut self, observations: &[Observation], selection: Selection<'_>) -> Result<StepOutput> {
        let parsed = self.parse_all(observations)?;
        if let Selection::Replay(actions) = selection {
            self.check_replay(actions, &parsed)?;
        }
        for (i, (_, bag)) in parsed.iter().enumerate() {
            if bag.is_empty() {
                log::warn!("observation {i} has an empty bag; element choice is undefined");
            }
        }

        let canvas = self.observation_space.canvas_size() as i64;
        let num_zs = self.observation_space.num_zs() as i64;
        let AtomicTensors {
            features,
            focus_mask,
            element_count,
            action_mask,
            ..
        } = self.atomic_tensors(&parsed)?;

        // Bag latent broadcast onto every atom.
        let latent_bag = self.heads.bag_latent(&element_count);
        let latent_states = Tensor::cat(
            &[
                features.shallow_clone(),
                latent_bag.unsqueeze(1).expand([-1, canvas, -1], false),
            ],
            -1,
        );

        // Focus
        let focus_logits = self.heads.focus_logits(&latent_states);
        let focus_dist = Categorical::from_probs(masked_softmax(&focus_logits, &focus_mask));
        let focus = select_discrete(&focus_dist, selection, &mut self.sampler, self.device, |a| a.focus as i64)?;
        let focus_oh = to_one_hot(&focus, canvas);
        let focused_atom = latent_states
            .transpose(1, 2)
            .matmul(&focus_oh.unsqueeze(-1))
            .squeeze_dim(-1);

        // Element
        let element_mask = element_count.gt(0.0);
        let element_logits = self.heads.element_logits(&focused_atom);
        let element_dist = Categorical::from_probs(masked_softmax(&element_logits, &element_mask));
        let element = select_discrete(&element_dist, selection, &mut self.sampler, self.device, |a| a.element as i64)?;
        let element_oh = to_one_hot(&element, num_zs);

        // Distance, angle, dihedral
        let means = self.heads.continuous_means(&focused_atom, &element_oh);
        let stds = self.heads.stds();
        let distance_dist = Normal::new(means.distance, stds.narrow(0, 0, 1));
        let angle_dist = Normal::new(means.angle, stds.narrow(0, 1, 1));
        let dihedral_dist = Normal::new(means.dihedral, stds.narrow(0, 2, 1));
        let mut distance =
            select_continuous(&distance_dist, selection, &mut self.sampler, self.device, |a| a.distance);
        if matches!(selection, Selection::Sample) {
            distance = distance.clamp_min(MIN_SAMPLED_DISTANCE);
        }
        let angle = select_continuous(&angle_dist, selection, &mut self.sampler, self.device, |a| a.angle);
        let dihedral = select_continuous(&dihedral_dist, selection, &mut self.sampler, self.device, |a| a.dihedral);

        let focus_host = host_i64(&focus)?;
        let element_host = host_i64(&element)?;
        let distance_host = host_f64(&distance)?;
        let angle_host = host_f64(&angle)?;
        let dihedral_host = host_f64(&dihedral)?;

        let candidates = (0..parsed.len())
            .map(|i| {
                let element = element_host[i] as usize;
                let atomic_number = self
                    .observation_space
                    .bag_z(element)
                    .ok_or_else(|| AgentError::shape("element index", self.observation_space.num_zs(), element))?;
                Ok(Candidate {
                    focus: focus_host[i] as usize,
                    atomic_number,
                    distance: distance_host[i],
                    angle: angle_host[i],
                    dihedral: dihedral_host[i],
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // Kappa
        let latent_bag_next = self.heads.bag_latent(&(&element_count - &element_oh));
        let molecules: Vec<Vec<Atom>> = parsed.iter().map(|(atoms, _)| atoms.clone()).collect();
        let kappa_logits = KappaResolver::new(&self.encoder, &self.builder, &self.batcher).kappa_logits(
            &self.heads,
            &molecules,
            &candidates,
            &latent_bag_next,
        );
        let kappa_dist = Categorical::from_logits(&kappa_logits);
        let kappa = select_discrete(&kappa_dist, selection, &mut self.sampler, self.device, |a| i64::from(a.kappa))?;
        let kappa_host = host_i64(&kappa)?;

        let actions: Vec<Action> = match selection {
            Selection::Replay(actions) => actions.to_vec(),
            _ => candidates
                .iter()
                .zip(&element_host)
                .zip(&kappa_host)
                .map(|((c, &element), &kappa)| Action {
                    stop: false,
                    focus: c.focus,
                    element: element as usize,
                    distance: c.distance,
                    angle: c.angle,
                    dihedral: c.dihedral,
                    kappa: kappa != 0,
                })
                .collect(),
        };

        let pooled = pool_atoms(&features, &focus_mask);
        let value = self.heads.value(&Tensor::cat(&[pooled, latent_bag], -1));

        let sub_log_probs = Tensor::cat(
            &[
                focus_dist.log_prob(&focus),
                element_dist.log_prob(&element),
                distance_dist.log_prob(&distance),
                angle_dist.log_prob(&angle),
                dihedral_dist.log_prob(&dihedral),
                kappa_dist.log_prob(&kappa),
            ],
            -1,
        ) * &action_mask;
        let sub_entropies = Tensor::cat(&[focus_dist.entropy(), element_dist.entropy()], -1)
            * action_mask.narrow(-1, 0, 2);

        let domain_actions = actions
            .iter()
            .zip(&molecules)
            .map(|(action, atoms)| self.place(action, atoms))
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "step: {} observations, {} atoms, {} kappa, mode {}",
            parsed.len(),
            molecules.iter().map(Vec::len).sum::<usize>(),
            kappa_host.iter().filter(|&&k| k != 0).count(),
            selection_name(selection),
        );

        let flat: Vec<f32> = actions
            .iter()
            .flat_map(|a| a.to_array().map(|v| v as f32))
            .collect();
        let action_tensor = Tensor::from_slice(&flat)
            .view([actions.len() as i64, ACTION_WIDTH as i64])
            .to_device(self.device);

        Ok(StepOutput {
            actions,
            action_tensor,
            log_prob: sub_log_probs.sum_dim_intlist([-1].as_slice(), false, Kind::Float),
            entropy: sub_entropies.sum_dim_intlist([-1].as_slice(), false, Kind::Float),
            value,
            sub_log_probs,
            domain_actions,
        })
    }

    fn check_replay(&self, actions: &[Action], parsed: &[Parsed]) -> Result<()> {
        if actions.len() != parsed.len() {
            return Err(AgentError::shape("replayed actions", parsed.len(), actions.len()));
        }
        let num_zs = self.observation_space.num_zs();
        for (action, (atoms, _)) in actions.iter().zip(parsed) {
            check_focus(action.focus, atoms.len())?;
            if action.element >= num_zs {
                return Err(AgentError::shape("element index", num_zs, action.element));
            }
        }
        Ok(())
    }

    /// Translates an internal action into the environment's action space.
    pub fn to_action_space(&self, action: &Action, observation: &Observation) -> Result<PlacementAction> {
        let (atoms, _) = self.observation_space.parse(observation)?;
        self.place(action, &atoms)
    }

    fn place(&self, action: &Action, atoms: &[Atom]) -> Result<PlacementAction> {
        if action.stop {
            return self.action_space.stop();
        }
        check_focus(action.focus, atoms.len())?;
        let positions: Vec<[f64; 3]> = atoms.iter().map(|a| a.position).collect();
        let position = position_atom_helper(
            &positions,
            action.focus,
            action.distance,
            action.angle,
            action.signed_dihedral(),
        );
        let z = self
            .observation_space
            .bag_z(action.element)
            .ok_or_else(|| AgentError::shape("element index", self.observation_space.num_zs(), action.element))?;
        self.action_space.build(&Atom::new(z, position))
    }
}

/// A focus must index a placed atom, or the null slot 0 on an empty canvas.
fn check_focus(focus: usize, num_atoms: usize) -> Result<()> {
    let focusable = num_atoms.max(1);
    if focus >= focusable {
        return Err(AgentError::shape("focus index", focusable, focus));
    }
    Ok(())
}

/// `(batch, num_afeats)` sum of the atom features selected by `focus_mask`.
/// Padding slots contribute nothing.
fn pool_atoms(features: &Tensor, focus_mask: &Tensor) -> Tensor {
    focus_mask
        .to_kind(Kind::Float)
        .unsqueeze(1)
        .matmul(features)
        .squeeze_dim(1)
}

fn selection_name(selection: Selection<'_>) -> &'static str {
    match selection {
        Selection::Sample => "sample",
        Selection::Replay(_) => "replay",
        Selection::Argmax => "argmax",
    }
}

/// `(batch, 1)` integer choice from a categorical distribution.
fn select_discrete(
    dist: &Categorical,
    selection: Selection<'_>,
    sampler: &mut Sampler,
    device: Device,
    field: impl Fn(&Action) -> i64,
) -> Result<Tensor> {
    match selection {
        Selection::Sample => dist.sample(sampler),
        Selection::Argmax => Ok(dist.mode()),
        Selection::Replay(actions) => {
            let values: Vec<i64> = actions.iter().map(field).collect();
            Ok(Tensor::from_slice(&values).view([-1, 1]).to_device(device))
        }
    }
}

/// `(batch, 1)` real value from a normal distribution.
fn select_continuous(
    dist: &Normal,
    selection: Selection<'_>,
    sampler: &mut Sampler,
    device: Device,
    field: impl Fn(&Action) -> f64,
) -> Tensor {
    match selection {
        Selection::Sample => dist.sample(sampler),
        Selection::Argmax => dist.mean().shallow_clone(),
        Selection::Replay(actions) => {
            let values: Vec<f32> = actions.iter().map(|a| field(a) as f32).collect();
            Tensor::from_slice(&values).view([-1, 1]).to_device(device)
        }
    }
}

fn host_i64(t: &Tensor) -> Result<Vec<i64>> {
    Ok(Vec::<i64>::try_from(&t.to_device(Device::Cpu).to_kind(Kind::Int64).reshape([-1]))?)
}

fn host_f64(t: &Tensor) -> Result<Vec<f64>> {
    Ok(Vec::<f64>::try_from(
        &t.detach().to_device(Device::Cpu).to_kind(Kind::Double).reshape([-1]),
    )?)
}
