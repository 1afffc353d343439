//! Visit-count tree search over a learned model.
use crate::util::{argmax, softmax};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Model the search plans with.
pub trait SearchModel {
    /// Latent state of a node.
    type Latent;

    /// Number of actions, which is the width of the tree.
    fn num_actions(&self) -> usize;

    /// Prior logits over actions and the value of a latent state.
    fn predict(&self, latent: &Self::Latent) -> Result<(Vec<f32>, f32)>;

    /// Latent state after `action` and the predicted reward.
    fn step(&self, latent: &Self::Latent, action: usize) -> Result<(Self::Latent, f32)>;
}

/// Parameters of [`search`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SearchConfig {
    /// Simulations per search.
    pub num_simulations: usize,

    /// Maximum number of actions from the root along a simulation.
    pub max_sim_depth: usize,

    /// Discount of backed up returns.
    pub discount: f32,

    /// Exploration constant added to the log term of PUCT.
    pub pb_c_init: f32,

    /// Visit count scale of the log term of PUCT.
    pub pb_c_base: f32,
}

/// Bounds of the values seen in one search, to normalize Q into `[0, 1]`.
#[derive(Clone, Debug)]
pub struct MinMaxStats {
    min: f32,
    max: f32,
}

impl Default for MinMaxStats {
    fn default() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }
}

impl MinMaxStats {
    /// Extends the bounds.
    pub fn update(&mut self, v: f32) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    /// Normalized value; unchanged until two distinct values were seen.
    pub fn normalize(&self, v: f32) -> f32 {
        if self.max > self.min {
            (v - self.min) / (self.max - self.min)
        } else {
            v
        }
    }
}

struct Node<L> {
    latent: Option<L>,
    prior: f32,
    reward: f32,
    visits: u32,
    value_sum: f32,
    value_pred: f32,
    children: Vec<usize>,
}

impl<L> Node<L> {
    fn new(prior: f32) -> Self {
        Self {
            latent: None,
            prior,
            reward: 0.0,
            visits: 0,
            value_sum: 0.0,
            value_pred: 0.0,
            children: vec![],
        }
    }

    fn value(&self) -> f32 {
        match self.visits {
            0 => 0.0,
            n => self.value_sum / n as f32,
        }
    }

    fn is_expanded(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Result of [`search`].
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    /// Visit counts of the root's children.
    pub visits: Vec<u32>,

    /// Visit distribution; the prior when no simulation ran.
    pub policy: Vec<f32>,

    /// Mean backed up value of the root; the predicted value when no
    /// simulation ran.
    pub value: f32,

    /// Prior logits of the root.
    pub prior_logits: Vec<f32>,
}

impl SearchResult {
    /// Most visited action, or the arg-max of the prior logits when no
    /// simulation ran.
    pub fn best_action(&self) -> usize {
        match self.visits.iter().sum::<u32>() {
            0 => argmax(&self.prior_logits),
            _ => argmax(&self.visits.iter().map(|&n| n as f32).collect::<Vec<_>>()),
        }
    }

    /// Probabilities proportional to `visits^(1 / temperature)`.
    ///
    /// A non-positive temperature puts all mass on [`Self::best_action`].
    pub fn action_probs(&self, temperature: f32) -> Vec<f32> {
        let n = self.visits.len();
        let total = self.visits.iter().sum::<u32>();
        if temperature <= 0.0 || total == 0 {
            let mut p = vec![0f32; n];
            p[self.best_action()] = 1.0;
            return p;
        }
        let w = self
            .visits
            .iter()
            .map(|&v| (v as f32 / total as f32).powf(1.0 / temperature))
            .collect::<Vec<_>>();
        let z = w.iter().sum::<f32>();
        w.into_iter().map(|x| x / z).collect()
    }
}

/// Arena of nodes of one search.
struct Tree<L> {
    nodes: Vec<Node<L>>,
    stats: MinMaxStats,
}

impl<L> Tree<L> {
    fn expand(&mut self, ix: usize, logits: &[f32], value: f32) {
        let priors = softmax(logits);
        let first = self.nodes.len();
        self.nodes.extend(priors.into_iter().map(Node::new));
        let node = &mut self.nodes[ix];
        node.children = (first..first + logits.len()).collect();
        node.value_pred = value;
    }

    fn ucb(&self, parent: usize, child: usize, config: &SearchConfig) -> f32 {
        let p = &self.nodes[parent];
        let c = &self.nodes[child];
        let n = p.visits as f32;
        let pb_c = ((n + config.pb_c_base + 1.0) / config.pb_c_base).ln() + config.pb_c_init;
        let prior_score = pb_c * n.sqrt() / (c.visits as f32 + 1.0) * c.prior;
        let value_score = match c.visits {
            0 => 0.0,
            _ => self.stats.normalize(c.reward + config.discount * c.value()),
        };
        prior_score + value_score
    }

    fn select(&self, ix: usize, config: &SearchConfig) -> usize {
        let scores = self.nodes[ix]
            .children
            .iter()
            .map(|&c| self.ucb(ix, c, config))
            .collect::<Vec<_>>();
        argmax(&scores)
    }

    /// Adds `value` to the leaf and discounted returns to its ancestors.
    fn backup(&mut self, path: &[usize], value: f32, discount: f32) {
        let mut g = value;
        for &ix in path.iter().rev() {
            let node = &mut self.nodes[ix];
            node.value_sum += g;
            node.visits += 1;
            let q = node.reward + discount * node.value();
            self.stats.update(q);
            g = node.reward + discount * g;
        }
    }
}

/// Runs `config.num_simulations` simulations from `root`.
///
/// Children are created with their priors when a node is expanded and get a
/// latent state from the model the first time a simulation reaches them.
pub fn search<M: SearchModel>(
    model: &M,
    root: M::Latent,
    config: &SearchConfig,
) -> Result<SearchResult> {
    let (prior_logits, root_value) = model.predict(&root)?;
    let mut root_node = Node::new(1.0);
    root_node.latent = Some(root);
    let mut tree = Tree {
        nodes: vec![root_node],
        stats: MinMaxStats::default(),
    };
    tree.expand(0, &prior_logits, root_value);

    for _ in 0..config.num_simulations {
        let mut path = vec![0];
        let mut ix = 0;
        let mut parent = 0;
        let mut action = 0;
        while tree.nodes[ix].is_expanded() && path.len() <= config.max_sim_depth {
            parent = ix;
            action = tree.select(ix, config);
            ix = tree.nodes[ix].children[action];
            path.push(ix);
        }

        let value = if tree.nodes[ix].is_expanded() {
            // depth limit on an expanded node
            tree.nodes[ix].value_pred
        } else {
            let (latent, reward) = match &tree.nodes[parent].latent {
                Some(l) => model.step(l, action)?,
                None => bail!("expanded node {} has no latent state", parent),
            };
            let (logits, value) = model.predict(&latent)?;
            let node = &mut tree.nodes[ix];
            node.latent = Some(latent);
            node.reward = reward;
            tree.expand(ix, &logits, value);
            value
        };
        tree.backup(&path, value, config.discount);
    }

    let root = &tree.nodes[0];
    let visits = root
        .children
        .iter()
        .map(|&c| tree.nodes[c].visits)
        .collect::<Vec<_>>();
    let total = visits.iter().sum::<u32>();
    let (policy, value) = match total {
        0 => (softmax(&prior_logits), root_value),
        _ => (
            visits.iter().map(|&v| v as f32 / total as f32).collect(),
            root.value(),
        ),
    };

    Ok(SearchResult {
        visits,
        policy,
        value,
        prior_logits,
    })
}
