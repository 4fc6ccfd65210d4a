use crate::error::KMedoidsError;
use ndarray::Array2;
use std::str::FromStr;

/// How the initial cluster centers are chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum InitStrategy<A> {
    /// k distinct samples drawn uniformly at random
    Random,

    /// Sequential selection where each next center is drawn with probability
    /// proportional to the squared distance to the closest chosen center
    ProbabilityBased,

    /// Caller-provided centers of shape (n_clusters, n_features), replicated
    /// identically on every process
    Explicit(Array2<A>),
}

impl<A> Default for InitStrategy<A> {
    fn default() -> Self {
        InitStrategy::Random
    }
}

impl<A> FromStr for InitStrategy<A> {
    type Err = KMedoidsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(InitStrategy::Random),
            "probability_based" | "kmedians++" => Ok(InitStrategy::ProbabilityBased),
            other => Err(KMedoidsError::InvalidInit(format!(
                "unknown strategy '{}', expected 'random' or 'probability_based'",
                other
            ))),
        }
    }
}

/// Configuration for the KMedoids estimator
#[derive(Debug, Clone)]
pub struct KMedoidsConfig<A = f64> {
    /// Number of clusters
    pub n_clusters: usize,

    /// Initialization strategy for the cluster centers
    pub init: InitStrategy<A>,

    /// Maximum number of iterations. Reaching it is a normal stop, not an error.
    pub max_iter: usize,

    /// Seed for the initialization draws. Without one, a seed is drawn on
    /// rank 0 and shared with the group.
    pub random_state: Option<u64>,
}

impl<A> Default for KMedoidsConfig<A> {
    fn default() -> Self {
        Self {
            n_clusters: 8,
            init: InitStrategy::default(),
            max_iter: 300,
            random_state: None,
        }
    }
}

impl<A> KMedoidsConfig<A> {
    /// Create a new configuration with the specified number of clusters
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            ..Default::default()
        }
    }

    /// Set the initialization strategy
    pub fn with_init(mut self, init: InitStrategy<A>) -> Self {
        self.init = init;
        self
    }

    /// Start from explicit centers
    pub fn with_centers(self, centers: Array2<A>) -> Self {
        self.with_init(InitStrategy::Explicit(centers))
    }

    /// Set the maximum number of iterations
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the random seed
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }
}
