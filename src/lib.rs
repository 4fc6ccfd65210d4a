//! # distkmedoids-rs
//!
//! Data-parallel k-medoids clustering on distributed n-dimensional arrays,
//! built on ndarray.
//!
//! ## Features
//!
//! - **Distributed arrays**: [`DArray`] partitions an ndarray along any axis
//!   across a process group, or replicates it on every process
//! - **Split-aware collectives**: sum, mean, variance, median, min/argmin,
//!   equality, unique and sort give the same answer whatever the layout
//! - **k-medoids**: centers are always real samples; the median of each
//!   cluster is snapped to its nearest sample
//! - **Pluggable metrics**: Manhattan by default, Euclidean available, or any
//!   [`PairwiseMetric`] implementation
//! - **In-process SPMD**: [`run_spmd`] runs one closure per rank on its own
//!   thread, with blocking collectives between them
//! - **Optional BLAS acceleration**: Enable `accelerate` (macOS) or `openblas`
//!   features for faster matrix products
//!
//! ## Example
//!
//! ```rust
//! use distkmedoids_rs::{DArray, KMedoids, SelfComm};
//! use ndarray::Array2;
//! use ndarray_rand::RandomExt;
//! use ndarray_rand::rand_distr::Uniform;
//!
//! // A single process owns the whole dataset
//! let data = Array2::random((500, 8), Uniform::new(-1.0, 1.0));
//! let x = DArray::from_array(data, Some(0), SelfComm::shared()).unwrap();
//!
//! let mut kmedoids = KMedoids::new(5);
//! let labels = kmedoids.fit_predict(&x).unwrap();
//! assert_eq!(labels.gshape(), &[500]);
//! ```
//!
//! ## Running on several ranks
//!
//! ```rust
//! use distkmedoids_rs::{run_spmd, DArray, InitStrategy, KMedoids, KMedoidsConfig};
//! use ndarray::array;
//!
//! let data = array![[1.0, 2.0], [1.0, 3.0], [8.0, 8.0], [9.0, 9.0], [8.0, 9.0]];
//!
//! let centers = run_spmd(3, |comm| {
//!     // every rank keeps its own block of samples
//!     let x = DArray::from_array(data.clone(), Some(0), comm).unwrap();
//!     let config = KMedoidsConfig::new(2)
//!         .with_init(InitStrategy::ProbabilityBased)
//!         .with_random_state(42);
//!     let mut kmedoids = KMedoids::with_config(config);
//!     kmedoids.fit(&x).unwrap();
//!     kmedoids.cluster_centers().unwrap().local().to_owned()
//! });
//!
//! // centers are replicated: every rank holds the same values
//! assert!(centers.windows(2).all(|pair| pair[0] == pair[1]));
//! ```
//!
//! ## BLAS Acceleration
//!
//! ```toml
//! # macOS (recommended - uses Apple Accelerate)
//! distkmedoids-rs = { version = "0.1", features = ["accelerate"] }
//!
//! # Linux/Windows (requires OpenBLAS installed)
//! distkmedoids-rs = { version = "0.1", features = ["openblas"] }
//! ```

// Link BLAS libraries when features are enabled
#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "openblas")]
extern crate openblas_src;

mod algorithm;
mod comm;
mod config;
mod darray;
mod distance;
mod error;
mod indexing;
mod kmedoids;
mod ordering;
mod random;
mod reductions;

pub use algorithm::Termination;
pub use comm::{chunk_counts, displacements, run_spmd, Communicator, Payload, SelfComm, ThreadComm};
pub use config::{InitStrategy, KMedoidsConfig};
pub use darray::{DArray, Device};
pub use distance::{compute_squared_norms, Euclidean, Manhattan, PairwiseMetric};
pub use error::{DArrayError, KMedoidsError};
pub use kmedoids::KMedoids;
pub use random::consistent_rng;
