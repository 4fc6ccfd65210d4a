use crate::config::{InitStrategy, KMedoidsConfig};
use crate::darray::DArray;
use crate::distance::PairwiseMetric;
use crate::error::{DArrayError, KMedoidsError};
use crate::random::{consistent_rng, weighted_index};
use ndarray::{Array2, NdFloat};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Why the iteration loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// An update left every center exactly where it was
    Converged,

    /// The iteration budget ran out; the last centers and labels are kept
    MaxIterReached,
}

/// Result of the k-medoids algorithm
#[derive(Debug, Clone)]
pub struct KMedoidsResult<A> {
    pub centers: DArray<A>,
    pub labels: DArray<i64>,
    pub n_iterations: usize,
    pub termination: Termination,
    pub inertia: A,
}

/// Centers and assignment produced by one iteration.
struct IterationState<A> {
    centers: DArray<A>,
    labels: DArray<i64>,
}

/// Run k-medoids on `data` of shape (n_samples, n_features).
///
/// Every process of `data`'s group must call this with the same config;
/// all of them run the same sequence of collectives and return the same
/// replicated centers.
pub fn kmedoids_fit<A: NdFloat>(
    data: &DArray<A>,
    config: &KMedoidsConfig<A>,
    metric: &dyn PairwiseMetric<A>,
) -> Result<KMedoidsResult<A>, KMedoidsError> {
    let (n_samples, n_features) = validate_inputs(data, config)?;
    let rank = data.comm().rank();
    let start = Instant::now();

    let mut rng = consistent_rng(data.comm(), config.random_state)?;
    let centers = initialize_centers(data, config, metric, &mut rng)?;
    debug!(
        rank,
        n_samples,
        n_features,
        k = config.n_clusters,
        split = ?data.split(),
        "initialized cluster centers"
    );

    let sample_split = data.split().filter(|&axis| axis == 0);
    let mut current = IterationState {
        centers,
        labels: DArray::zeros(&[n_samples], sample_split, Arc::clone(data.comm()))?,
    };
    let mut termination = Termination::MaxIterReached;
    let mut n_iterations = 0;

    for iteration in 1..=config.max_iter {
        n_iterations = iteration;

        let labels = assign_labels(data, &current.centers, metric)?;
        let centers = update_centers(data, &labels, &current.centers, metric)?;
        let converged = current.centers.equal(&centers)?;
        debug!(rank, iteration, converged, "k-medoids iteration");

        current = IterationState { centers, labels };
        if converged {
            termination = Termination::Converged;
            break;
        }
    }

    let inertia = metric
        .pairwise(data, &current.centers)?
        .min_axis(1, false)?
        .sum()?;

    info!(
        rank,
        n_iterations,
        termination = ?termination,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "k-medoids fit finished"
    );

    Ok(KMedoidsResult {
        centers: current.centers,
        labels: current.labels,
        n_iterations,
        termination,
        inertia,
    })
}

fn validate_inputs<A: NdFloat>(
    data: &DArray<A>,
    config: &KMedoidsConfig<A>,
) -> Result<(usize, usize), KMedoidsError> {
    if data.ndim() != 2 {
        return Err(KMedoidsError::InvalidInput(format!(
            "expected a 2-D array of shape (n_samples, n_features), got shape {:?}",
            data.gshape()
        )));
    }

    let k = config.n_clusters;
    if k == 0 {
        return Err(KMedoidsError::InvalidK(
            "k must be greater than 0".to_string(),
        ));
    }
    if config.max_iter == 0 {
        return Err(KMedoidsError::InvalidMaxIter(
            "max_iter must be greater than 0".to_string(),
        ));
    }

    let (n_samples, n_features) = (data.gshape()[0], data.gshape()[1]);
    match &config.init {
        InitStrategy::Explicit(centers) => {
            if centers.dim() != (k, n_features) {
                return Err(KMedoidsError::InvalidDimensions(format!(
                    "Expected initial centers of shape ({}, {}), got {:?}",
                    k,
                    n_features,
                    centers.dim()
                )));
            }
            if n_samples == 0 {
                return Err(KMedoidsError::InsufficientData(
                    "Input has no samples".to_string(),
                ));
            }
        }
        _ => {
            if n_samples < k {
                return Err(KMedoidsError::InsufficientData(format!(
                    "Number of samples ({}) is less than k ({})",
                    n_samples, k
                )));
            }
        }
    }

    Ok((n_samples, n_features))
}

/// Choose the starting centers, replicated on every process.
fn initialize_centers<A: NdFloat>(
    data: &DArray<A>,
    config: &KMedoidsConfig<A>,
    metric: &dyn PairwiseMetric<A>,
    rng: &mut ChaCha8Rng,
) -> Result<DArray<A>, KMedoidsError> {
    let n_samples = data.gshape()[0];
    let k = config.n_clusters;

    match &config.init {
        InitStrategy::Random => {
            let indices: Vec<usize> = (0..n_samples).collect();
            let selected: Vec<usize> = indices.choose_multiple(rng, k).cloned().collect();
            Ok(data.take_rows(&selected)?)
        }
        InitStrategy::ProbabilityBased => {
            let mut selected = vec![rng.gen_range(0..n_samples)];
            let mut centers = data.take_rows(&selected)?;

            while selected.len() < k {
                let nearest = metric.pairwise(data, &centers)?.min_axis(1, false)?;
                let weights = nearest.map(|&d| d * d);
                // All weights vanish once every sample coincides with a center.
                let next = match weighted_index(&weights, rng)? {
                    Some(index) => index,
                    None => rng.gen_range(0..n_samples),
                };
                selected.push(next);
                centers = data.take_rows(&selected)?;
            }
            Ok(centers)
        }
        InitStrategy::Explicit(centers) => Ok(DArray::replicated(
            centers.clone(),
            Arc::clone(data.comm()),
        )),
    }
}

/// Index of the nearest center for every sample, partitioned like the
/// samples of `data`.
pub(crate) fn assign_labels<A: NdFloat>(
    data: &DArray<A>,
    centers: &DArray<A>,
    metric: &dyn PairwiseMetric<A>,
) -> Result<DArray<i64>, DArrayError> {
    metric.pairwise(data, centers)?.argmin_axis(1, false)
}

/// New centers: the per-feature median of each cluster, snapped to the
/// closest sample of the whole dataset. A cluster without samples keeps its
/// previous center.
///
/// Membership is found by zeroing the rows of other clusters and dropping
/// all-zero rows, so a sample that is itself all zeros never counts
/// towards any median.
pub(crate) fn update_centers<A: NdFloat>(
    data: &DArray<A>,
    labels: &DArray<i64>,
    centers: &DArray<A>,
    metric: &dyn PairwiseMetric<A>,
) -> Result<DArray<A>, DArrayError> {
    let mut new_centers: Array2<A> = centers.local_2d()?.to_owned();

    for cluster in 0..new_centers.nrows() {
        let selection = labels.map(|&label| label == cluster as i64);
        let masked = data.mask_rows(&selection)?;
        let nonzero_rows = masked
            .map(|&v| v.abs())
            .sum_axis(1, false)?
            .map(|&s| s != A::zero());
        let assigned = masked.compress_rows(&nonzero_rows)?;

        if assigned.gshape()[0] == 0 {
            debug!(cluster, "empty cluster keeps its previous center");
            continue;
        }

        let median = assigned.median_axis(0, true)?;
        let closest = metric.pairwise(data, &median)?.argmin_axis(0, false)?;
        let index = closest
            .local()
            .iter()
            .next()
            .copied()
            .ok_or(DArrayError::EmptyReduction("argmin"))?;

        let snapped = data.take_rows(&[index as usize])?;
        new_centers
            .row_mut(cluster)
            .assign(&snapped.local_2d()?.row(0));
    }

    Ok(DArray::replicated(new_centers, Arc::clone(data.comm())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{run_spmd, SelfComm};
    use crate::distance::{Euclidean, Manhattan};
    use ndarray::{array, Axis};
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;

    fn example_data() -> Array2<f64> {
        array![[1.0, 2.0], [1.0, 3.0], [8.0, 8.0], [9.0, 9.0]]
    }

    fn integer_data(n_samples: usize, n_features: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::random_using((n_samples, n_features), Uniform::new(0, 20), &mut rng).mapv(f64::from)
    }

    fn contains_row(data: &Array2<f64>, row: ndarray::ArrayView1<f64>) -> bool {
        data.axis_iter(Axis(0)).any(|candidate| candidate == row)
    }

    #[test]
    fn test_initialize_random_picks_distinct_rows() {
        let data = integer_data(50, 4, 1);
        let x = DArray::from_array(data.clone(), None, SelfComm::shared()).unwrap();
        let config = KMedoidsConfig::new(5).with_random_state(3);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let centers = initialize_centers(&x, &config, &Manhattan::default(), &mut rng).unwrap();
        let centers = centers.into_local();
        assert_eq!(centers.shape(), &[5, 4]);
        for row in centers.axis_iter(Axis(0)) {
            let row = row.into_dimensionality::<ndarray::Ix1>().unwrap();
            assert!(contains_row(&data, row));
        }
    }

    #[test]
    fn test_initialize_probability_based_spreads_over_groups() {
        let data = array![
            [0.0, 0.0],
            [0.0, 1.0],
            [1.0, 0.0],
            [50.0, 50.0],
            [50.0, 51.0],
            [100.0, 0.0],
            [101.0, 0.0]
        ];
        let x = DArray::from_array(data.clone(), Some(0), SelfComm::shared()).unwrap();
        let config = KMedoidsConfig::new(3).with_init(InitStrategy::ProbabilityBased);
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        let centers = initialize_centers(&x, &config, &Manhattan::default(), &mut rng)
            .unwrap()
            .into_local();
        let mut rows: Vec<Vec<f64>> = centers
            .axis_iter(Axis(0))
            .map(|row| row.iter().copied().collect())
            .collect();
        rows.sort_by(|a, b| a.partial_cmp(b).unwrap());
        rows.dedup();
        assert_eq!(rows.len(), 3, "centers must be distinct samples");
    }

    #[test]
    fn test_example_converges_after_one_iteration() {
        let x = DArray::from_array(example_data(), Some(0), SelfComm::shared()).unwrap();
        let config = KMedoidsConfig::new(2)
            .with_centers(array![[1.0, 2.0], [8.0, 8.0]])
            .with_max_iter(10);

        let result = kmedoids_fit(&x, &config, &Manhattan::default()).unwrap();
        assert_eq!(result.n_iterations, 1);
        assert_eq!(result.termination, Termination::Converged);
        assert_eq!(result.labels.gather().unwrap(), array![0i64, 0, 1, 1].into_dyn());
        assert_eq!(
            result.centers.into_local(),
            array![[1.0, 2.0], [8.0, 8.0]].into_dyn()
        );
        // 0 + 1 + 0 + 2
        assert_eq!(result.inertia, 3.0);
    }

    #[test]
    fn test_empty_cluster_keeps_previous_center() {
        let x = DArray::from_array(example_data(), None, SelfComm::shared()).unwrap();
        let labels = DArray::from_array(array![0i64, 0, 0, 0], None, SelfComm::shared()).unwrap();
        let centers =
            DArray::from_array(array![[1.0, 2.0], [100.0, 100.0]], None, SelfComm::shared())
                .unwrap();

        let updated = update_centers(&x, &labels, &centers, &Manhattan::default())
            .unwrap()
            .into_local();
        // median of all four rows is (4.5, 5.5); (1, 3) is the first closest sample
        assert_eq!(updated, array![[1.0, 3.0], [100.0, 100.0]].into_dyn());
    }

    #[test]
    fn test_all_zero_sample_left_out_of_median() {
        let data = array![[0.0, 0.0], [0.0, 1.0], [10.0, 10.0], [10.0, 11.0]];
        let x = DArray::from_array(data, Some(0), SelfComm::shared()).unwrap();
        let config = KMedoidsConfig::new(2).with_centers(array![[0.0, 0.0], [10.0, 10.0]]);

        let result = kmedoids_fit(&x, &config, &Manhattan::default()).unwrap();
        assert_eq!(result.labels.gather().unwrap(), array![0i64, 0, 1, 1].into_dyn());
        // cluster 0 sees only (0, 1); counting (0, 0) would snap back to (0, 0)
        assert_eq!(
            result.centers.into_local(),
            array![[0.0, 1.0], [10.0, 10.0]].into_dyn()
        );
    }

    #[test]
    fn test_cluster_of_only_zero_rows_keeps_previous_center() {
        let x = DArray::from_array(
            array![[0.0, 0.0], [10.0, 10.0], [10.0, 11.0]],
            None,
            SelfComm::shared(),
        )
        .unwrap();
        let labels = DArray::from_array(array![0i64, 1, 1], None, SelfComm::shared()).unwrap();
        let centers =
            DArray::from_array(array![[1.0, 1.0], [10.0, 10.0]], None, SelfComm::shared())
                .unwrap();

        let updated = update_centers(&x, &labels, &centers, &Manhattan::default())
            .unwrap()
            .into_local();
        assert_eq!(updated, array![[1.0, 1.0], [10.0, 10.0]].into_dyn());
    }

    #[test]
    fn test_max_iter_reached_is_not_an_error() {
        let x = DArray::from_array(example_data(), None, SelfComm::shared()).unwrap();
        let config = KMedoidsConfig::new(2)
            .with_centers(array![[1.0, 2.0], [100.0, 100.0]])
            .with_max_iter(1);

        let result = kmedoids_fit(&x, &config, &Manhattan::default()).unwrap();
        assert_eq!(result.termination, Termination::MaxIterReached);
        assert_eq!(result.n_iterations, 1);
        assert_eq!(result.labels.into_local(), array![0i64, 0, 0, 0].into_dyn());
        assert_eq!(
            result.centers.into_local(),
            array![[1.0, 3.0], [100.0, 100.0]].into_dyn()
        );
    }

    #[test]
    fn test_converged_centers_are_a_fixed_point() {
        // three well separated blobs
        let mut data = integer_data(90, 3, 4);
        for (i, mut row) in data.axis_iter_mut(Axis(0)).enumerate() {
            row += 100.0 * (i % 3) as f64;
        }
        let x = DArray::from_array(data, Some(0), SelfComm::shared()).unwrap();
        let config = KMedoidsConfig::new(3).with_random_state(21).with_max_iter(300);
        let metric = Manhattan::default();

        let result = kmedoids_fit(&x, &config, &metric).unwrap();
        assert_eq!(result.termination, Termination::Converged);

        let labels = assign_labels(&x, &result.centers, &metric).unwrap();
        let again = update_centers(&x, &labels, &result.centers, &metric).unwrap();
        assert!(again.equal(&result.centers).unwrap());
    }

    #[test]
    fn test_fit_with_euclidean_metric() {
        let x = DArray::from_array(example_data(), None, SelfComm::shared()).unwrap();
        let config = KMedoidsConfig::new(2).with_centers(array![[1.0, 3.0], [9.0, 9.0]]);

        let result = kmedoids_fit(&x, &config, &Euclidean).unwrap();
        assert_eq!(result.labels.into_local(), array![0i64, 0, 1, 1].into_dyn());
        for row in result.centers.local().axis_iter(Axis(0)) {
            let row = row.into_dimensionality::<ndarray::Ix1>().unwrap();
            assert!(contains_row(&example_data(), row));
        }
    }

    #[test]
    fn test_validation_errors() {
        let comm = SelfComm::shared();
        let x = DArray::from_array(example_data(), None, Arc::clone(&comm)).unwrap();
        let metric = Manhattan::default();

        let zero_k = KMedoidsConfig::new(0);
        assert!(matches!(
            kmedoids_fit(&x, &zero_k, &metric),
            Err(KMedoidsError::InvalidK(_))
        ));

        let too_many = KMedoidsConfig::new(5);
        assert!(matches!(
            kmedoids_fit(&x, &too_many, &metric),
            Err(KMedoidsError::InsufficientData(_))
        ));

        let bad_centers = KMedoidsConfig::new(2).with_centers(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert!(matches!(
            kmedoids_fit(&x, &bad_centers, &metric),
            Err(KMedoidsError::InvalidDimensions(_))
        ));

        let no_iterations = KMedoidsConfig::new(2).with_max_iter(0);
        assert!(matches!(
            kmedoids_fit(&x, &no_iterations, &metric),
            Err(KMedoidsError::InvalidMaxIter(_))
        ));

        let flat = DArray::from_array(array![1.0, 2.0, 3.0], None, comm).unwrap();
        assert!(matches!(
            kmedoids_fit(&flat, &KMedoidsConfig::new(1), &metric),
            Err(KMedoidsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_distributed_example_matches_single_process() {
        let results = run_spmd(3, |comm| {
            let x = DArray::from_array(example_data(), Some(0), comm).unwrap();
            let config = KMedoidsConfig::new(2)
                .with_centers(array![[1.0, 2.0], [8.0, 8.0]])
                .with_max_iter(10);
            let result = kmedoids_fit(&x, &config, &Manhattan::default()).unwrap();
            (
                result.n_iterations,
                result.labels.gather().unwrap(),
                result.centers.into_local(),
            )
        });
        for (n_iterations, labels, centers) in results {
            assert_eq!(n_iterations, 1);
            assert_eq!(labels, array![0i64, 0, 1, 1].into_dyn());
            assert_eq!(centers, array![[1.0, 2.0], [8.0, 8.0]].into_dyn());
        }
    }
}
