use crate::algorithm::{assign_labels, kmedoids_fit, KMedoidsResult, Termination};
use crate::config::KMedoidsConfig;
use crate::darray::DArray;
use crate::distance::{Manhattan, PairwiseMetric};
use crate::error::KMedoidsError;
use ndarray::NdFloat;

/// Distributed k-medoids clustering.
///
/// Centers are always actual samples of the training data. Each iteration
/// assigns every sample to its nearest center, takes the per-feature median
/// of each cluster, and moves the center to the sample closest to that
/// median. Fitting stops when the centers no longer change or `max_iter`
/// iterations have run.
///
/// Every process of the data's group must call `fit`/`predict` together.
///
/// # Example
///
/// ```
/// use distkmedoids_rs::{DArray, KMedoids, KMedoidsConfig, SelfComm};
/// use ndarray::array;
///
/// let data = array![[1.0, 2.0], [1.0, 3.0], [8.0, 8.0], [9.0, 9.0]];
/// let x = DArray::from_array(data, Some(0), SelfComm::shared()).unwrap();
///
/// let config = KMedoidsConfig::new(2).with_centers(array![[1.0, 2.0], [8.0, 8.0]]);
/// let mut kmedoids = KMedoids::with_config(config);
/// kmedoids.fit(&x).unwrap();
///
/// let labels = kmedoids.labels().unwrap().gather().unwrap();
/// assert_eq!(labels, array![0i64, 0, 1, 1].into_dyn());
/// ```
pub struct KMedoids<A = f64>
where
    A: NdFloat,
{
    /// Model configuration
    config: KMedoidsConfig<A>,

    /// Distance used for assignment and for snapping medians to samples
    metric: Box<dyn PairwiseMetric<A>>,

    /// Fitted state (None until `fit` succeeds)
    fitted: Option<KMedoidsResult<A>>,
}

impl<A: NdFloat> KMedoids<A> {
    /// Create an estimator with `n_clusters` clusters and default settings.
    ///
    /// # Arguments
    ///
    /// * `n_clusters` - Number of clusters
    ///
    /// # Panics
    ///
    /// Panics if `n_clusters` is 0.
    pub fn new(n_clusters: usize) -> Self {
        assert!(n_clusters > 0, "n_clusters must be greater than 0");
        Self::with_config(KMedoidsConfig::new(n_clusters))
    }

    /// Create an estimator from a full configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Custom configuration for the k-medoids algorithm
    ///
    /// The configuration is validated by `fit`.
    pub fn with_config(config: KMedoidsConfig<A>) -> Self {
        Self {
            config,
            metric: Box::new(Manhattan::default()),
            fitted: None,
        }
    }

    /// Replace the distance metric. Manhattan is the default.
    ///
    /// # Arguments
    ///
    /// * `metric` - Distance used both to assign samples and to snap cluster
    ///   medians to samples
    pub fn with_metric<M>(mut self, metric: M) -> Self
    where
        M: PairwiseMetric<A> + 'static,
    {
        self.metric = Box::new(metric);
        self
    }

    /// Fit the model to `data` of shape (n_samples, n_features).
    ///
    /// # Arguments
    ///
    /// * `data` - Training data, partitioned along any axis
    ///
    /// # Returns
    ///
    /// Returns `&mut Self` for method chaining.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `data` is not 2-D
    /// - The configuration is invalid (k or max_iter of 0, malformed
    ///   explicit centers)
    /// - There are fewer samples than clusters
    ///
    /// A failed fit leaves the model unfitted.
    pub fn fit(&mut self, data: &DArray<A>) -> Result<&mut Self, KMedoidsError> {
        self.fitted = None;
        let result = kmedoids_fit(data, &self.config, self.metric.as_ref())?;
        self.fitted = Some(result);
        Ok(self)
    }

    /// Predict cluster assignments for new data.
    ///
    /// # Arguments
    ///
    /// * `data` - Data to predict, of shape (n_samples, n_features)
    ///
    /// # Returns
    ///
    /// Returns the index of the closest fitted center for every sample, of
    /// shape (n_samples,), partitioned like the samples of `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The model has not been fitted yet
    /// - `data` is not 2-D
    /// - The number of features differs from the training data
    pub fn predict(&self, data: &DArray<A>) -> Result<DArray<i64>, KMedoidsError> {
        let fitted = self.fitted.as_ref().ok_or(KMedoidsError::NotFitted)?;

        if data.ndim() != 2 {
            return Err(KMedoidsError::InvalidInput(format!(
                "expected a 2-D array, got shape {:?}",
                data.gshape()
            )));
        }
        let expected = fitted.centers.gshape()[1];
        let n_features = data.gshape()[1];
        if n_features != expected {
            return Err(KMedoidsError::InvalidDimensions(format!(
                "Expected {} features, got {}",
                expected, n_features
            )));
        }

        Ok(assign_labels(data, &fitted.centers, self.metric.as_ref())?)
    }

    /// Fit the model and predict cluster assignments in one call.
    ///
    /// # Arguments
    ///
    /// * `data` - Training data of shape (n_samples, n_features)
    ///
    /// # Returns
    ///
    /// Returns an array of cluster labels of shape (n_samples,).
    pub fn fit_predict(&mut self, data: &DArray<A>) -> Result<DArray<i64>, KMedoidsError> {
        self.fit(data)?;
        self.predict(data)
    }

    /// Get the centers of the fitted model.
    ///
    /// # Returns
    ///
    /// Returns `Some(&DArray<A>)` of shape (n_clusters, n_features),
    /// replicated, if the model has been fitted, `None` otherwise.
    pub fn cluster_centers(&self) -> Option<&DArray<A>> {
        self.fitted.as_ref().map(|fitted| &fitted.centers)
    }

    /// Assignment of the training samples from the last iteration.
    pub fn labels(&self) -> Option<&DArray<i64>> {
        self.fitted.as_ref().map(|fitted| &fitted.labels)
    }

    /// Number of iterations run by the last fit.
    pub fn n_iter(&self) -> Option<usize> {
        self.fitted.as_ref().map(|fitted| fitted.n_iterations)
    }

    pub fn termination(&self) -> Option<Termination> {
        self.fitted.as_ref().map(|fitted| fitted.termination)
    }

    /// Sum of distances from each training sample to its closest center.
    pub fn inertia(&self) -> Option<A> {
        self.fitted.as_ref().map(|fitted| fitted.inertia)
    }

    /// Get the number of clusters.
    pub fn n_clusters(&self) -> usize {
        self.config.n_clusters
    }

    /// Get the configuration.
    pub fn config(&self) -> &KMedoidsConfig<A> {
        &self.config
    }
}
