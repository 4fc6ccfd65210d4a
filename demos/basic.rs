//! Basic example demonstrating distkmedoids-rs usage
//!
//! Run with: RUST_LOG=debug cargo run --example basic --release

use distkmedoids_rs::{run_spmd, DArray, InitStrategy, KMedoids, KMedoidsConfig};
use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    println!("=== distkmedoids-rs example ===\n");

    // 3 clusters in 2D for easy visualization
    let n_samples = 300;
    let n_features = 2;
    let n_clusters = 3;
    let world_size = 4;

    println!("Generating {} samples with {} features...", n_samples, n_features);

    let mut data = Array2::<f64>::zeros((n_samples, n_features));
    let centers = [[-5.0, -5.0], [0.0, 5.0], [5.0, -5.0]];

    for i in 0..n_samples {
        let cluster_idx = i % 3;
        let noise = Array2::random((1, n_features), Uniform::new(-1.0, 1.0));
        data[[i, 0]] = centers[cluster_idx][0] + noise[[0, 0]];
        data[[i, 1]] = centers[cluster_idx][1] + noise[[0, 1]];
    }

    println!("True cluster centers:");
    for (i, center) in centers.iter().enumerate() {
        println!("  Cluster {}: ({:.2}, {:.2})", i, center[0], center[1]);
    }
    println!();

    println!(
        "Running k-medoids with k={} on {} ranks...\n",
        n_clusters, world_size
    );

    let config = KMedoidsConfig::new(n_clusters)
        .with_init(InitStrategy::ProbabilityBased)
        .with_max_iter(100)
        .with_random_state(42);

    // Every rank runs the same program on its own block of samples
    let mut results = run_spmd(world_size, |comm| {
        let x = DArray::from_array(data.clone(), Some(0), comm).expect("Distribution failed");
        let mut kmedoids = KMedoids::with_config(config.clone());
        kmedoids.fit(&x).expect("Training failed");

        let labels = kmedoids
            .labels()
            .expect("Model is fitted")
            .gather()
            .expect("Gather failed");
        let medoids = kmedoids.cluster_centers().expect("Model is fitted").local().to_owned();
        (medoids, labels, kmedoids.n_iter(), kmedoids.termination(), kmedoids.inertia())
    });
    let (medoids, labels, n_iter, termination, inertia) = results.remove(0);

    println!("\nLearned medoids:");
    for (i, medoid) in medoids.outer_iter().enumerate() {
        println!("  Medoid {}: ({:.4}, {:.4})", i, medoid[[0]], medoid[[1]]);
    }
    println!();

    println!(
        "Stopped after {} iterations ({:?}), inertia {:.4}",
        n_iter.unwrap_or(0),
        termination,
        inertia.unwrap_or(f64::NAN)
    );
    println!();

    let mut cluster_counts = vec![0usize; n_clusters];
    for &label in labels.iter() {
        cluster_counts[label as usize] += 1;
    }

    println!("Cluster distribution:");
    for (i, count) in cluster_counts.iter().enumerate() {
        println!(
            "  Cluster {}: {} samples ({:.1}%)",
            i,
            count,
            (*count as f64 / n_samples as f64) * 100.0
        );
    }
    println!();

    println!("First 10 sample assignments:");
    for i in 0..10 {
        println!(
            "  Sample {} at ({:.2}, {:.2}) -> Cluster {}",
            i,
            data[[i, 0]],
            data[[i, 1]],
            labels[[i]]
        );
    }

    println!("\n=== Done! ===");
}
