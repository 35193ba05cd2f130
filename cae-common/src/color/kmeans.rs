//! Centroid-refinement clustering in RGB space

use crate::{Error, Result};

/// Termination criteria for k-means
#[derive(Debug, Clone, Copy)]
pub struct TermCriteria {
    /// Stop once no centroid moves further than this between iterations
    pub epsilon: f64,
    /// Hard iteration cap
    pub max_iterations: usize,
}

impl Default for TermCriteria {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            max_iterations: 200,
        }
    }
}

/// Result of a clustering run
#[derive(Debug, Clone)]
pub struct Clusters {
    pub centroids: Vec<[f64; 3]>,
    /// Number of points assigned to each centroid
    pub sizes: Vec<usize>,
    pub iterations: usize,
}

impl Clusters {
    /// Centroid of the most populated cluster (first one wins on ties)
    pub fn dominant(&self) -> [f64; 3] {
        let mut best = 0;
        for (i, size) in self.sizes.iter().enumerate() {
            if *size > self.sizes[best] {
                best = i;
            }
        }
        self.centroids[best]
    }
}

/// Partition `points` into `k` clusters.
///
/// `points` is walked once per iteration instead of being buffered, so
/// clustering a decoded image costs no memory beyond the pixel buffer itself.
/// Per-cluster sums are kept in `f64`.
///
/// Seeding is deterministic farthest-point: the first centroid is the first
/// point, each further centroid is the point farthest from those chosen so far.
/// With `k == 1` the first refinement lands on the arithmetic mean and the
/// next iteration terminates.
pub fn kmeans<I>(points: I, k: usize, criteria: TermCriteria) -> Result<Clusters>
where
    I: Iterator<Item = [u8; 3]> + Clone,
{
    let count = points.clone().count();
    if count == 0 {
        return Err(Error::Decode("no points to cluster".to_string()));
    }
    if k == 0 || k > count {
        return Err(Error::InvalidInput(format!(
            "cluster count {} invalid for {} points",
            k, count
        )));
    }

    let mut centroids = seed_centroids(points.clone(), k);
    let mut sizes = vec![0usize; k];
    let mut iterations = 0;

    while iterations < criteria.max_iterations {
        iterations += 1;

        let mut sums = vec![[0.0f64; 3]; k];
        sizes.iter_mut().for_each(|s| *s = 0);

        for point in points.clone().map(to_point) {
            let nearest = nearest_centroid(&centroids, &point);
            sizes[nearest] += 1;
            for c in 0..3 {
                sums[nearest][c] += point[c];
            }
        }

        let mut max_shift = 0.0f64;
        for i in 0..k {
            // Empty clusters keep their previous position
            if sizes[i] == 0 {
                continue;
            }
            let n = sizes[i] as f64;
            let updated = [sums[i][0] / n, sums[i][1] / n, sums[i][2] / n];
            max_shift = max_shift.max(distance(&centroids[i], &updated));
            centroids[i] = updated;
        }

        if max_shift < criteria.epsilon {
            break;
        }
    }

    Ok(Clusters {
        centroids,
        sizes,
        iterations,
    })
}

fn seed_centroids<I>(points: I, k: usize) -> Vec<[f64; 3]>
where
    I: Iterator<Item = [u8; 3]> + Clone,
{
    let mut centroids: Vec<[f64; 3]> = points.clone().take(1).map(to_point).collect();
    while centroids.len() < k {
        let mut farthest = centroids[0];
        let mut farthest_dist = -1.0;
        for point in points.clone().map(to_point) {
            let d = centroids
                .iter()
                .map(|c| distance(c, &point))
                .fold(f64::MAX, f64::min);
            if d > farthest_dist {
                farthest_dist = d;
                farthest = point;
            }
        }
        centroids.push(farthest);
    }
    centroids
}

fn to_point([r, g, b]: [u8; 3]) -> [f64; 3] {
    [r as f64, g as f64, b as f64]
}

fn nearest_centroid(centroids: &[[f64; 3]], point: &[f64; 3]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::MAX;
    for (i, centroid) in centroids.iter().enumerate() {
        let d = distance(centroid, point);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_cluster_is_mean() {
        let points = [[0, 0, 0], [10, 20, 30], [20, 40, 60]];
        let clusters = kmeans(points.iter().copied(), 1, TermCriteria::default()).unwrap();

        assert_eq!(clusters.centroids.len(), 1);
        assert_eq!(clusters.centroids[0], [10.0, 20.0, 30.0]);
        assert_eq!(clusters.sizes, vec![3]);
        assert!(clusters.iterations <= 2);
    }

    #[test]
    fn test_two_clusters_separate_colors() {
        let mut points = vec![[250, 0, 0]; 6];
        points.extend(vec![[0, 0, 250]; 4]);

        let clusters = kmeans(points.iter().copied(), 2, TermCriteria::default()).unwrap();

        let mut sizes = clusters.sizes.clone();
        sizes.sort();
        assert_eq!(sizes, vec![4, 6]);
        assert_eq!(clusters.dominant(), [250.0, 0.0, 0.0]);
    }

    #[test]
    fn test_iteration_cap_respected() {
        let points = [[0, 0, 0], [255, 255, 255]];
        let criteria = TermCriteria {
            epsilon: 0.0,
            max_iterations: 1,
        };
        let clusters = kmeans(points.iter().copied(), 1, criteria).unwrap();
        assert_eq!(clusters.iterations, 1);
    }

    #[test]
    fn test_invalid_cluster_count() {
        let points = [[1, 2, 3]];
        assert!(kmeans(points.iter().copied(), 0, TermCriteria::default()).is_err());
        assert!(kmeans(points.iter().copied(), 2, TermCriteria::default()).is_err());
    }

    #[test]
    fn test_empty_input_is_decode_error() {
        let err = kmeans(std::iter::empty(), 1, TermCriteria::default()).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_large_input_sums_without_overflow() {
        // 2^20 white pixels would overflow any 8- or 16-bit accumulator
        let points = std::iter::repeat([255, 255, 255]).take(1 << 20);
        let clusters = kmeans(points, 1, TermCriteria::default()).unwrap();
        assert_eq!(clusters.centroids[0], [255.0, 255.0, 255.0]);
        assert_eq!(clusters.sizes, vec![1 << 20]);
    }
}
