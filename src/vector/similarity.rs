/// Euclidean length of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scales `v` to unit length. A zero vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Inner product. Callers guarantee equal lengths.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Angular distance between unit vectors with cosine `cos`: `2 (1 - cos)`,
/// the squared chord length.
pub fn angular_distance(cos: f32) -> f32 {
    2.0 * (1.0 - cos)
}

/// Estimated cosine similarity from an angular distance: `1 - d / 2`.
pub fn cosine_from_angular(distance: f32) -> f32 {
    1.0 - distance / 2.0
}
