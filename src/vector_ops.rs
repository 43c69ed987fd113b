use crate::config::{Number, EPSILON, NORM_TOLERANCE};
use wide::f32x8;

/// A vector of unit L2 length. Only built by normalising or by validating,
/// so anything holding one may skip the magnitude terms of cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitVector(Vec<Number>);

impl UnitVector {
    /// Normalises `vector` in place. Returns `None` for zero-magnitude or
    /// non-finite input, which has no direction.
    pub fn normalize(mut vector: Vec<Number>) -> Option<Self> {
        if vector.is_empty() || vector.iter().any(|x| !x.is_finite()) {
            return None;
        }
        if normalize_vector(&mut vector) {
            Some(Self(vector))
        } else {
            None
        }
    }

    /// Accepts a vector that is already unit length within tolerance.
    pub fn from_normalized(vector: Vec<Number>) -> Option<Self> {
        if vector.iter().any(|x| !x.is_finite()) {
            return None;
        }
        let norm = magnitude(&vector);
        ((norm - 1.0).abs() <= NORM_TOLERANCE).then_some(Self(vector))
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[Number] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Number> {
        self.0
    }
}

/// Inner product of two equal-length slices, eight lanes at a time.
pub fn dot_product_simd(a: &[Number], b: &[Number]) -> Number {
    debug_assert_eq!(a.len(), b.len());

    let mut acc = f32x8::splat(0.0);
    let mut chunks_a = a.chunks_exact(8);
    let mut chunks_b = b.chunks_exact(8);

    for (ca, cb) in (&mut chunks_a).zip(&mut chunks_b) {
        let va = f32x8::new([ca[0], ca[1], ca[2], ca[3], ca[4], ca[5], ca[6], ca[7]]);
        let vb = f32x8::new([cb[0], cb[1], cb[2], cb[3], cb[4], cb[5], cb[6], cb[7]]);
        acc += va * vb;
    }

    let tail: Number = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| x * y)
        .sum();

    acc.reduce_add() + tail
}

/// Cosine similarity of two unit vectors, clamped to [-1, 1].
pub fn cosine_similarity(a: &UnitVector, b: &[Number]) -> Number {
    dot_product_simd(a.as_slice(), b).clamp(-1.0, 1.0)
}

pub fn magnitude(vector: &[Number]) -> Number {
    vector.iter().map(|&x| x * x).sum::<Number>().sqrt()
}

/// Returns false (and leaves the vector untouched) when it has no length.
pub fn normalize_vector(vector: &mut [Number]) -> bool {
    let magnitude = magnitude(vector);
    if magnitude > EPSILON {
        for x in vector.iter_mut() {
            *x /= magnitude;
        }
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_vectors_have_unit_norm() {
        let v = UnitVector::normalize(vec![3.0, 4.0, 0.0, 12.0]).unwrap();
        assert!((magnitude(v.as_slice()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_and_nan_vectors_are_rejected() {
        assert!(UnitVector::normalize(vec![0.0; 16]).is_none());
        assert!(UnitVector::normalize(vec![1.0, f32::NAN]).is_none());
        assert!(UnitVector::normalize(Vec::new()).is_none());
    }

    #[test]
    fn from_normalized_checks_length() {
        assert!(UnitVector::from_normalized(vec![0.6, 0.8]).is_some());
        assert!(UnitVector::from_normalized(vec![1.0, 1.0]).is_none());
    }

    #[test]
    fn simd_dot_matches_scalar_for_odd_lengths() {
        for len in [1usize, 7, 8, 9, 17, 384] {
            let a: Vec<f32> = (0..len).map(|i| (i as f32 * 0.37).sin()).collect();
            let b: Vec<f32> = (0..len).map(|i| (i as f32 * 0.11).cos()).collect();
            let scalar: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
            assert!((dot_product_simd(&a, &b) - scalar).abs() < 1e-3, "len {len}");
        }
    }

    #[test]
    fn cosine_of_identical_and_opposite_vectors() {
        let v = UnitVector::normalize(vec![1.0, 2.0, 3.0]).unwrap();
        let neg: Vec<f32> = v.as_slice().iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, v.as_slice()) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-6);
    }
}
