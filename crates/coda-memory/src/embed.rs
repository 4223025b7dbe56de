//! Embedding seam for semantic retrieval.
//!
//! The core never prescribes embedding model math: anything implementing
//! [`Embedder`] can back the store. The built-in [`HashEmbedder`] is a
//! deterministic signed feature-hashing projection over word unigrams and
//! bigrams. It has no learned semantics, but it is stable across runs and
//! processes, which is exactly what the persistence and snapshot paths
//! need.

/// Produces fixed-dimension vectors for text.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    /// Returns an L2-normalized vector of `dim()` components.
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic signed feature hashing (unigrams + adjacent bigrams).
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub const DEFAULT_DIM: usize = 256;

    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        let mut add_feature = |feature: &str| {
            let h = fnv1a(feature.as_bytes());
            let bucket = (h % self.dim as u64) as usize;
            // One hash bit decides the sign, which keeps colliding
            // features from always reinforcing each other.
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        };

        for token in &tokens {
            add_feature(token);
        }
        for pair in tokens.windows(2) {
            add_feature(&format!("{} {}", pair[0], pair[1]));
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Cosine similarity of two vectors; 0.0 when either is degenerate.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let e = HashEmbedder::default();
        assert_eq!(e.embed("my name is Ada"), e.embed("my name is Ada"));
    }

    #[test]
    fn identical_text_has_unit_similarity() {
        let e = HashEmbedder::default();
        let v = e.embed("the quick brown fox");
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn overlapping_text_beats_unrelated_text() {
        let e = HashEmbedder::default();
        let name = e.embed("my name is Ada Lovelace");
        let query = e.embed("what is my name");
        let noise = e.embed("the stock market closed higher on tuesday");
        assert!(cosine(&name, &query) > cosine(&noise, &query));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let e = HashEmbedder::default();
        let v = e.embed("");
        assert!(v.iter().all(|&x| x == 0.0));
        assert_eq!(cosine(&v, &v), 0.0);
    }
}
