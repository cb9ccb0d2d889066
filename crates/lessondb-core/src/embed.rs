//! Deterministic feature-hashing embedder.
//!
//! Used by the CLI and the tests when no model-backed embedder is injected. Latin
//! words hash as whole tokens; CJK runs hash as single characters and bigrams so
//! Chinese queries share features with Chinese passages.

use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use crate::error::Result;
use crate::tokens::is_cjk;
use crate::traits::Embedder;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    max_len: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize, max_len: usize) -> Self {
        Self { dim: dim.max(1), max_len }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in features(text).iter().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

fn features(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        if !chars.iter().any(|c| is_cjk(*c)) {
            out.push(word.to_lowercase());
            continue;
        }
        for (i, c) in chars.iter().enumerate() {
            if !is_cjk(*c) {
                continue;
            }
            out.push(c.to_string());
            if let Some(next) = chars.get(i + 1).filter(|n| is_cjk(**n)) {
                out.push(format!("{c}{next}"));
            }
        }
    }
    out
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
