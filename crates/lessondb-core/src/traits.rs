use crate::error::Result;

/// Turns text into fixed-width vectors. The model itself lives outside this
/// workspace; anything that can produce `dim()`-wide vectors plugs in here.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()])?;
        out.pop()
            .ok_or_else(|| crate::Error::Embedding("embedder returned no vector".into()))
    }
}
