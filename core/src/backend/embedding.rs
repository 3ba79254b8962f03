//! Embedding model input/output

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingModelInput {
    pub values: Vec<String>,
}

impl EmbeddingModelInput {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One embedding vector per input value, in input order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingModelOutput {
    pub values: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<EmbeddingModelUsage>,
}

impl EmbeddingModelOutput {
    /// Embedding for the value at `index`
    pub fn get(&self, index: usize) -> Option<(&str, &[f32])> {
        let value = self.values.get(index)?;
        let embedding = self.embeddings.get(index)?;
        Some((value.as_str(), embedding.as_slice()))
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.embeddings.first().map(Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_lookup() {
        let output = EmbeddingModelOutput {
            values: vec!["a".into(), "b".into()],
            embeddings: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
            usage: None,
        };

        assert_eq!(output.dimensions(), Some(2));
        assert_eq!(output.get(1), Some(("b", &[0.3_f32, 0.4][..])));
        assert!(output.get(2).is_none());
        assert_eq!(EmbeddingModelInput::new(["x", "y"]).values.len(), 2);
    }
}
