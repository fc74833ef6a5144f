// ============================================================
// Layer 3 — Sample Domain Types
// ============================================================
// Burn-free carriers for what an input connector produces.
//
// A Sample holds an ordered list of input fields. Position in
// the list is meaningful: field i of every sample in a batch is
// stacked into input tensor i. For masked-LM the convention is
//
//   inputs[0] = token ids   (leading control token at position 0)
//   inputs[1] = token types
//   inputs[2] = attention mask (1 = real token, 0 = padding)
//
// Classification samples additionally carry a class index.

use serde::{Deserialize, Serialize};

/// One positional input of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Integer ids, stacked into an Int tensor `[batch, len]`
    Tokens(Vec<i64>),
    /// Dense values, stacked into a Float tensor `[batch, len]`
    Features(Vec<f32>),
}

impl Field {
    pub fn len(&self) -> usize {
        match self {
            Field::Tokens(v)   => v.len(),
            Field::Features(v) => v.len(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Field::Tokens(_)   => "tokens",
            Field::Features(_) => "features",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Identifier echoed back in predictions
    #[serde(default)]
    pub uri:    String,
    pub inputs: Vec<Field>,
    /// Class index; absent for unlabeled and masked-LM samples
    #[serde(default)]
    pub target: Option<usize>,
}

impl Sample {
    pub fn new(uri: impl Into<String>, inputs: Vec<Field>, target: Option<usize>) -> Self {
        Self { uri: uri.into(), inputs, target }
    }
}

/// Everything an input connector hands to the training loop.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub train:      Vec<Sample>,
    pub test:       Vec<Sample>,
    /// Largest token id seen, the upper bound of random replacement ids
    pub vocab_size: i64,
    /// Reserved id written over masked tokens
    pub mask_id:    i64,
}
