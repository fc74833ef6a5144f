// ============================================================
// Layer 2 — TraceUseCase
// ============================================================
// Writes a small randomly initialised traced graph for smoke
// runs:
//
//   Bag    — (ids, token_types, mask) ──► (lm_logits, pooled)
//   Mlp    — features ──► ReLU hidden layer
//
// The file lands at an explicit path, or as
// <repository>/checkpoint-0-trace.bin so a later `train` picks
// it up through the repository scan.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::infra::checkpoint::ModelRepository;
use crate::ml::traced::TraceArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    Bag,
    Mlp,
}

#[derive(Debug, Clone)]
pub struct TraceRequest {
    pub kind:   TraceKind,
    /// Vocabulary size (Bag) or feature width (Mlp)
    pub input:  usize,
    /// Embedding width (Bag) or hidden width (Mlp)
    pub width:  usize,
    pub seed:   u64,
    pub output: Option<PathBuf>,
}

pub struct TraceUseCase {
    repository: String,
}

impl TraceUseCase {
    pub fn new(repository: impl Into<String>) -> Self {
        Self { repository: repository.into() }
    }

    pub fn execute(&self, request: &TraceRequest) -> Result<PathBuf> {
        let archive = match request.kind {
            TraceKind::Bag => TraceArchive::bag_of_embeddings(request.input, request.width, request.seed),
            TraceKind::Mlp => TraceArchive::mlp(request.input, request.width, request.seed),
        };
        archive.validate()?;

        let path = match &request.output {
            Some(p) => p.clone(),
            None    => ModelRepository::new(&self.repository)?.trace_path("0"),
        };
        std::fs::write(&path, archive.to_bytes()?)
            .with_context(|| format!("Cannot write trace to '{}'", path.display()))?;

        tracing::info!(
            "Wrote {:?} trace ({} nodes, {} params) to '{}'",
            request.kind, archive.nodes.len(), archive.params.len(), path.display()
        );
        Ok(path)
    }
}
