// ============================================================
// Layer 5 — Composed Module
// ============================================================
// A frozen traced graph followed by an optional trainable
// linear head:
//
//   inputs ──► TracedGraph ──► [v0, v1, ...] ──► v[classif_in] ──► Linear ──► scores
//                (frozen)       list / tuple                      (trained)
//
// Either part may be absent. Without a traced graph the head
// reads inputs[classif_in] directly; without a head the
// selected value is returned as is.
//
// Burn modules are immutable values: the optimizer consumes a
// ComposedModule and hands back the updated one, so a training
// run owns the module for its whole duration.

use std::path::Path;

use anyhow::{Context, Result};
use burn::{
    module::Ignored,
    nn::{Linear, LinearConfig},
    prelude::*,
    record::{BinFileRecorder, FullPrecisionSettings, Recorder},
};

use crate::application::config::ModelConfig;
use crate::infra::checkpoint::{ModelDescriptor, ModelRepository};
use crate::ml::error::ModelError;
use crate::ml::traced::TracedGraph;
use crate::ml::value::GraphValue;

/// Template wiring a 768-wide BERT pooled output into the head
pub const TEMPLATE_BERT: &str = "bert-classification";
/// Template wiring the first graph output into the head
pub const TEMPLATE_LINEAR: &str = "linear";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Name, shape and trainability of one parameter tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    pub name:      String,
    pub shape:     Vec<usize>,
    pub trainable: bool,
}

#[derive(Module, Debug)]
pub struct ComposedModule<B: Backend> {
    traced:     Option<TracedGraph<B>>,
    head:       Option<Linear<B>>,
    classif_in: usize,
    mode:       Ignored<Mode>,
}

impl<B: Backend> ComposedModule<B> {
    /// Module with neither graph nor head: forwards inputs[0].
    pub fn empty() -> Self {
        Self { traced: None, head: None, classif_in: 0, mode: Ignored(Mode::Train) }
    }

    /// Build the head described by `cfg`. The traced graph and any
    /// saved head weights are attached afterwards with [`Self::load`].
    pub fn new(cfg: &ModelConfig, device: &B::Device) -> Result<Self, ModelError> {
        let mut module = Self::empty();
        if cfg.masked_lm {
            return Ok(module);
        }

        let classif_in = match cfg.template.as_deref() {
            Some(TEMPLATE_BERT)   => 1,
            Some(TEMPLATE_LINEAR) => 0,
            Some(other) => {
                tracing::warn!("Unknown template '{}', no classification head built", other);
                return Ok(module);
            }
            None => return Ok(module),
        };

        let nclasses = cfg
            .nclasses
            .ok_or_else(|| ModelError::Config("nclasses not specified".to_string()))?;
        if nclasses == 0 || cfg.head_in == 0 {
            return Err(ModelError::Config(format!(
                "head needs positive widths, got {} -> {}", cfg.head_in, nclasses
            )));
        }

        module.head       = Some(LinearConfig::new(cfg.head_in, nclasses).init(device));
        module.classif_in = classif_in;
        Ok(module)
    }

    #[cfg(test)]
    pub fn with_traced(mut self, traced: TracedGraph<B>) -> Self {
        self.traced = Some(traced);
        self
    }

    #[cfg(test)]
    pub fn with_head(mut self, head: Linear<B>, classif_in: usize) -> Self {
        self.head       = Some(head);
        self.classif_in = classif_in;
        self
    }

    /// Expose the traced graph's parameters to the optimizer.
    pub fn unfreeze_traced(mut self) -> Self {
        self.traced = self.traced.map(TracedGraph::unfreeze);
        self
    }

    pub fn has_trainable(&self) -> bool {
        self.head.is_some() || self.traced.as_ref().is_some_and(|t| !t.is_frozen())
    }

    /// Rows of the traced graph's embedding table, if it has one.
    pub fn embedding_rows(&self) -> Option<usize> {
        self.traced.as_ref().and_then(TracedGraph::embedding_rows)
    }

    pub fn train(&mut self) {
        self.mode = Ignored(Mode::Train);
    }

    pub fn eval(&mut self) {
        self.mode = Ignored(Mode::Eval);
    }

    // ─── Forward ──────────────────────────────────────────────────────────────
    pub fn forward(&self, inputs: Vec<GraphValue<B>>) -> Result<GraphValue<B>, ModelError> {
        let values = match &self.traced {
            Some(traced) => traced.forward(inputs, self.mode.0 == Mode::Train)?.into_values(),
            None         => inputs,
        };

        let len      = values.len();
        let selected = values
            .into_iter()
            .nth(self.classif_in)
            .ok_or(ModelError::OutputIndex { index: self.classif_in, len })?;

        match &self.head {
            Some(head) => Ok(GraphValue::Tensor(selected.into_tensor()?.apply_linear(head)?)),
            None       => Ok(selected),
        }
    }

    /// Every parameter tensor: traced graph blocks first (trainable
    /// only once unfrozen), then the head's weight and bias.
    pub fn parameters(&self) -> Vec<ParamInfo> {
        let mut params = Vec::new();
        if let Some(traced) = &self.traced {
            for (name, p) in traced.param_names().iter().zip(traced.params()) {
                params.push(ParamInfo {
                    name:      name.clone(),
                    shape:     p.val().dims().to_vec(),
                    trainable: !traced.is_frozen(),
                });
            }
        }
        if let Some(head) = &self.head {
            params.push(ParamInfo {
                name:      "classif.weight".to_string(),
                shape:     head.weight.val().dims().to_vec(),
                trainable: true,
            });
            if let Some(bias) = &head.bias {
                params.push(ParamInfo {
                    name:      "classif.bias".to_string(),
                    shape:     bias.val().dims().to_vec(),
                    trainable: true,
                });
            }
        }
        params
    }

    // ─── Persistence ──────────────────────────────────────────────────────────
    /// Write `checkpoint-<name>-trace.bin` and `checkpoint-<name>.bin`
    /// for whichever parts are present.
    pub fn save_checkpoint(&self, repository: &ModelRepository, name: &str) -> Result<()> {
        if let Some(traced) = &self.traced {
            traced.save(&repository.trace_path(name))?;
        }
        if let Some(head) = &self.head {
            let stem = repository.weights_stem(name);
            BinFileRecorder::<FullPrecisionSettings>::new()
                .record(head.clone().into_record(), stem.clone())
                .with_context(|| format!("Failed to save head weights to '{}'", stem.display()))?;
        }
        tracing::debug!("Saved checkpoint '{}'", name);
        Ok(())
    }

    /// Attach the traced graph and restore head weights named by the descriptor.
    pub fn load(mut self, descriptor: &ModelDescriptor, device: &B::Device) -> Result<Self> {
        if let Some(path) = &descriptor.traced {
            tracing::info!("Loading traced graph from file {}", path.display());
            self.traced = Some(TracedGraph::load(path, device)?);
        }
        if let Some(path) = &descriptor.weights {
            match self.head.take() {
                Some(head) => {
                    tracing::info!("Loading head weights from file {}", path.display());
                    self.head = Some(load_head(head, path, device)?);
                }
                None => tracing::warn!(
                    "Ignoring weights file {}: this configuration has no head",
                    path.display()
                ),
            }
        }
        Ok(self)
    }
}

fn load_head<B: Backend>(head: Linear<B>, path: &Path, device: &B::Device) -> Result<Linear<B>> {
    let record = BinFileRecorder::<FullPrecisionSettings>::new()
        .load(path.to_path_buf(), device)
        .with_context(|| format!("Cannot load head weights '{}'", path.display()))?;
    Ok(head.load_record(record))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::traced::{Node, Output, TraceArchive, TraceBuilder};
    use crate::ml::value::{host_floats, DynTensor};

    type TestBackend = burn::backend::NdArray;

    /// Graph returning `(x, [x, x], relu(x))`
    fn mixed_outputs() -> TracedGraph<TestBackend> {
        let mut b = TraceBuilder::default();
        let x = b.push(Node::Input(0));
        let r = b.push(Node::Relu(x));
        let archive = b.finish(Output::Tuple(vec![
            Output::Node(x),
            Output::List(vec![x, x]),
            Output::Node(r),
        ]));
        TracedGraph::from_bytes(archive.to_bytes().unwrap(), &Default::default()).unwrap()
    }

    fn input(values: &[f32]) -> Vec<GraphValue<TestBackend>> {
        vec![DynTensor::features(values.to_vec(), 1, values.len(), &Default::default()).into()]
    }

    fn head(d_in: usize, d_out: usize) -> Linear<TestBackend> {
        LinearConfig::new(d_in, d_out).init(&Default::default())
    }

    #[test]
    fn test_head_applied_to_selected_slot() {
        let device = Default::default();
        let h      = head(2, 3);
        let module = ComposedModule::empty().with_traced(mixed_outputs()).with_head(h.clone(), 2);

        let out = module.forward(input(&[1.0, -1.0])).unwrap().into_tensor().unwrap();
        let expected = h.forward(Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0]], &device));

        let got  = host_floats(out.into_float2().unwrap()).unwrap();
        let want = host_floats(expected).unwrap();
        for (g, w) in got.iter().zip(&want) {
            approx::assert_abs_diff_eq!(g, w, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_no_head_returns_slot_unmodified() {
        let mut module = ComposedModule::empty().with_traced(mixed_outputs());
        module.classif_in = 1;
        let out = module.forward(input(&[4.0])).unwrap();
        assert_eq!(out.tag(), "TensorList");
    }

    #[test]
    fn test_out_of_range_slot() {
        let module = ComposedModule::empty().with_traced(mixed_outputs()).with_head(head(1, 2), 5);
        let err = module.forward(input(&[1.0])).unwrap_err();
        assert_eq!(err, ModelError::OutputIndex { index: 5, len: 3 });
    }

    #[test]
    fn test_head_width_mismatch_is_an_error() {
        let device  = Default::default();
        let archive = TraceArchive::bag_of_embeddings(10, 16, 0);
        let traced  = TracedGraph::<TestBackend>::from_bytes(archive.to_bytes().unwrap(), &device).unwrap();
        let cfg     = ModelConfig {
            template: Some(TEMPLATE_BERT.to_string()),
            nclasses: Some(2),
            ..ModelConfig::default()
        };
        let mut module = ComposedModule::<TestBackend>::new(&cfg, &device).unwrap().with_traced(traced);
        module.eval();

        let inputs = vec![
            DynTensor::tokens(vec![1, 2, 3], 1, 3, &device).into(),
            DynTensor::tokens(vec![0, 0, 0], 1, 3, &device).into(),
            DynTensor::tokens(vec![1, 1, 1], 1, 3, &device).into(),
        ];
        let err = module.forward(inputs).unwrap_err();
        assert_eq!(err, ModelError::Width { op: "linear head", expected: 768, found: 16 });
        assert_eq!(module.embedding_rows(), Some(11));
    }

    #[test]
    fn test_non_tensor_slot_fails_narrowing() {
        let module = ComposedModule::empty().with_traced(mixed_outputs()).with_head(head(1, 2), 1);
        let err = module.forward(input(&[1.0])).unwrap_err();
        assert_eq!(err, ModelError::TypeMismatch { expected: "Tensor", found: "TensorList" });
    }

    #[test]
    fn test_without_traced_reads_inputs_directly() {
        let module = ComposedModule::<TestBackend>::empty().with_head(head(2, 2), 0);
        let out = module.forward(input(&[0.5, 0.5])).unwrap().into_tensor().unwrap();
        assert_eq!(out.dims(), vec![1, 2]);

        let passthrough = ComposedModule::<TestBackend>::empty();
        let out = passthrough.forward(input(&[7.0])).unwrap().into_tensor().unwrap();
        assert_eq!(host_floats(out.into_float2().unwrap()).unwrap(), vec![7.0]);
    }

    #[test]
    fn test_parameters_order() {
        let archive = TraceArchive::mlp(3, 4, 0);
        let traced  = TracedGraph::<TestBackend>::from_bytes(archive.to_bytes().unwrap(), &Default::default()).unwrap();
        let module  = ComposedModule::empty().with_traced(traced).with_head(head(4, 2), 0);

        let names: Vec<_> = module.parameters().into_iter().map(|p| (p.name, p.trainable)).collect();
        assert_eq!(names, vec![
            ("fc1.weight".to_string(), false),
            ("fc1.bias".to_string(), false),
            ("classif.weight".to_string(), true),
            ("classif.bias".to_string(), true),
        ]);
        assert_eq!(module.parameters()[2].shape, vec![4, 2]);
    }

    #[test]
    fn test_template_requires_nclasses() {
        let cfg = ModelConfig { template: Some(TEMPLATE_BERT.to_string()), ..ModelConfig::default() };
        let err = ComposedModule::<TestBackend>::new(&cfg, &Default::default()).unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));

        let cfg = ModelConfig { nclasses: Some(2), ..cfg };
        let module = ComposedModule::<TestBackend>::new(&cfg, &Default::default()).unwrap();
        assert_eq!(module.classif_in, 1);
        assert_eq!(module.parameters()[0].shape, vec![768, 2]);

        let mlm = ModelConfig { masked_lm: true, ..cfg };
        let module = ComposedModule::<TestBackend>::new(&mlm, &Default::default()).unwrap();
        assert!(module.head.is_none());
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let device = Default::default();
        let dir    = tempfile::tempdir().unwrap();
        let repo   = ModelRepository::new(dir.path()).unwrap();

        let archive = TraceArchive::mlp(3, 4, 0);
        let traced  = TracedGraph::<TestBackend>::from_bytes(archive.to_bytes().unwrap(), &device).unwrap();
        let module  = ComposedModule::empty().with_traced(traced).with_head(head(4, 2), 0);
        module.save_checkpoint(&repo, "7").unwrap();

        assert!(dir.path().join("checkpoint-7-trace.bin").exists());
        assert!(dir.path().join("checkpoint-7.bin").exists());

        let cfg = ModelConfig {
            template: Some(TEMPLATE_LINEAR.to_string()),
            nclasses: Some(2),
            head_in:  4,
            ..ModelConfig::default()
        };
        let restored = ComposedModule::<TestBackend>::new(&cfg, &device)
            .unwrap()
            .load(&repo.scan().unwrap(), &device)
            .unwrap();

        let x    = input(&[0.3, -0.2, 0.9]);
        let a    = module.forward(x.clone()).unwrap().into_tensor().unwrap().into_float2().unwrap();
        let b    = restored.forward(x).unwrap().into_tensor().unwrap().into_float2().unwrap();
        let (a, b) = (host_floats(a).unwrap(), host_floats(b).unwrap());
        for (x, y) in a.iter().zip(&b) {
            approx::assert_abs_diff_eq!(x, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_eval_mode_disables_dropout() {
        let device  = Default::default();
        let archive = TraceArchive::bag_of_embeddings(5, 8, 3);
        let traced  = TracedGraph::<TestBackend>::from_bytes(archive.to_bytes().unwrap(), &device).unwrap();
        let mut module = ComposedModule::empty().with_traced(traced);
        module.eval();
        assert_eq!(module.mode.0, Mode::Eval);

        let inputs = vec![
            DynTensor::tokens(vec![1, 2, 3, 4], 1, 4, &device).into(),
            DynTensor::tokens(vec![0, 0, 0, 0], 1, 4, &device).into(),
            DynTensor::tokens(vec![1, 1, 1, 1], 1, 4, &device).into(),
        ];
        let a = module.forward(inputs.clone()).unwrap().into_tensor().unwrap().into_float3().unwrap();
        let b = module.forward(inputs).unwrap().into_tensor().unwrap().into_float3().unwrap();
        assert_eq!(host_floats(a).unwrap(), host_floats(b).unwrap());
    }
}
