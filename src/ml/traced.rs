// ============================================================
// Layer 5 — Traced Graph
// ============================================================
// A frozen, pre-compiled computation graph loaded from disk.
//
// On-disk format (`*-trace.bin`, bincode):
//
//   TraceArchive
//     nodes   — topologically ordered program; every node only
//               references inputs or earlier nodes
//     output  — which nodes are returned and how they are shaped
//               (single tensor, list of tensors, nested tuple)
//     params  — named 2d weight blocks (biases are [1, out])
//
// A loaded graph is frozen: its parameters are created with
// `no_grad()`, so the optimizer never sees gradients for them,
// and the archive bytes are kept as loaded so a checkpoint
// writes the graph back verbatim. An unfrozen graph (masked-LM
// or finetuning) trains its parameters and is re-encoded from
// their current values on save.

use std::{fmt, fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use burn::{
    module::{Ignored, Param},
    prelude::*,
    tensor::{activation, Distribution},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ml::error::ModelError;
use crate::ml::value::{check_ids, host_floats, DynTensor, GraphValue};

// ─── Program description ──────────────────────────────────────────────────────
/// One operation of a traced program. Operands are node indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Caller-supplied input slot
    Input(usize),
    /// Row lookup of int ids `[b, s]` in a `[vocab, dim]` table
    Embedding { ids: usize, table: usize },
    /// `x · W + b` over the last dimension, `W: [in, out]`, `b: [1, out]`
    Linear { input: usize, weight: usize, bias: Option<usize> },
    Relu(usize),
    Tanh(usize),
    Gelu(usize),
    /// Inverted dropout, active in train mode only
    Dropout { input: usize, prob: f64 },
    /// Mean over the sequence of `[b, s, d]`, weighted by an int mask `[b, s]`
    MaskedMean { input: usize, mask: usize },
    /// State of one sequence position: `[b, s, d] -> [b, d]`
    Token { input: usize, position: usize },
    Add(usize, usize),
}

impl Node {
    fn operands(&self) -> Vec<usize> {
        match self {
            Node::Input(_)                      => vec![],
            Node::Embedding { ids, .. }         => vec![*ids],
            Node::Linear { input, .. }          => vec![*input],
            Node::Relu(a) | Node::Tanh(a) | Node::Gelu(a) => vec![*a],
            Node::Dropout { input, .. }         => vec![*input],
            Node::MaskedMean { input, mask }    => vec![*input, *mask],
            Node::Token { input, .. }           => vec![*input],
            Node::Add(a, b)                     => vec![*a, *b],
        }
    }

    fn params(&self) -> Vec<usize> {
        match self {
            Node::Embedding { table, .. } => vec![*table],
            Node::Linear { weight, bias, .. } => {
                let mut p = vec![*weight];
                p.extend(bias);
                p
            }
            _ => vec![],
        }
    }
}

/// Shape of the value returned by the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Output {
    Node(usize),
    List(Vec<usize>),
    Tuple(Vec<Output>),
}

impl Output {
    fn nodes(&self) -> Vec<usize> {
        match self {
            Output::Node(n)    => vec![*n],
            Output::List(ns)   => ns.clone(),
            Output::Tuple(outs) => outs.iter().flat_map(Output::nodes).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamBlob {
    pub name:   String,
    pub rows:   usize,
    pub cols:   usize,
    pub values: Vec<f32>,
}

/// Serialized form of a traced graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceArchive {
    pub nodes:  Vec<Node>,
    pub output: Output,
    pub params: Vec<ParamBlob>,
}

impl TraceArchive {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        bincode::serialize(self).map_err(|e| ModelError::Trace(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        let archive: Self = bincode::deserialize(bytes)
            .map_err(|e| ModelError::Trace(e.to_string()))?;
        archive.validate()?;
        Ok(archive)
    }

    /// Check references: operands point backwards, parameter indices
    /// exist and every blob holds `rows * cols` values.
    pub fn validate(&self) -> Result<(), ModelError> {
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(bad) = node.operands().into_iter().find(|&op| op >= i) {
                return Err(ModelError::Trace(format!("node {i} reads node {bad} before it is computed")));
            }
            if let Some(bad) = node.params().into_iter().find(|&p| p >= self.params.len()) {
                return Err(ModelError::Trace(format!("node {i} reads missing parameter {bad}")));
            }
        }
        if let Some(bad) = self.output.nodes().into_iter().find(|&n| n >= self.nodes.len()) {
            return Err(ModelError::Trace(format!("output references missing node {bad}")));
        }
        for blob in &self.params {
            if blob.values.len() != blob.rows * blob.cols {
                return Err(ModelError::Trace(format!(
                    "parameter '{}' holds {} values, expected {}x{}",
                    blob.name, blob.values.len(), blob.rows, blob.cols
                )));
            }
        }
        Ok(())
    }

    /// Number of caller inputs the program reads.
    pub fn input_arity(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(|n| match n { Node::Input(i) => Some(i + 1), _ => None })
            .max()
            .unwrap_or(0)
    }

    /// Bag-of-embeddings encoder over `(ids, token_types, attention_mask)`.
    ///
    /// Returns the tuple `(lm_logits [b, s, vocab + 1], pooled [b, dim])`:
    /// slot 0 feeds masked-LM training, slot 1 a classification head.
    pub fn bag_of_embeddings(vocab_size: usize, dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut b   = TraceBuilder::default();
        // ids in [0, vocab_size] are all valid rows
        let rows    = vocab_size + 1;

        let ids    = b.push(Node::Input(0));
        let mask   = b.push(Node::Input(2));
        let table  = b.param("embeddings.word", rows, dim, random_values(&mut rng, rows * dim));
        let states = b.push(Node::Embedding { ids, table });
        let states = b.push(Node::Dropout { input: states, prob: 0.1 });

        let w_pool = b.param("pooler.weight", dim, dim, random_values(&mut rng, dim * dim));
        let b_pool = b.param("pooler.bias", 1, dim, vec![0.0; dim]);
        let mean   = b.push(Node::MaskedMean { input: states, mask });
        let pooled = b.push(Node::Linear { input: mean, weight: w_pool, bias: Some(b_pool) });
        let pooled = b.push(Node::Tanh(pooled));

        let w_lm   = b.param("lm.weight", dim, rows, random_values(&mut rng, dim * rows));
        let logits = b.push(Node::Linear { input: states, weight: w_lm, bias: None });

        b.finish(Output::Tuple(vec![Output::Node(logits), Output::Node(pooled)]))
    }

    /// One hidden ReLU layer over a single `[b, features]` input.
    pub fn mlp(features: usize, hidden: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut b   = TraceBuilder::default();

        let x  = b.push(Node::Input(0));
        let w1 = b.param("fc1.weight", features, hidden, random_values(&mut rng, features * hidden));
        let b1 = b.param("fc1.bias", 1, hidden, vec![0.0; hidden]);
        let h  = b.push(Node::Linear { input: x, weight: w1, bias: Some(b1) });
        let h  = b.push(Node::Relu(h));

        b.finish(Output::Node(h))
    }
}

fn random_values(rng: &mut StdRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(-0.1f32..0.1)).collect()
}

// ─── TraceBuilder ─────────────────────────────────────────────────────────────
/// Incremental construction of a `TraceArchive`.
#[derive(Debug, Default)]
pub struct TraceBuilder {
    nodes:  Vec<Node>,
    params: Vec<ParamBlob>,
}

impl TraceBuilder {
    /// Append a node and return its index
    pub fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Append a parameter block and return its index
    pub fn param(&mut self, name: &str, rows: usize, cols: usize, values: Vec<f32>) -> usize {
        self.params.push(ParamBlob { name: name.to_string(), rows, cols, values });
        self.params.len() - 1
    }

    pub fn finish(self, output: Output) -> TraceArchive {
        TraceArchive { nodes: self.nodes, output, params: self.params }
    }
}

// ─── Loaded graph ─────────────────────────────────────────────────────────────
/// Raw archive bytes, written back unchanged on checkpoint.
#[derive(Clone)]
pub struct TraceSource(Arc<Vec<u8>>);

impl fmt::Debug for TraceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceSource({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone)]
pub struct TraceProgram {
    nodes:  Vec<Node>,
    output: Output,
    names:  Vec<String>,
    source: TraceSource,
    frozen: bool,
}

#[derive(Module, Debug)]
pub struct TracedGraph<B: Backend> {
    params:  Vec<Param<Tensor<B, 2>>>,
    program: Ignored<TraceProgram>,
}

impl<B: Backend> TracedGraph<B> {
    /// Decode an archive and place its parameters on `device`.
    pub fn from_bytes(bytes: Vec<u8>, device: &B::Device) -> Result<Self, ModelError> {
        let archive = TraceArchive::from_bytes(&bytes)?;
        tracing::debug!("Traced graph reads {} inputs", archive.input_arity());
        let names   = archive.params.iter().map(|p| p.name.clone()).collect();
        let params  = archive
            .params
            .into_iter()
            .map(|blob| {
                let data = TensorData::new(blob.values, [blob.rows, blob.cols])
                    .convert::<B::FloatElem>();
                Param::from_tensor(Tensor::from_data(data, device))
            })
            .collect();

        let program = TraceProgram {
            nodes:  archive.nodes,
            output: archive.output,
            names,
            source: TraceSource(Arc::new(bytes)),
            frozen: true,
        };
        Ok(Self { params, program: Ignored(program) }.no_grad())
    }

    pub fn load(path: &Path, device: &B::Device) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Cannot read traced graph '{}'", path.display()))?;
        let graph = Self::from_bytes(bytes, device)
            .with_context(|| format!("Cannot decode traced graph '{}'", path.display()))?;
        tracing::debug!(
            "Traced graph '{}': {} nodes, {} parameter blocks",
            path.display(), graph.program.nodes.len(), graph.params.len()
        );
        Ok(graph)
    }

    /// Let the optimizer update the graph's parameters.
    pub fn unfreeze(mut self) -> Self {
        self.params = self.params.into_iter().map(|p| p.set_require_grad(true)).collect();
        self.program.0.frozen = false;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.program.frozen
    }

    /// Frozen graphs are written exactly as loaded; unfrozen ones
    /// are re-encoded with their current parameter values.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = if self.program.frozen {
            self.program.source.0.to_vec()
        } else {
            self.archive()?.to_bytes()?
        };
        fs::write(path, bytes)
            .with_context(|| format!("Cannot write traced graph '{}'", path.display()))
    }

    /// Current program and parameter values as an archive.
    pub fn archive(&self) -> Result<TraceArchive, ModelError> {
        let params = self
            .program
            .names
            .iter()
            .zip(&self.params)
            .map(|(name, p)| {
                let value = p.val();
                let [rows, cols] = value.dims();
                Ok(ParamBlob { name: name.clone(), rows, cols, values: host_floats(value)? })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;
        Ok(TraceArchive {
            nodes:  self.program.nodes.clone(),
            output: self.program.output.clone(),
            params,
        })
    }

    pub fn params(&self) -> &[Param<Tensor<B, 2>>] {
        &self.params
    }

    pub fn param_names(&self) -> &[String] {
        &self.program.names
    }

    /// Rows of the first embedding table, i.e. the largest id plus one.
    pub fn embedding_rows(&self) -> Option<usize> {
        self.program.nodes.iter().find_map(|n| match n {
            Node::Embedding { table, .. } => self.params.get(*table).map(|p| p.val().dims()[0]),
            _ => None,
        })
    }

    pub fn forward(&self, inputs: Vec<GraphValue<B>>, training: bool) -> Result<GraphValue<B>, ModelError> {
        let program = &self.program;
        let mut slots: Vec<DynTensor<B>> = Vec::with_capacity(program.nodes.len());

        for node in &program.nodes {
            let value = match node {
                Node::Input(i) => inputs
                    .get(*i)
                    .cloned()
                    .ok_or(ModelError::MissingInput { index: *i, len: inputs.len() })?
                    .into_tensor()?,

                Node::Embedding { ids, table } => {
                    let ids     = slots[*ids].clone().into_int2()?;
                    let [b, s]  = ids.dims();
                    let table   = self.params[*table].val();
                    let [n, d]  = table.dims();
                    check_ids(&ids, n, "embedding")?;
                    let rows    = table.select(0, ids.reshape([b * s]));
                    DynTensor::Float3(rows.reshape([b, s, d]))
                }

                Node::Linear { input, weight, bias } => {
                    let w = self.params[*weight].val();
                    let bias = bias.map(|i| self.params[i].val());
                    let [d_in, _] = w.dims();
                    let width = slots[*input].dims().last().copied().unwrap_or(0);
                    if width != d_in {
                        return Err(ModelError::Width { op: "linear", expected: d_in, found: width });
                    }
                    match slots[*input].clone() {
                        DynTensor::Float2(x) => DynTensor::Float2(affine(x, w, bias)),
                        DynTensor::Float3(x) => {
                            let [b, s, d] = x.dims();
                            let [_, out]  = w.dims();
                            let y = affine(x.reshape([b * s, d]), w, bias);
                            DynTensor::Float3(y.reshape([b, s, out]))
                        }
                        other => return Err(ModelError::Rank { op: "linear", found: other.kind() }),
                    }
                }

                Node::Relu(a) => float_unary(slots[*a].clone(), "relu", |t| activation::relu(t), |t| activation::relu(t))?,
                Node::Tanh(a) => float_unary(slots[*a].clone(), "tanh", |t| t.tanh(), |t| t.tanh())?,
                Node::Gelu(a) => float_unary(slots[*a].clone(), "gelu", |t| activation::gelu(t), |t| activation::gelu(t))?,

                Node::Dropout { input, prob } => {
                    let x = slots[*input].clone();
                    if training && *prob > 0.0 {
                        let keep = 1.0 - prob.min(1.0);
                        float_unary(x, "dropout", |t| dropout(t, keep), |t| dropout(t, keep))?
                    } else {
                        x
                    }
                }

                Node::MaskedMean { input, mask } => {
                    let x        = slots[*input].clone().into_float3()?;
                    let [b, _, d] = x.dims();
                    let m        = slots[*mask].clone().into_int2()?.float().unsqueeze_dim::<3>(2);
                    let summed   = (x * m.clone()).sum_dim(1).reshape([b, d]);
                    let count    = m.sum_dim(1).reshape([b, 1]).clamp_min(1.0);
                    DynTensor::Float2(summed / count)
                }

                Node::Token { input, position } => {
                    let x = slots[*input].clone().into_float3()?;
                    let [b, s, d] = x.dims();
                    if *position >= s {
                        return Err(ModelError::Trace(format!(
                            "token position {position} outside sequence of length {s}"
                        )));
                    }
                    DynTensor::Float2(x.slice([0..b, *position..*position + 1, 0..d]).reshape([b, d]))
                }

                Node::Add(a, b) if slots[*a].dims() != slots[*b].dims() => {
                    return Err(ModelError::Trace(format!(
                        "add of mismatched shapes {:?} and {:?}", slots[*a].dims(), slots[*b].dims()
                    )));
                }
                Node::Add(a, b) => match (slots[*a].clone(), slots[*b].clone()) {
                    (DynTensor::Float2(x), DynTensor::Float2(y)) => DynTensor::Float2(x + y),
                    (DynTensor::Float3(x), DynTensor::Float3(y)) => DynTensor::Float3(x + y),
                    (x, _) => return Err(ModelError::Rank { op: "add", found: x.kind() }),
                },
            };
            slots.push(value);
        }

        Ok(collect_output(&program.output, &slots))
    }
}

fn affine<B: Backend>(x: Tensor<B, 2>, w: Tensor<B, 2>, bias: Option<Tensor<B, 2>>) -> Tensor<B, 2> {
    let y = x.matmul(w);
    match bias {
        Some(b) => y + b,
        None    => y,
    }
}

fn dropout<B: Backend, const D: usize>(x: Tensor<B, D>, keep: f64) -> Tensor<B, D> {
    if keep <= 0.0 {
        return x.zeros_like();
    }
    let mask = Tensor::<B, D>::random(x.shape(), Distribution::Bernoulli(keep), &x.device());
    x * mask / keep
}

fn float_unary<B: Backend>(
    value: DynTensor<B>,
    op:    &'static str,
    f2:    impl FnOnce(Tensor<B, 2>) -> Tensor<B, 2>,
    f3:    impl FnOnce(Tensor<B, 3>) -> Tensor<B, 3>,
) -> Result<DynTensor<B>, ModelError> {
    match value {
        DynTensor::Float2(t) => Ok(DynTensor::Float2(f2(t))),
        DynTensor::Float3(t) => Ok(DynTensor::Float3(f3(t))),
        other => Err(ModelError::Rank { op, found: other.kind() }),
    }
}

fn collect_output<B: Backend>(output: &Output, slots: &[DynTensor<B>]) -> GraphValue<B> {
    match output {
        Output::Node(n)     => GraphValue::Tensor(slots[*n].clone()),
        Output::List(ns)    => GraphValue::List(ns.iter().map(|n| slots[*n].clone()).collect()),
        Output::Tuple(outs) => GraphValue::Tuple(outs.iter().map(|o| collect_output(o, slots)).collect()),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray;

    fn identity_linear() -> TraceArchive {
        let mut b = TraceBuilder::default();
        let x = b.push(Node::Input(0));
        let w = b.param("w", 2, 2, vec![1.0, 0.0, 0.0, 1.0]);
        let y = b.push(Node::Linear { input: x, weight: w, bias: None });
        let z = b.push(Node::Relu(y));
        b.finish(Output::Tuple(vec![Output::Node(y), Output::List(vec![y, z])]))
    }

    #[test]
    fn test_archive_roundtrip_keeps_bytes() {
        let bytes = identity_linear().to_bytes().unwrap();
        let graph = TracedGraph::<TestBackend>::from_bytes(bytes.clone(), &Default::default()).unwrap();

        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("g-trace.bin");
        graph.save(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), bytes);
        assert_eq!(graph.param_names().to_vec(), vec!["w".to_string()]);
    }

    #[test]
    fn test_unfrozen_graph_reencoded_on_save() {
        let bytes = identity_linear().to_bytes().unwrap();
        let graph = TracedGraph::<TestBackend>::from_bytes(bytes, &Default::default()).unwrap().unfreeze();
        assert!(!graph.is_frozen());

        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("g-trace.bin");
        graph.save(&path).unwrap();
        let back = TraceArchive::from_bytes(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(back, identity_linear());
    }

    #[test]
    fn test_forward_shapes_tuple_output() {
        let device = Default::default();
        let bytes  = identity_linear().to_bytes().unwrap();
        let graph  = TracedGraph::<TestBackend>::from_bytes(bytes, &device).unwrap();

        let x   = DynTensor::features(vec![1.0, -2.0], 1, 2, &device);
        let out = graph.forward(vec![x.into()], false).unwrap();
        let GraphValue::Tuple(values) = out else { panic!("expected tuple") };
        assert_eq!(values.len(), 2);

        let first = values[0].clone().into_tensor().unwrap().into_float2().unwrap();
        assert_eq!(host_floats(first).unwrap(), vec![1.0, -2.0]);

        let GraphValue::List(list) = values[1].clone() else { panic!("expected list") };
        let relu = list[1].clone().into_float2().unwrap();
        assert_eq!(host_floats(relu).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_forward_reference_rejected() {
        let archive = TraceArchive {
            nodes:  vec![Node::Relu(1), Node::Input(0)],
            output: Output::Node(0),
            params: vec![],
        };
        let err = TraceArchive::from_bytes(&archive.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, ModelError::Trace(_)));
    }

    #[test]
    fn test_bag_of_embeddings_outputs() {
        let device  = Default::default();
        let archive = TraceArchive::bag_of_embeddings(9, 4, 7);
        assert_eq!(archive.input_arity(), 3);
        let graph   = TracedGraph::<TestBackend>::from_bytes(archive.to_bytes().unwrap(), &device).unwrap();

        let ids   = DynTensor::tokens(vec![1, 5, 9, 0, 2, 3, 0, 0], 2, 4, &device);
        let types = DynTensor::tokens(vec![0; 8], 2, 4, &device);
        let mask  = DynTensor::tokens(vec![1, 1, 1, 0, 1, 1, 0, 0], 2, 4, &device);
        let out   = graph
            .forward(vec![ids.into(), types.into(), mask.into()], true)
            .unwrap()
            .into_values();

        assert_eq!(out[0].clone().into_tensor().unwrap().dims(), vec![2, 4, 10]);
        assert_eq!(out[1].clone().into_tensor().unwrap().dims(), vec![2, 4]);
    }

    #[test]
    fn test_out_of_vocabulary_id_is_an_error() {
        let device = Default::default();
        let bytes  = TraceArchive::bag_of_embeddings(10, 4, 0).to_bytes().unwrap();
        let graph  = TracedGraph::<TestBackend>::from_bytes(bytes, &device).unwrap();
        assert_eq!(graph.embedding_rows(), Some(11));

        let inputs = vec![
            DynTensor::tokens(vec![1, 50, 3], 1, 3, &device).into(),
            DynTensor::tokens(vec![0, 0, 0], 1, 3, &device).into(),
            DynTensor::tokens(vec![1, 1, 1], 1, 3, &device).into(),
        ];
        let err = graph.forward(inputs, false).unwrap_err();
        assert!(matches!(err, ModelError::Data(_)));
    }

    #[test]
    fn test_linear_node_width_checked() {
        let device = Default::default();
        let bytes  = TraceArchive::mlp(3, 2, 1).to_bytes().unwrap();
        let graph  = TracedGraph::<TestBackend>::from_bytes(bytes, &device).unwrap();
        assert_eq!(graph.embedding_rows(), None);

        let x   = DynTensor::features(vec![1.0; 5], 1, 5, &device);
        let err = graph.forward(vec![x.into()], false).unwrap_err();
        assert_eq!(err, ModelError::Width { op: "linear", expected: 3, found: 5 });
    }

    #[test]
    fn test_missing_input_reported() {
        let device = Default::default();
        let bytes  = TraceArchive::mlp(3, 2, 1).to_bytes().unwrap();
        let graph  = TracedGraph::<TestBackend>::from_bytes(bytes, &device).unwrap();
        let err    = graph.forward(vec![], false).unwrap_err();
        assert_eq!(err, ModelError::MissingInput { index: 0, len: 0 });
    }
}
