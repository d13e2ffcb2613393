use candle_core::{DType, Device, IndexOp, Result, Shape, Tensor};
use rand::{distributions::Uniform, rngs::StdRng, Rng};

/// Drops every edge `(i, i)`.
pub fn remove_self_loops(edge_index: &Tensor) -> Result<Tensor> {
    let source = edge_index.i((0, ..))?;
    let target = edge_index.i((1, ..))?;
    let keep: Vec<u32> = source
        .ne(&target)?
        .to_vec1::<u8>()?
        .into_iter()
        .enumerate()
        .filter(|&(_, k)| k != 0)
        .map(|(e, _)| e as u32)
        .collect();
    if keep.len() == edge_index.dims()[1] {
        return Ok(edge_index.clone());
    }
    let num_kept = keep.len();
    let keep = Tensor::from_vec(keep, num_kept, edge_index.device())?;
    edge_index.index_select(&keep, 1)
}

/// Leaves exactly one self-loop `(i, i)` on every node, whether or not the
/// input already had one.
pub fn add_remaining_self_loops(edge_index: &Tensor, num_nodes: usize) -> Result<Tensor> {
    let edge_index = remove_self_loops(edge_index)?;
    let loops = Tensor::arange(0u32, num_nodes as u32, edge_index.device())?;
    let loops = Tensor::stack(&[&loops, &loops], 0)?;
    Tensor::cat(&[&edge_index, &loops], 1)
}

/// Number of edges entering each node.
pub fn in_degree(edge_index: &Tensor, num_nodes: usize, dtype: DType) -> Result<Tensor> {
    let target = edge_index.i((1, ..))?.contiguous()?;
    let ones = target.ones_like()?.to_dtype(dtype)?;
    Tensor::zeros(num_nodes, dtype, edge_index.device())?.index_add(&target, &ones, 0)
}

/// Symmetric GCN normalisation `D^-1/2 (A + I) D^-1/2`.
///
/// Returns the edge index with self-loops added and the weight of every
/// edge, `deg(source)^-1/2 * deg(target)^-1/2`.
pub fn gcn_norm(edge_index: &Tensor, num_nodes: usize, dtype: DType) -> Result<(Tensor, Tensor)> {
    let edge_index = add_remaining_self_loops(edge_index, num_nodes)?;
    let deg_inv_sqrt = in_degree(&edge_index, num_nodes, dtype)?.powf(-0.5)?;
    let source = edge_index.i((0, ..))?.contiguous()?;
    let target = edge_index.i((1, ..))?.contiguous()?;
    let edge_weight = deg_inv_sqrt
        .index_select(&source, 0)?
        .mul(&deg_inv_sqrt.index_select(&target, 0)?)?;
    Ok((edge_index, edge_weight))
}

/// `out[t] = sum over edges (s, t) of w(s, t) * xs[s]`
pub fn weighted_sum_agg(xs: &Tensor, edge_index: &Tensor, edge_weight: &Tensor) -> Result<Tensor> {
    let source = edge_index.i((0, ..))?.contiguous()?;
    let target = edge_index.i((1, ..))?.contiguous()?;
    let messages = xs
        .index_select(&source, 0)?
        .broadcast_mul(&edge_weight.unsqueeze(1)?)?;
    xs.zeros_like()?.index_add(&target, &messages, 0)
}

//
// Uniform(-bound, bound) drawn from a seeded generator
//
//   torch.nn.Linear is initialised by Uniform(-1/sqrt(fan_in), 1/sqrt(fan_in)).
//   see https://github.com/pytorch/pytorch/issues/57109
//
pub fn uniform<S: Into<Shape>>(shape: S, bound: f64, rng: &mut StdRng, device: &Device) -> Result<Tensor> {
    let shape = shape.into();
    let dist = Uniform::new_inclusive(-bound as f32, bound as f32);
    let values: Vec<f32> = (0..shape.elem_count()).map(|_| rng.sample(&dist)).collect();
    Tensor::from_vec(values, shape, device)
}
