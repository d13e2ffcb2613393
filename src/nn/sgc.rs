use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Init, VarBuilder, VarMap};
use rand::rngs::StdRng;

use super::{
    traits::GnnModule,
    utils::{gcn_norm, uniform, weighted_sum_agg},
};

/// Simplified graph convolution: `S^K X W + b` with the GCN-normalised
/// adjacency `S = D^-1/2 (A + I) D^-1/2`.
///
/// With `cached`, `S^K X` is computed once per graph version and reused
/// until the version changes or the parameters are reset.
pub struct SgConv {
    in_dim: usize,
    out_dim: usize,
    k: usize,
    cached: bool,
    weight: Tensor,
    bias: Option<Tensor>,
    varmap: VarMap,
    prefix: String,
    cache: Option<(u64, Tensor)>,
}

impl SgConv {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        k: usize,
        cached: bool,
        with_bias: bool,
        varmap: &VarMap,
        prefix: &str,
        device: &Device,
    ) -> Result<Self> {
        let vs = VarBuilder::from_varmap(varmap, DType::F32, device).pp(prefix);
        let bound = 1.0 / (in_dim as f64).sqrt();
        let init = Init::Uniform {
            lo: -bound,
            up: bound,
        };
        let weight = vs.get_with_hints((in_dim, out_dim), "weight", init)?;
        let bias = if with_bias {
            Some(vs.get_with_hints((1, out_dim), "bias", init)?)
        } else {
            None
        };
        Ok(Self {
            in_dim,
            out_dim,
            k,
            cached,
            weight,
            bias,
            varmap: varmap.clone(),
            prefix: prefix.to_owned(),
            cache: None,
        })
    }

    fn param_name(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }

    /// Redraws weight and bias from `Uniform(-1/sqrt(in_dim), 1/sqrt(in_dim))`
    /// and drops the cached propagation.
    pub fn reset_parameters(&mut self, rng: &mut StdRng) -> Result<()> {
        let bound = 1.0 / (self.in_dim as f64).sqrt();
        let device = self.weight.device().clone();
        let weight = uniform((self.in_dim, self.out_dim), bound, rng, &device)?;
        let name = self.param_name("weight");
        self.varmap.set_one(name, weight)?;
        if self.bias.is_some() {
            let bias = uniform((1, self.out_dim), bound, rng, &device)?;
            let name = self.param_name("bias");
            self.varmap.set_one(name, bias)?;
        }
        self.cache = None;
        Ok(())
    }

    /// Copies of the current parameters, keyed by their variable names.
    pub fn state_dict(&self) -> Result<Vec<(String, Tensor)>> {
        let mut state = vec![(self.param_name("weight"), self.weight.copy()?)];
        if let Some(bias) = &self.bias {
            state.push((self.param_name("bias"), bias.copy()?));
        }
        Ok(state)
    }

    pub fn load_state_dict(&mut self, state: &[(String, Tensor)]) -> Result<()> {
        for (name, value) in state {
            self.varmap.set_one(name, value)?;
        }
        Ok(())
    }

    /// `S^K X`
    pub fn propagate(&self, x: &Tensor, edge_index: &Tensor) -> Result<Tensor> {
        let num_nodes = x.dims()[0];
        let (edge_index, edge_weight) = gcn_norm(edge_index, num_nodes, x.dtype())?;
        let mut h = x.clone();
        for _ in 0..self.k {
            h = weighted_sum_agg(&h, &edge_index, &edge_weight)?;
        }
        Ok(h)
    }

    /// Like [`Self::propagate`], but reuses the result for the same `version`
    /// when caching is enabled.
    pub fn propagate_cached(&mut self, x: &Tensor, edge_index: &Tensor, version: u64) -> Result<Tensor> {
        if let Some((cached_version, h)) = &self.cache {
            if self.cached && *cached_version == version {
                return Ok(h.clone());
            }
        }
        let h = self.propagate(x, edge_index)?;
        if self.cached {
            self.cache = Some((version, h.clone()));
        }
        Ok(h)
    }

    /// Applies the linear part to already propagated features.
    pub fn linear(&self, h: &Tensor) -> Result<Tensor> {
        let out = h.matmul(&self.weight)?;
        match &self.bias {
            Some(bias) => out.broadcast_add(bias),
            None => Ok(out),
        }
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        std::iter::once(self.weight.clone()).chain(self.bias.clone()).collect()
    }
}

impl GnnModule for SgConv {
    fn forward_t(&self, x: &Tensor, edge_index: &Tensor, _train: bool) -> Result<Tensor> {
        self.linear(&self.propagate(x, edge_index)?)
    }
}
