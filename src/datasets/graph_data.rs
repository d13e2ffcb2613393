use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use candle_core::{Device, Tensor};

use super::{CsrMatrix, Dataset, DatasetError};
use crate::utils::index_to_mask;

static NEXT_VERSION: AtomicU64 = AtomicU64::new(0);

fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// Dense tensors of a [`Dataset`] ready for full-batch training.
///
/// ```text
/// x:          (num_nodes, num_features) f32
/// edge_index: (2, num_edges) u32, one column per directed edge
/// y:          (num_nodes,) u32
/// *_mask:     (num_nodes,) u8
/// ```
#[derive(Debug, Clone)]
pub struct GraphData {
    pub x: Tensor,
    pub edge_index: Tensor,
    pub y: Tensor,
    pub train_index: Tensor,
    pub val_index: Tensor,
    pub test_index: Tensor,
    pub train_mask: Tensor,
    pub val_mask: Tensor,
    pub test_mask: Tensor,
    pub num_nodes: usize,
    pub num_features: usize,
    pub num_classes: usize,
    version: u64,
}

impl GraphData {
    pub fn from_dataset(dataset: &Dataset, device: &Device) -> Result<Self> {
        let num_nodes = dataset.num_nodes();
        let num_features = dataset.num_features();
        let x = Tensor::from_vec(dataset.features.to_dense(), (num_nodes, num_features), device)?;
        let y = Tensor::from_iter(dataset.labels.iter().map(|&c| c as u32), device)?;
        Ok(Self {
            x,
            edge_index: edge_index_tensor(&dataset.adj, device)?,
            y,
            train_index: index_tensor(&dataset.idx_train, device)?,
            val_index: index_tensor(&dataset.idx_val, device)?,
            test_index: index_tensor(&dataset.idx_test, device)?,
            train_mask: index_to_mask(&dataset.idx_train, num_nodes, device)?,
            val_mask: index_to_mask(&dataset.idx_val, num_nodes, device)?,
            test_mask: index_to_mask(&dataset.idx_test, num_nodes, device)?,
            num_nodes,
            num_features,
            num_classes: dataset.num_classes(),
            version: next_version(),
        })
    }

    /// Replaces the graph structure in place, e.g. with a perturbed adjacency.
    pub fn update_edge_index(&mut self, adj: &CsrMatrix) -> Result<()> {
        if adj.shape() != (self.num_nodes, self.num_nodes) {
            return Err(DatasetError::ShapeMismatch {
                expected: (self.num_nodes, self.num_nodes),
                found: adj.shape(),
            }
            .into());
        }
        self.edge_index = edge_index_tensor(adj, self.x.device())?;
        self.version = next_version();
        Ok(())
    }

    /// Identifies the current edge set; unique across instances and changed
    /// by every structural update. Models key cached propagations on it.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn num_edges(&self) -> usize {
        self.edge_index.dims()[1]
    }

    pub fn device(&self) -> &Device {
        self.x.device()
    }
}

fn edge_index_tensor(adj: &CsrMatrix, device: &Device) -> Result<Tensor> {
    let (source, target) = adj.edge_index();
    let num_edges = source.len();
    let mut edge_index = source;
    edge_index.extend(target);
    Ok(Tensor::from_vec(edge_index, (2, num_edges), device)?)
}

pub fn index_tensor(index: &[usize], device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_iter(index.iter().map(|&i| i as u32), device)?)
}
