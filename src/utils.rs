use candle_core::{DType, Device, Result, Tensor, D};

/// Fraction of rows whose argmax equals the label.
pub fn accuracy(log_probs: &Tensor, labels: &Tensor) -> Result<f32> {
    log_probs
        .argmax(D::Minus1)?
        .eq(labels)?
        .to_dtype(DType::F32)?
        .mean_all()?
        .to_scalar::<f32>()
}

/// `u8` mask of length `size` with ones at `index`.
pub fn index_to_mask(index: &[usize], size: usize, device: &Device) -> Result<Tensor> {
    let mut mask = vec![0u8; size];
    for &i in index {
        match mask.get_mut(i) {
            Some(m) => *m = 1,
            None => candle_core::bail!("index {} out of range for a mask of size {}", i, size),
        }
    }
    Tensor::from_vec(mask, size, device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_counts_argmax_hits() {
        let log_probs = Tensor::new(&[[0.9f32, 0.1], [0.2, 0.8], [0.6, 0.4], [0.3, 0.7]], &Device::Cpu).unwrap();
        let labels = Tensor::new(&[0u32, 1, 1, 1], &Device::Cpu).unwrap();
        assert_eq!(accuracy(&log_probs, &labels).unwrap(), 0.75);
    }

    #[test]
    fn mask_marks_indexed_nodes() {
        let mask = index_to_mask(&[1, 3], 5, &Device::Cpu).unwrap();
        assert_eq!(mask.to_vec1::<u8>().unwrap(), vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn mask_rejects_out_of_range_index() {
        assert!(index_to_mask(&[1, 5], 5, &Device::Cpu).is_err());
    }
}
