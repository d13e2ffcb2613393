use std::cmp::Ordering;

use anyhow::Result;
use itertools::Itertools;

use super::DatasetError;

/// Compressed sparse row matrix.
///
/// Rows are kept canonical: column indices sorted and free of duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    pub n_rows: usize,
    pub n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<u32>,
    data: Vec<f32>,
}

impl CsrMatrix {
    pub fn new(
        n_rows: usize,
        n_cols: usize,
        indptr: Vec<usize>,
        indices: Vec<u32>,
        data: Vec<f32>,
    ) -> Result<Self> {
        let malformed = |msg: String| DatasetError::MalformedSparse(msg);
        if indptr.len() != n_rows + 1 {
            return Err(malformed(format!(
                "indptr has length {}, expected {}",
                indptr.len(),
                n_rows + 1
            ))
            .into());
        }
        if indptr[0] != 0 || indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(malformed("indptr is not monotonic".to_owned()).into());
        }
        if indptr[n_rows] != indices.len() || indices.len() != data.len() {
            return Err(malformed(format!(
                "indptr ends at {} but there are {} indices and {} values",
                indptr[n_rows],
                indices.len(),
                data.len()
            ))
            .into());
        }
        if let Some(&j) = indices.iter().find(|&&j| j as usize >= n_cols) {
            return Err(malformed(format!("column {} out of range for {} columns", j, n_cols)).into());
        }
        let triplets = (0..n_rows)
            .flat_map(|i| (indptr[i]..indptr[i + 1]).map(move |k| (i, k)))
            .map(|(i, k)| (i, indices[k] as usize, data[k]))
            .collect_vec();
        Ok(Self::from_triplets(n_rows, n_cols, &triplets))
    }

    /// Builds a matrix from `(row, col, value)` entries; duplicates are summed.
    ///
    /// # Panics
    /// If an entry lies outside `n_rows x n_cols`.
    pub fn from_triplets(n_rows: usize, n_cols: usize, triplets: &[(usize, usize, f32)]) -> Self {
        let mut rows = vec![Vec::new(); n_rows];
        for &(i, j, v) in triplets {
            assert!(j < n_cols, "column {} out of range", j);
            rows[i].push((j as u32, v));
        }
        let mut indptr = Vec::with_capacity(n_rows + 1);
        let mut indices = Vec::with_capacity(triplets.len());
        let mut data = Vec::with_capacity(triplets.len());
        indptr.push(0);
        for mut row in rows {
            row.sort_by_key(|&(j, _)| j);
            for (j, group) in &row.into_iter().group_by(|&(j, _)| j) {
                indices.push(j);
                data.push(group.map(|(_, v)| v).sum());
            }
            indptr.push(indices.len());
        }
        Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            data,
        }
    }

    pub fn identity(n: usize) -> Self {
        Self {
            n_rows: n,
            n_cols: n,
            indptr: (0..=n).collect(),
            indices: (0..n as u32).collect(),
            data: vec![1.0; n],
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    /// Number of stored entries, explicit zeros included.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        let range = self.indptr[i]..self.indptr[i + 1];
        self.indices[range.clone()]
            .iter()
            .zip(&self.data[range])
            .map(|(&j, &v)| (j as usize, v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        (0..self.n_rows).flat_map(move |i| self.row(i).map(move |(j, v)| (i, j, v)))
    }

    pub fn values(&self) -> &[f32] {
        &self.data
    }

    pub fn transpose(&self) -> Self {
        let triplets = self.iter().map(|(i, j, v)| (j, i, v)).collect_vec();
        Self::from_triplets(self.n_cols, self.n_rows, &triplets)
    }

    pub fn add(&self, other: &Self) -> Result<Self> {
        self.check_same_shape(other)?;
        let triplets = self.iter().chain(other.iter()).collect_vec();
        Ok(Self::from_triplets(self.n_rows, self.n_cols, &triplets))
    }

    /// Replaces every stored non-zero value by one.
    pub fn binarize(&mut self) {
        for v in self.data.iter_mut().filter(|v| **v != 0.0) {
            *v = 1.0;
        }
    }

    pub fn set_diag_zero(&mut self) {
        for i in 0..self.n_rows.min(self.n_cols) {
            for k in self.indptr[i]..self.indptr[i + 1] {
                if self.indices[k] as usize == i {
                    self.data[k] = 0.0;
                }
            }
        }
    }

    /// Drops explicitly stored zeros.
    pub fn eliminate_zeros(&mut self) {
        let mut indptr = Vec::with_capacity(self.n_rows + 1);
        let mut indices = Vec::with_capacity(self.indices.len());
        let mut data = Vec::with_capacity(self.data.len());
        indptr.push(0);
        for i in 0..self.n_rows {
            for (j, v) in self.row(i).filter(|&(_, v)| v != 0.0) {
                indices.push(j as u32);
                data.push(v);
            }
            indptr.push(indices.len());
        }
        self.indptr = indptr;
        self.indices = indices;
        self.data = data;
    }

    /// Principal submatrix `A[nodes][:, nodes]`, renumbered in the order of `nodes`.
    pub fn select(&self, nodes: &[usize]) -> Self {
        let mut new_id = vec![None; self.n_cols];
        for (new, &old) in nodes.iter().enumerate() {
            new_id[old] = Some(new);
        }
        let new_id = &new_id;
        let triplets = nodes
            .iter()
            .enumerate()
            .flat_map(move |(new_i, &i)| {
                self.row(i)
                    .filter_map(move |(j, v)| new_id[j].map(|new_j| (new_i, new_j, v)))
            })
            .collect_vec();
        Self::from_triplets(nodes.len(), nodes.len(), &triplets)
    }

    /// Weakly connected components; returns the number of components and
    /// a component label per node, labelled in order of first appearance.
    pub fn connected_components(&self) -> (usize, Vec<usize>) {
        let n = self.n_rows.max(self.n_cols);
        let mut parent = (0..n).collect_vec();
        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }
        for (i, j, _) in self.iter() {
            let (a, b) = (find(&mut parent, i), find(&mut parent, j));
            if a != b {
                parent[a.max(b)] = a.min(b);
            }
        }
        let mut label_of_root = vec![usize::MAX; n];
        let mut labels = Vec::with_capacity(n);
        let mut count = 0;
        for x in 0..n {
            let root = find(&mut parent, x);
            if label_of_root[root] == usize::MAX {
                label_of_root[root] = count;
                count += 1;
            }
            labels.push(label_of_root[root]);
        }
        (count, labels)
    }

    /// Nodes of the largest connected component, in increasing order. Ties go
    /// to the component containing the smallest node id.
    pub fn largest_connected_component(&self) -> Vec<usize> {
        let (count, labels) = self.connected_components();
        let mut sizes = vec![0usize; count];
        for &c in &labels {
            sizes[c] += 1;
        }
        let keep = sizes
            .iter()
            .enumerate()
            .max_by(|(a, x), (b, y)| x.cmp(y).then_with(|| b.cmp(a)))
            .map(|(c, _)| c);
        labels
            .iter()
            .enumerate()
            .filter(|&(_, &c)| Some(c) == keep)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn col_sums(&self) -> Vec<f32> {
        let mut sums = vec![0.0; self.n_cols];
        for (_, j, v) in self.iter() {
            sums[j] += v;
        }
        sums
    }

    pub fn is_symmetric(&self) -> bool {
        self.n_rows == self.n_cols && {
            let mut lhs = self.clone();
            let mut rhs = self.transpose();
            lhs.eliminate_zeros();
            rhs.eliminate_zeros();
            lhs == rhs
        }
    }

    pub fn to_dense(&self) -> Vec<f32> {
        let mut dense = vec![0.0; self.n_rows * self.n_cols];
        for (i, j, v) in self.iter() {
            dense[i * self.n_cols + j] = v;
        }
        dense
    }

    /// Sources and targets of every non-zero entry, row-major.
    pub fn edge_index(&self) -> (Vec<u32>, Vec<u32>) {
        self.iter()
            .filter(|&(_, _, v)| v != 0.0)
            .map(|(i, j, _)| (i as u32, j as u32))
            .unzip()
    }

    /// Number of positions at which `self` and `other` hold different values.
    pub fn count_differences(&self, other: &Self) -> Result<usize> {
        self.check_same_shape(other)?;
        let mut count = 0;
        for i in 0..self.n_rows {
            let mut lhs = self.row(i).filter(|&(_, v)| v != 0.0).peekable();
            let mut rhs = other.row(i).filter(|&(_, v)| v != 0.0).peekable();
            loop {
                match (lhs.peek(), rhs.peek()) {
                    (None, None) => break,
                    (Some(_), None) => {
                        lhs.next();
                        count += 1;
                    }
                    (None, Some(_)) => {
                        rhs.next();
                        count += 1;
                    }
                    (Some(&(a, x)), Some(&(b, y))) => match a.cmp(&b) {
                        Ordering::Less => {
                            lhs.next();
                            count += 1;
                        }
                        Ordering::Greater => {
                            rhs.next();
                            count += 1;
                        }
                        Ordering::Equal => {
                            lhs.next();
                            rhs.next();
                            if x != y {
                                count += 1;
                            }
                        }
                    },
                }
            }
        }
        Ok(count)
    }

    fn check_same_shape(&self, other: &Self) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(DatasetError::ShapeMismatch {
                expected: self.shape(),
                found: other.shape(),
            }
            .into());
        }
        Ok(())
    }
}
