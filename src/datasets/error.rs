use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("unknown dataset `{0}`")]
    UnknownDataset(String),

    #[error("unknown attack method `{0}`")]
    UnknownAttack(String),

    #[error("array `{0}` not found in archive")]
    MissingArray(String),

    #[error("unsupported npy layout for `{name}`: {reason}")]
    UnsupportedArray { name: String, reason: String },

    #[error("malformed sparse matrix: {0}")]
    MalformedSparse(String),

    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("graph contains singleton nodes")]
    SingletonNodes,

    #[error("input graph is not symmetric")]
    NotSymmetric,

    #[error("graph must be unweighted")]
    Weighted,

    #[error("{0} nodes are not enough for a {1} split")]
    SplitTooSmall(usize, &'static str),

    #[error("class {0} has fewer than two members and cannot be stratified")]
    ClassTooSmall(usize),

    #[error("split index {0} is out of range or used twice")]
    InvalidSplit(usize),

    #[error("download of {url} failed with status {status}")]
    Download { url: String, status: u16 },
}
