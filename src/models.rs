mod sgc;
pub use sgc::{FitSummary, Sgc, SgcParams, TestReport};
