mod dataset;
pub use dataset::*;

mod error;
pub use error::*;

mod graph_data;
pub use graph_data::*;

mod npz;
pub use npz::*;

mod perturbed;
pub use perturbed::*;

mod sparse;
pub use sparse::*;

mod split;
pub use split::*;

mod utils;
pub use utils::*;
