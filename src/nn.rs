mod traits;
pub use traits::GnnModule;
pub mod utils;

mod sgc;
pub use sgc::SgConv;
