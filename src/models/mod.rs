mod activation;
mod license;
mod plan;
mod redeem;

pub use activation::*;
pub use license::*;
pub use plan::*;
pub use redeem::*;
