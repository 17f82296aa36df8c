mod code;
mod service;

pub use code::CodeHasher;
pub use service::{claim, generate_codes, RedeemClaim, RedeemClaimResponse};
