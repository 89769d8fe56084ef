pub mod nearly;
pub mod topk;

pub use topk::{NO_ID, Neighbor, TopK};
