mod create_socket;
mod filter_same;

pub use create_socket::{create_shared_socket, create_socket};
pub use filter_same::FilterSameExt;
