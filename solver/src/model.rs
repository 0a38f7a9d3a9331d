mod error;
mod gen;
mod json;
mod stnu;
mod weight;

pub use error::ModelError;
pub use gen::generate_chain;
pub use json::{from_json_str, load_stnu, save_stnu, to_json_string};
pub use stnu::{DistanceMatrix, Edge, EdgeType, Stnu};
pub use weight::Weight;
