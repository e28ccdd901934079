//! Small helpers shared by providers and the fetch layer.

pub mod mime;
pub mod vertex;

pub use mime::{data_uri, guess_mime};
pub use vertex::{vertex_base_url, vertex_model_url};
