pub mod diagnostic;
pub mod dim;
pub mod error;
pub mod graph;
pub mod model;
pub mod node;
pub mod onnx;
pub mod remove;
pub mod shape;
pub mod value;
