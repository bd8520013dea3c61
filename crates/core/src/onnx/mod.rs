pub mod load;
pub mod proto;
pub mod save;

pub use load::{load_onnx, load_onnx_from_buffer, ModelLoadError};
pub use save::{save_onnx, save_onnx_to_buffer, ModelSaveError};
