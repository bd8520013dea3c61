use crate::{
    graph::Graph,
    onnx::proto::{OperatorSetIdProto, StringStringEntryProto},
};

#[derive(Debug, Default, Clone)]
pub struct Model {
    pub graph: Graph,
    pub ir_version: Option<i64>,
    pub opset_import: Vec<OperatorSetIdProto>,
    pub producer_name: Option<String>,
    pub producer_version: Option<String>,
    pub domain: Option<String>,
    pub model_version: Option<i64>,
    pub doc_string: Option<String>,
    pub metadata_props: Vec<StringStringEntryProto>,
}

impl Model {
    /// Version of the default (`ai.onnx`) operator set, if imported.
    pub fn opset_version(&self) -> Option<i64> {
        self.opset_import
            .iter()
            .find(|o| matches!(o.domain(), "" | "ai.onnx"))
            .map(|o| o.version())
    }
}
