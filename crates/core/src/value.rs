use std::ops::{Index, IndexMut};

use id_arena::{Arena, Id};

use crate::{
    dim::Dimensions,
    onnx::proto::{tensor_proto::DataType, SparseTensorProto, TensorProto},
};

pub type ValueId = Id<Value>;

/// A tensor edge of the graph.
///
/// Only `Variable`s take part in boundary matching and rewiring. `Constant`s carry
/// embedded literal data and are never touched by graph edits.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Variable(Variable),
    Constant(Constant),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub elem_ty: Option<DataType>,
    pub dims: Option<Dimensions>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub name: String,
    pub data: ConstantData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantData {
    Dense(TensorProto),
    Sparse(SparseTensorProto),
}

impl Value {
    pub fn name(&self) -> &str {
        match self {
            Value::Variable(v) => &v.name,
            Value::Constant(c) => &c.name,
        }
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Value::Variable(v) => Some(v),
            Value::Constant(_) => None,
        }
    }

    pub fn as_variable_mut(&mut self) -> Option<&mut Variable> {
        match self {
            Value::Variable(v) => Some(v),
            Value::Constant(_) => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Value::Variable(_))
    }

    /// Variables with an empty name stand for omitted optional inputs.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Value::Variable(v) if v.name.is_empty())
    }
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elem_ty: None,
            dims: None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ValueArena(Arena<Value>);

impl ValueArena {
    pub fn new_var_named(&mut self, name: impl Into<String>) -> ValueId {
        self.0.alloc(Value::Variable(Variable::new(name)))
    }

    pub fn new_var_named_and_shaped(
        &mut self,
        name: impl Into<String>,
        elem_ty: DataType,
        dims: impl Into<Dimensions>,
    ) -> ValueId {
        self.0.alloc(Value::Variable(Variable {
            name: name.into(),
            elem_ty: Some(elem_ty),
            dims: Some(dims.into()),
        }))
    }

    pub fn new_const(&mut self, name: impl Into<String>, data: ConstantData) -> ValueId {
        self.0.alloc(Value::Constant(Constant {
            name: name.into(),
            data,
        }))
    }

    pub fn variable(&self, id: ValueId) -> Option<&Variable> {
        self.0[id].as_variable()
    }

    pub fn variable_mut(&mut self, id: ValueId) -> Option<&mut Variable> {
        self.0[id].as_variable_mut()
    }

    pub fn is_variable(&self, id: ValueId) -> bool {
        self.0[id].is_variable()
    }

    pub fn inner(&self) -> &Arena<Value> {
        &self.0
    }
}

impl Index<ValueId> for ValueArena {
    type Output = Value;

    fn index(&self, index: ValueId) -> &Self::Output {
        &self.0[index]
    }
}

impl IndexMut<ValueId> for ValueArena {
    fn index_mut(&mut self, index: ValueId) -> &mut Self::Output {
        &mut self.0[index]
    }
}

#[test]
fn constants_are_not_variables() {
    let mut values = ValueArena::default();
    let w = values.new_const("w", ConstantData::Dense(TensorProto::default()));
    let x = values.new_var_named_and_shaped("x", DataType::Float, vec![1, 3]);
    let empty = values.new_var_named("");
    assert!(values.variable(w).is_none());
    assert_eq!(values[w].name(), "w");
    assert!(values.is_variable(x));
    assert!(values[empty].is_placeholder());
    assert!(!values[x].is_placeholder());
}
