use std::collections::HashMap;

use crate::error::Result;
use crate::precondition;
use crate::tensor::DataType;

/// A typed value of an operator argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Int(i64),
    Float(f32),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
}

/// One step of a graph: what to run, on which named tensors, with which
/// arguments. The device is not part of the definition, it's chosen when the
/// operator is created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorDef {
    pub op_type: String,
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub args: HashMap<String, Argument>,
}

macro_rules! arg_type_mismatch {
    ($def:expr, $name:expr, $expected:expr, $got:expr) => {{
        precondition!(
            false,
            "argument {} of op {} expects {}, but got {:?}",
            $name,
            $def.name,
            $expected,
            $got
        );
        unreachable!()
    }};
}

impl OperatorDef {
    pub fn arg(&self, name: &str) -> Option<&Argument> {
        self.args.get(name)
    }

    pub fn get_int_arg(&self, name: &str, default: i64) -> i64 {
        match self.args.get(name) {
            None => default,
            Some(Argument::Int(v)) => *v,
            Some(other) => arg_type_mismatch!(self, name, "an int", other),
        }
    }

    pub fn get_float_arg(&self, name: &str, default: f32) -> f32 {
        match self.args.get(name) {
            None => default,
            Some(Argument::Float(v)) => *v,
            Some(Argument::Int(v)) => *v as f32,
            Some(other) => arg_type_mismatch!(self, name, "a float", other),
        }
    }

    /// bools are also accepted in their integer form, non zero is true.
    pub fn get_bool_arg(&self, name: &str, default: bool) -> bool {
        match self.args.get(name) {
            None => default,
            Some(Argument::Bool(v)) => *v,
            Some(Argument::Int(v)) => *v != 0,
            Some(other) => arg_type_mismatch!(self, name, "a bool", other),
        }
    }

    pub fn get_str_arg(&self, name: &str, default: &str) -> String {
        match self.args.get(name) {
            None => default.to_string(),
            Some(Argument::Str(v)) => v.clone(),
            Some(other) => arg_type_mismatch!(self, name, "a string", other),
        }
    }

    pub fn get_ints_arg(&self, name: &str, default: &[i64]) -> Vec<i64> {
        match self.args.get(name) {
            None => default.to_vec(),
            Some(Argument::Ints(v)) => v.clone(),
            Some(other) => arg_type_mismatch!(self, name, "a list of ints", other),
        }
    }

    pub fn get_floats_arg(&self, name: &str, default: &[f32]) -> Vec<f32> {
        match self.args.get(name) {
            None => default.to_vec(),
            Some(Argument::Floats(v)) => v.clone(),
            Some(other) => arg_type_mismatch!(self, name, "a list of floats", other),
        }
    }

    /// the data type in argument `"T"`, f32 if absent.
    pub fn data_type(&self) -> Result<DataType> {
        DataType::try_from(self.get_int_arg("T", DataType::F32 as i64))
    }
}

/// Builds an `OperatorDef` in memory.
///
/// ```
/// use infera::ops::OpDefBuilder;
///
/// let def = OpDefBuilder::new("ResizeBilinear", "resize")
///     .input("input")
///     .output("output")
///     .add_ints_arg("size", &[12, 4])
///     .add_bool_arg("align_corners", true)
///     .build();
/// assert_eq!(def.get_ints_arg("size", &[-1, -1]), vec![12, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct OpDefBuilder {
    def: OperatorDef,
}

impl OpDefBuilder {
    pub fn new(op_type: &str, name: &str) -> Self {
        Self {
            def: OperatorDef {
                op_type: op_type.to_string(),
                name: name.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn input(mut self, name: &str) -> Self {
        self.def.inputs.push(name.to_string());
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.def.outputs.push(name.to_string());
        self
    }

    pub fn add_arg(mut self, name: &str, value: Argument) -> Self {
        self.def.args.insert(name.to_string(), value);
        self
    }

    pub fn add_int_arg(self, name: &str, v: i64) -> Self {
        self.add_arg(name, Argument::Int(v))
    }

    pub fn add_float_arg(self, name: &str, v: f32) -> Self {
        self.add_arg(name, Argument::Float(v))
    }

    pub fn add_bool_arg(self, name: &str, v: bool) -> Self {
        self.add_arg(name, Argument::Bool(v))
    }

    pub fn add_str_arg(self, name: &str, v: &str) -> Self {
        self.add_arg(name, Argument::Str(v.to_string()))
    }

    pub fn add_ints_arg(self, name: &str, v: &[i64]) -> Self {
        self.add_arg(name, Argument::Ints(v.to_vec()))
    }

    pub fn add_floats_arg(self, name: &str, v: &[f32]) -> Self {
        self.add_arg(name, Argument::Floats(v.to_vec()))
    }

    pub fn data_type(self, dtype: DataType) -> Self {
        self.add_int_arg("T", dtype as i64)
    }

    pub fn build(self) -> OperatorDef {
        self.def
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_defaults_and_values() -> Result<()> {
        let def = OpDefBuilder::new("ResizeBilinear", "r")
            .add_bool_arg("align_corners", true)
            .add_int_arg("flag", 1)
            .add_floats_arg("scale", &[2.0, 0.5])
            .add_str_arg("mode", "bilinear")
            .data_type(DataType::F16)
            .build();

        assert_eq!(def.get_ints_arg("size", &[-1, -1]), vec![-1, -1]);
        assert!(def.get_bool_arg("align_corners", false));
        assert!(def.get_bool_arg("flag", false));
        assert_eq!(def.get_floats_arg("scale", &[1.0, 1.0]), vec![2.0, 0.5]);
        assert_eq!(def.get_str_arg("mode", ""), "bilinear");
        assert_eq!(def.get_float_arg("flag", 0.0), 1.0);
        assert_eq!(def.data_type()?, DataType::F16);

        let def = OpDefBuilder::new("BiasAdd", "b").build();
        assert_eq!(def.data_type()?, DataType::F32);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "argument size of op r expects a list of ints")]
    fn test_arg_type_mismatch_panics() {
        let def = OpDefBuilder::new("ResizeBilinear", "r")
            .add_int_arg("size", 3)
            .build();
        def.get_ints_arg("size", &[-1, -1]);
    }

    #[test]
    fn test_unknown_data_type() {
        let def = OpDefBuilder::new("BiasAdd", "b").add_int_arg("T", 42).build();
        assert!(def.data_type().is_err());
    }
}
