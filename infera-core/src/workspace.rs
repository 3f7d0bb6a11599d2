use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::error::ErrorKind;
use crate::error::Result;
use crate::tensor::DataType;
use crate::tensor::DeviceType;
use crate::tensor::Tensor;

/// A named registry of tensors, shared by every operator of a net. A name
/// always resolves to exactly one tensor; operators publish their outputs by
/// replacing the entry once their `run` has finished.
#[derive(Debug, Default)]
pub struct Workspace {
    tensors: HashMap<String, Tensor>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// allocates an empty tensor under `name`, replacing any previous entry.
    pub fn create_tensor(&mut self, name: &str, dtype: DataType, device: DeviceType) -> &mut Tensor {
        let tensor = Tensor::empty(dtype, device);
        match self.tensors.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.insert(tensor);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(tensor),
        }
    }

    pub fn get_tensor(&self, name: &str) -> Result<&Tensor> {
        self.tensors.get(name).ok_or_else(|| {
            (
                ErrorKind::NotFound,
                format!("tensor {} is not found in the workspace", name),
            )
                .into()
        })
    }

    pub fn get_tensor_mut(&mut self, name: &str) -> Result<&mut Tensor> {
        self.tensors.get_mut(name).ok_or_else(|| {
            (
                ErrorKind::NotFound,
                format!("tensor {} is not found in the workspace", name),
            )
                .into()
        })
    }

    pub fn put_tensor(&mut self, name: &str, tensor: Tensor) {
        self.tensors.insert(name.to_string(), tensor);
    }

    pub fn remove_tensor(&mut self, name: &str) -> Option<Tensor> {
        self.tensors.remove(name)
    }

    pub fn has_tensor(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn tensor_names(&self) -> Vec<&str> {
        let mut names = self.tensors.keys().map(|k| k.as_str()).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn clear(&mut self) {
        self.tensors.clear();
    }
}
