use std::fmt;

use crate::error::Error;
use crate::error::ErrorKind;

/// The element types a tensor may hold. The discriminants are the values used
/// for the `"T"` argument of an operator definition.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DataType {
    F32 = 1,
    F16 = 2,
    I32 = 3,
    U8 = 4,
}

impl DataType {
    pub fn size_of(&self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 => 2,
            DataType::I32 => 4,
            DataType::U8 => 1,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F16)
    }
}

impl TryFrom<i64> for DataType {
    type Error = Error;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(DataType::F32),
            2 => Ok(DataType::F16),
            3 => Ok(DataType::I32),
            4 => Ok(DataType::U8),
            _ => Err((ErrorKind::Unsupported, format!("unknown data type id {}", v)).into()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::I32 => "i32",
            DataType::U8 => "u8",
        };
        write!(f, "{}", s)
    }
}
