use std::fmt::Display;
use std::str::FromStr;

pub type DimSize = u64;
pub type Shape = smallvec::SmallVec<[DimSize; 5]>;

/// The closed dtype vocabulary. A variant's position in declaration order is
/// its fingerprint index, so new variants must only ever be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, enum_iterator::Sequence)]
pub enum Dtype {
    Float16,
    Float32,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Bool,
    Bfloat16,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown dtype '{0}'")]
pub struct UnknownDtypeName(pub String);

impl Dtype {
    pub fn vocab_index(&self) -> usize {
        enum_iterator::all::<Dtype>()
            .position(|d| d == *self)
            .unwrap_or_else(|| unreachable!("{self} is a member of its own vocabulary"))
    }
}

impl Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Dtype::Float16 => "float16",
            Dtype::Float32 => "float32",
            Dtype::Int8 => "int8",
            Dtype::Uint8 => "uint8",
            Dtype::Int16 => "int16",
            Dtype::Uint16 => "uint16",
            Dtype::Int32 => "int32",
            Dtype::Uint32 => "uint32",
            Dtype::Int64 => "int64",
            Dtype::Uint64 => "uint64",
            Dtype::Bool => "bool",
            Dtype::Bfloat16 => "bfloat16",
        };
        f.write_str(s)
    }
}

impl FromStr for Dtype {
    type Err = UnknownDtypeName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        enum_iterator::all::<Dtype>()
            .find(|d| d.to_string() == s)
            .ok_or_else(|| UnknownDtypeName(s.to_owned()))
    }
}
