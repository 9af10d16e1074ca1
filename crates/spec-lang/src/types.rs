use std::fmt;

use serde::{Deserialize, Serialize};

/// Data location of a reference type, mirroring the host language.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DataLocation {
    #[default]
    Default,
    Memory,
    Storage,
    Calldata,
}

/// Types of annotation-language expressions, as assigned by the type checker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SType {
    Bool,
    Int { bits: u16, signed: bool },
    Address { payable: bool },
    FixedBytes(u8),
    Bytes(DataLocation),
    String(DataLocation),
    Array { elem: Box<SType>, size: Option<u64>, location: DataLocation },
    Mapping { key: Box<SType>, value: Box<SType> },
    /// A contract, struct, enum or user-defined value type, by name.
    UserDefined(String),
}

impl SType {
    pub fn uint256() -> Self {
        Self::Int { bits: 256, signed: false }
    }

    pub fn int256() -> Self {
        Self::Int { bits: 256, signed: true }
    }

    /// Spelling of the type as a host-language type name, without data location.
    pub fn type_name(&self) -> String {
        match self {
            Self::Bool => "bool".to_string(),
            Self::Int { bits, signed: true } => format!("int{bits}"),
            Self::Int { bits, signed: false } => format!("uint{bits}"),
            Self::Address { payable: true } => "address payable".to_string(),
            Self::Address { payable: false } => "address".to_string(),
            Self::FixedBytes(n) => format!("bytes{n}"),
            Self::Bytes(_) => "bytes".to_string(),
            Self::String(_) => "string".to_string(),
            Self::Array { elem, size: Some(n), .. } => format!("{}[{n}]", elem.type_name()),
            Self::Array { elem, size: None, .. } => format!("{}[]", elem.type_name()),
            Self::Mapping { key, value } => {
                format!("mapping({} => {})", key.type_name(), value.type_name())
            }
            Self::UserDefined(name) => name.clone(),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::Bytes(_) | Self::String(_) | Self::Array { .. } | Self::Mapping { .. }
        )
    }

    /// The location a variable of this type must be declared with when it is a parameter or a
    /// return of a generated internal function.
    pub fn location(&self) -> DataLocation {
        match self {
            Self::Bytes(loc) | Self::String(loc) | Self::Array { location: loc, .. } => {
                match loc {
                    DataLocation::Default | DataLocation::Calldata => DataLocation::Memory,
                    other => *other,
                }
            }
            Self::Mapping { .. } => DataLocation::Storage,
            _ => DataLocation::Default,
        }
    }

    /// A short identifier-safe description, used to name generated helpers.
    pub fn desc(&self) -> String {
        match self {
            Self::Array { elem, size: Some(n), .. } => format!("{}_arr_{n}", elem.desc()),
            Self::Array { elem, size: None, .. } => format!("{}_arr", elem.desc()),
            Self::Mapping { key, value } => format!("mapping_{}_{}", key.desc(), value.desc()),
            Self::Address { .. } => "address".to_string(),
            other => other.type_name().replace('.', "_"),
        }
    }
}

impl fmt::Display for SType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            DataLocation::Default => write!(f, "{}", self.type_name()),
            loc => write!(f, "{} {loc}", self.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_spelling() {
        let arr = SType::Array {
            elem: Box::new(SType::Int { bits: 8, signed: true }),
            size: None,
            location: DataLocation::Storage,
        };
        assert_eq!(arr.type_name(), "int8[]");
        assert_eq!(arr.to_string(), "int8[] storage");
        assert_eq!(arr.desc(), "int8_arr");

        assert_eq!(SType::String(DataLocation::Calldata).to_string(), "string memory");
        assert_eq!(SType::uint256().to_string(), "uint256");
        assert!(!SType::Bool.is_reference());
    }
}
