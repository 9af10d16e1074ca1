//! Decoding of solc type strings.
//!
//! Only the shapes the instrumenter inspects are decoded: function types (to classify callees)
//! and parameter types (to re-declare them in generated wrappers).

use std::str::FromStr;

use scribe_spec_lang::{DataLocation, SType};

use super::{StateMutability, TypeName, Visibility};
use crate::error::InstrumentationError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamDesc {
    pub type_name: TypeName,
    pub location: DataLocation,
}

/// A decoded `function (..) <modifiers> returns (..)` type string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionTypeDesc {
    pub params: Vec<ParamDesc>,
    pub returns: Vec<ParamDesc>,
    pub visibility: Visibility,
    pub mutability: StateMutability,
}

impl FunctionTypeDesc {
    pub fn is_external(&self) -> bool {
        self.visibility == Visibility::External
    }
}

/// Split `s` at top-level commas.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = vec![];
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

/// Take a parenthesized group from the start of `s`; returns its contents and the rest.
fn take_group(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if !s.starts_with('(') {
        return None;
    }
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&s[1..i], &s[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

impl FromStr for FunctionTypeDesc {
    type Err = InstrumentationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || InstrumentationError::Internal(format!("malformed function type `{s}`"));

        let rest = s.trim().strip_prefix("function").ok_or_else(bad)?;
        let (params, mut rest) = take_group(rest).ok_or_else(bad)?;

        let mut visibility = Visibility::Internal;
        let mut mutability = StateMutability::NonPayable;
        let mut returns = "";
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            if let Some(after) = rest.strip_prefix("returns") {
                let (group, tail) = take_group(after).ok_or_else(bad)?;
                returns = group;
                rest = tail;
                continue;
            }
            let word_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            match &rest[..word_end] {
                "external" => visibility = Visibility::External,
                "public" => visibility = Visibility::Public,
                "internal" => visibility = Visibility::Internal,
                "private" => visibility = Visibility::Private,
                "pure" => mutability = StateMutability::Pure,
                "view" => mutability = StateMutability::View,
                "payable" => mutability = StateMutability::Payable,
                "nonpayable" => mutability = StateMutability::NonPayable,
                _ => {}
            }
            rest = &rest[word_end..];
        }

        Ok(Self {
            params: split_top_level(params).into_iter().map(parse_param).collect(),
            returns: split_top_level(returns).into_iter().map(parse_param).collect(),
            visibility,
            mutability,
        })
    }
}

/// Decode one parameter type such as `bytes memory` or `struct C.S calldata`.
pub fn parse_param(s: &str) -> ParamDesc {
    let s = s.trim();
    for (suffix, location) in [
        (" memory", DataLocation::Memory),
        (" storage pointer", DataLocation::Storage),
        (" storage ref", DataLocation::Storage),
        (" storage", DataLocation::Storage),
        (" calldata", DataLocation::Calldata),
    ] {
        if let Some(ty) = s.strip_suffix(suffix) {
            return ParamDesc { type_name: parse_type_name(ty), location };
        }
    }
    ParamDesc { type_name: parse_type_name(s), location: DataLocation::Default }
}

/// Decode a type string without data location.
pub fn parse_type_name(s: &str) -> TypeName {
    let s = s.trim();

    if let Some(inner) = s.strip_prefix("mapping(").and_then(|rest| rest.strip_suffix(')')) {
        if let Some((key, value)) = inner.split_once("=>") {
            return TypeName::Mapping(
                Box::new(parse_type_name(key)),
                Box::new(parse_type_name(value)),
            );
        }
    }

    if let Some(open) = s.strip_suffix(']').and_then(|rest| rest.rfind('[')) {
        let base = parse_type_name(&s[..open]);
        let len = &s[open + 1..s.len() - 1];
        return TypeName::Array(Box::new(base), (!len.is_empty()).then(|| len.to_string()));
    }

    for prefix in ["contract ", "struct ", "enum ", "library ", "interface "] {
        if let Some(name) = s.strip_prefix(prefix) {
            return TypeName::UserDefined(name.to_string());
        }
    }

    TypeName::Elementary(s.to_string())
}

/// The host type name of an annotation-language type.
pub fn stype_to_type_name(ty: &SType) -> TypeName {
    match ty {
        SType::Array { elem, size, .. } => {
            TypeName::Array(Box::new(stype_to_type_name(elem)), size.map(|n| n.to_string()))
        }
        SType::Mapping { key, value } => TypeName::Mapping(
            Box::new(stype_to_type_name(key)),
            Box::new(stype_to_type_name(value)),
        ),
        SType::UserDefined(name) => TypeName::UserDefined(name.clone()),
        other => TypeName::Elementary(other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_function_type() {
        let desc: FunctionTypeDesc =
            "function (address,uint256) external returns (bool)".parse().unwrap();
        assert!(desc.is_external());
        assert_eq!(desc.mutability, StateMutability::NonPayable);
        assert_eq!(desc.params.len(), 2);
        assert_eq!(desc.returns[0].type_name, TypeName::elementary("bool"));
    }

    #[test]
    fn test_low_level_call_type() {
        let desc: FunctionTypeDesc =
            "function (bytes memory) payable returns (bool,bytes memory)".parse().unwrap();
        assert_eq!(desc.visibility, Visibility::Internal);
        assert_eq!(desc.mutability, StateMutability::Payable);
        assert_eq!(
            desc.returns[1],
            ParamDesc { type_name: TypeName::elementary("bytes"), location: DataLocation::Memory }
        );
    }

    #[test]
    fn test_view_without_params() {
        let desc: FunctionTypeDesc = "function () view external returns (uint256)".parse().unwrap();
        assert!(desc.params.is_empty());
        assert_eq!(desc.mutability, StateMutability::View);
        assert!("uint256".parse::<FunctionTypeDesc>().is_err());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(parse_type_name("contract IERC20"), TypeName::UserDefined("IERC20".into()));
        assert_eq!(parse_type_name("uint8[][3]").to_string(), "uint8[][3]");
        assert_eq!(
            parse_type_name("mapping(address => uint256)").to_string(),
            "mapping(address => uint256)"
        );
        assert_eq!(parse_param("struct C.S storage ref").location, DataLocation::Storage);
    }
}
