//! Node kinds of the host (Solidity) AST.
//!
//! Child nodes are referenced by [`NodeId`] and owned by the arena. Cross references (a call to
//! a declaration, a base contract) are plain ids too, but do not count as children.

use std::fmt;

use scribe_spec_lang::DataLocation;
use serde::{Deserialize, Serialize};

use super::NodeId;

/// Type string carried by nodes built during instrumentation. Calls whose callee carries it are
/// never treated as external call sites.
pub const MISSING_TYPE: &str = "<missing>";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ContractKind {
    Contract,
    Interface,
    Library,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    Constructor,
    Function,
    Fallback,
    Receive,
    FreeFunction,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
    External,
    Public,
    Internal,
    Private,
    /// No visibility written in the source.
    #[default]
    Default,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum StateMutability {
    Pure,
    View,
    #[default]
    NonPayable,
    Payable,
}

impl StateMutability {
    /// Whether a function with this mutability may write state.
    pub fn changes_state(&self) -> bool {
        matches!(self, Self::NonPayable | Self::Payable)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mutability {
    #[default]
    Mutable,
    Immutable,
    Constant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiteralKind {
    Number,
    Bool,
    String,
    HexString,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionCallKind {
    #[default]
    FunctionCall,
    TypeConversion,
    StructConstructorCall,
}

/// Type names are small values rather than arena nodes: they are copied freely when signatures
/// are duplicated and are never instrumentation targets.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeName {
    /// `uint256`, `address payable`, `bytes32`, ...
    Elementary(String),
    /// A contract, struct or enum, possibly qualified (`C.S`).
    UserDefined(String),
    Array(Box<TypeName>, Option<String>),
    Mapping(Box<TypeName>, Box<TypeName>),
}

impl TypeName {
    pub fn elementary(name: &str) -> Self {
        Self::Elementary(name.to_string())
    }

    /// Value types never carry a data location.
    pub fn is_value_type(&self) -> bool {
        match self {
            Self::Elementary(name) => !matches!(name.as_str(), "string" | "bytes"),
            Self::UserDefined(_) => false,
            Self::Array(..) | Self::Mapping(..) => false,
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elementary(name) | Self::UserDefined(name) => write!(f, "{name}"),
            Self::Array(base, Some(len)) => write!(f, "{base}[{len}]"),
            Self::Array(base, None) => write!(f, "{base}[]"),
            Self::Mapping(key, value) => write!(f, "mapping({key} => {value})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceUnit {
    pub path: String,
    pub file_index: usize,
    pub nodes: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InheritanceSpecifier {
    pub name: String,
    pub contract: Option<NodeId>,
    pub arguments: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContractDefinition {
    pub name: String,
    pub kind: ContractKind,
    pub is_abstract: bool,
    pub base_contracts: Vec<InheritanceSpecifier>,
    /// Self first, most basic contract last.
    pub linearized_base_contracts: Vec<NodeId>,
    pub nodes: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub kind: FunctionKind,
    pub visibility: Visibility,
    pub state_mutability: StateMutability,
    pub is_virtual: bool,
    /// `None` for no override specifier, `Some(vec![])` for a bare `override`.
    pub overrides: Option<Vec<String>>,
    pub parameters: Vec<NodeId>,
    pub return_parameters: Vec<NodeId>,
    pub modifiers: Vec<NodeId>,
    pub body: Option<NodeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariableDeclaration {
    pub name: String,
    pub type_name: TypeName,
    pub location: DataLocation,
    pub visibility: Visibility,
    pub mutability: Mutability,
    pub state_variable: bool,
    pub indexed: bool,
    pub value: Option<NodeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCall {
    pub kind: FunctionCallKind,
    pub expression: NodeId,
    pub arguments: Vec<NodeId>,
    pub type_string: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    SourceUnit(SourceUnit),
    PragmaDirective { literals: String },
    ImportDirective { path: String },
    ContractDefinition(ContractDefinition),
    StructDefinition { name: String, members: Vec<NodeId> },
    EventDefinition { name: String, parameters: Vec<NodeId>, anonymous: bool },
    FunctionDefinition(FunctionDefinition),
    VariableDeclaration(VariableDeclaration),
    ModifierInvocation { name: String, arguments: Vec<NodeId> },

    Block { statements: Vec<NodeId> },
    UncheckedBlock { statements: Vec<NodeId> },
    ExpressionStatement { expression: NodeId },
    VariableDeclarationStatement { declarations: Vec<Option<NodeId>>, initial_value: Option<NodeId> },
    IfStatement { condition: NodeId, true_body: NodeId, false_body: Option<NodeId> },
    ForStatement {
        initialization: Option<NodeId>,
        condition: Option<NodeId>,
        loop_expression: Option<NodeId>,
        body: NodeId,
    },
    WhileStatement { condition: NodeId, body: NodeId },
    DoWhileStatement { condition: NodeId, body: NodeId },
    Return { expression: Option<NodeId> },
    EmitStatement { event_call: NodeId },
    RevertStatement { error_call: NodeId },
    Break,
    Continue,
    PlaceholderStatement,
    /// Inline assembly, kept verbatim.
    InlineAssembly { source: String },

    Identifier { name: String, type_string: String, referenced_declaration: Option<NodeId> },
    Literal { kind: LiteralKind, value: String, type_string: String },
    Assignment { operator: String, lhs: NodeId, rhs: NodeId, type_string: String },
    BinaryOperation { operator: String, lhs: NodeId, rhs: NodeId, type_string: String },
    UnaryOperation { operator: String, prefix: bool, sub: NodeId, type_string: String },
    Conditional {
        condition: NodeId,
        true_expression: NodeId,
        false_expression: NodeId,
        type_string: String,
    },
    FunctionCall(FunctionCall),
    FunctionCallOptions { expression: NodeId, names: Vec<String>, options: Vec<NodeId> },
    MemberAccess {
        expression: NodeId,
        member_name: String,
        type_string: String,
        referenced_declaration: Option<NodeId>,
    },
    IndexAccess { base: NodeId, index: Option<NodeId>, type_string: String },
    TupleExpression { components: Vec<Option<NodeId>>, is_inline_array: bool },
    ElementaryTypeNameExpression { type_name: TypeName },
    NewExpression { type_name: TypeName },
}

impl NodeKind {
    /// Child nodes in source order.
    pub fn children(&self) -> Vec<NodeId> {
        fn opt(ids: &[Option<NodeId>]) -> impl Iterator<Item = NodeId> + '_ {
            ids.iter().flatten().copied()
        }

        match self {
            Self::SourceUnit(unit) => unit.nodes.clone(),
            Self::ContractDefinition(contract) => contract
                .base_contracts
                .iter()
                .flat_map(|base| base.arguments.iter().copied())
                .chain(contract.nodes.iter().copied())
                .collect(),
            Self::StructDefinition { members, .. } => members.clone(),
            Self::EventDefinition { parameters, .. } => parameters.clone(),
            Self::FunctionDefinition(func) => func
                .parameters
                .iter()
                .chain(func.modifiers.iter())
                .chain(func.return_parameters.iter())
                .chain(func.body.iter())
                .copied()
                .collect(),
            Self::VariableDeclaration(decl) => decl.value.into_iter().collect(),
            Self::ModifierInvocation { arguments, .. } => arguments.clone(),
            Self::Block { statements } | Self::UncheckedBlock { statements } => statements.clone(),
            Self::ExpressionStatement { expression } => vec![*expression],
            Self::VariableDeclarationStatement { declarations, initial_value } => {
                opt(declarations).chain(initial_value.iter().copied()).collect()
            }
            Self::IfStatement { condition, true_body, false_body } => {
                [Some(*condition), Some(*true_body), *false_body].into_iter().flatten().collect()
            }
            Self::ForStatement { initialization, condition, loop_expression, body } => {
                [*initialization, *condition, *loop_expression, Some(*body)]
                    .into_iter()
                    .flatten()
                    .collect()
            }
            Self::WhileStatement { condition, body } => vec![*condition, *body],
            Self::DoWhileStatement { condition, body } => vec![*body, *condition],
            Self::Return { expression } => expression.iter().copied().collect(),
            Self::EmitStatement { event_call } => vec![*event_call],
            Self::RevertStatement { error_call } => vec![*error_call],
            Self::Assignment { lhs, rhs, .. } | Self::BinaryOperation { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            Self::UnaryOperation { sub, .. } => vec![*sub],
            Self::Conditional { condition, true_expression, false_expression, .. } => {
                vec![*condition, *true_expression, *false_expression]
            }
            Self::FunctionCall(call) => {
                std::iter::once(call.expression).chain(call.arguments.iter().copied()).collect()
            }
            Self::FunctionCallOptions { expression, options, .. } => {
                std::iter::once(*expression).chain(options.iter().copied()).collect()
            }
            Self::MemberAccess { expression, .. } => vec![*expression],
            Self::IndexAccess { base, index, .. } => {
                std::iter::once(*base).chain(index.iter().copied()).collect()
            }
            Self::TupleExpression { components, .. } => opt(components).collect(),
            Self::PragmaDirective { .. } |
            Self::ImportDirective { .. } |
            Self::Break |
            Self::Continue |
            Self::PlaceholderStatement |
            Self::InlineAssembly { .. } |
            Self::Identifier { .. } |
            Self::Literal { .. } |
            Self::ElementaryTypeNameExpression { .. } |
            Self::NewExpression { .. } => vec![],
        }
    }

    /// The ordered member list of a container node, for the list-insertion operations.
    pub fn members_mut(&mut self) -> Option<&mut Vec<NodeId>> {
        match self {
            Self::SourceUnit(unit) => Some(&mut unit.nodes),
            Self::ContractDefinition(contract) => Some(&mut contract.nodes),
            Self::Block { statements } | Self::UncheckedBlock { statements } => Some(statements),
            _ => None,
        }
    }

    pub fn members(&self) -> Option<&[NodeId]> {
        match self {
            Self::SourceUnit(unit) => Some(&unit.nodes),
            Self::ContractDefinition(contract) => Some(&contract.nodes),
            Self::Block { statements } | Self::UncheckedBlock { statements } => Some(statements),
            _ => None,
        }
    }

    /// Replace every occurrence of child `old` by `new`. Returns whether anything was replaced.
    pub fn replace_child(&mut self, old: NodeId, new: NodeId) -> bool {
        let mut replaced = false;
        let mut swap = |slot: &mut NodeId| {
            if *slot == old {
                *slot = new;
                replaced = true;
            }
        };

        match self {
            Self::SourceUnit(SourceUnit { nodes, .. }) |
            Self::StructDefinition { members: nodes, .. } |
            Self::EventDefinition { parameters: nodes, .. } |
            Self::ModifierInvocation { arguments: nodes, .. } |
            Self::Block { statements: nodes } |
            Self::UncheckedBlock { statements: nodes } => nodes.iter_mut().for_each(swap),
            Self::ContractDefinition(contract) => {
                contract
                    .base_contracts
                    .iter_mut()
                    .flat_map(|base| base.arguments.iter_mut())
                    .for_each(&mut swap);
                contract.nodes.iter_mut().for_each(swap);
            }
            Self::FunctionDefinition(func) => func
                .parameters
                .iter_mut()
                .chain(func.modifiers.iter_mut())
                .chain(func.return_parameters.iter_mut())
                .chain(func.body.iter_mut())
                .for_each(swap),
            Self::VariableDeclaration(decl) => decl.value.iter_mut().for_each(swap),
            Self::ExpressionStatement { expression } => swap(expression),
            Self::VariableDeclarationStatement { declarations, initial_value } => declarations
                .iter_mut()
                .flatten()
                .chain(initial_value.iter_mut())
                .for_each(swap),
            Self::IfStatement { condition, true_body, false_body } => {
                swap(condition);
                swap(true_body);
                false_body.iter_mut().for_each(swap);
            }
            Self::ForStatement { initialization, condition, loop_expression, body } => {
                initialization
                    .iter_mut()
                    .chain(condition.iter_mut())
                    .chain(loop_expression.iter_mut())
                    .for_each(&mut swap);
                swap(body);
            }
            Self::WhileStatement { condition, body } |
            Self::DoWhileStatement { condition, body } => {
                swap(condition);
                swap(body);
            }
            Self::Return { expression } => expression.iter_mut().for_each(swap),
            Self::EmitStatement { event_call: id } |
            Self::RevertStatement { error_call: id } |
            Self::UnaryOperation { sub: id, .. } |
            Self::MemberAccess { expression: id, .. } => swap(id),
            Self::Assignment { lhs, rhs, .. } | Self::BinaryOperation { lhs, rhs, .. } => {
                swap(lhs);
                swap(rhs);
            }
            Self::Conditional { condition, true_expression, false_expression, .. } => {
                swap(condition);
                swap(true_expression);
                swap(false_expression);
            }
            Self::FunctionCall(call) => {
                swap(&mut call.expression);
                call.arguments.iter_mut().for_each(swap);
            }
            Self::FunctionCallOptions { expression, options, .. } => {
                swap(expression);
                options.iter_mut().for_each(swap);
            }
            Self::IndexAccess { base, index, .. } => {
                swap(base);
                index.iter_mut().for_each(swap);
            }
            Self::TupleExpression { components, .. } => {
                components.iter_mut().flatten().for_each(swap)
            }
            Self::PragmaDirective { .. } |
            Self::ImportDirective { .. } |
            Self::Break |
            Self::Continue |
            Self::PlaceholderStatement |
            Self::InlineAssembly { .. } |
            Self::Identifier { .. } |
            Self::Literal { .. } |
            Self::ElementaryTypeNameExpression { .. } |
            Self::NewExpression { .. } => {}
        }

        replaced
    }

    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            Self::Block { .. } |
                Self::UncheckedBlock { .. } |
                Self::ExpressionStatement { .. } |
                Self::VariableDeclarationStatement { .. } |
                Self::IfStatement { .. } |
                Self::ForStatement { .. } |
                Self::WhileStatement { .. } |
                Self::DoWhileStatement { .. } |
                Self::Return { .. } |
                Self::EmitStatement { .. } |
                Self::RevertStatement { .. } |
                Self::Break |
                Self::Continue |
                Self::PlaceholderStatement |
                Self::InlineAssembly { .. }
        )
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block { .. } | Self::UncheckedBlock { .. })
    }

    /// The solc type string of an expression node, where one is recorded.
    pub fn type_string(&self) -> Option<&str> {
        match self {
            Self::Identifier { type_string, .. } |
            Self::Literal { type_string, .. } |
            Self::Assignment { type_string, .. } |
            Self::BinaryOperation { type_string, .. } |
            Self::UnaryOperation { type_string, .. } |
            Self::Conditional { type_string, .. } |
            Self::MemberAccess { type_string, .. } |
            Self::IndexAccess { type_string, .. } => Some(type_string),
            Self::FunctionCall(call) => Some(&call.type_string),
            _ => None,
        }
    }

    /// Short name of the node kind, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SourceUnit(_) => "SourceUnit",
            Self::PragmaDirective { .. } => "PragmaDirective",
            Self::ImportDirective { .. } => "ImportDirective",
            Self::ContractDefinition(_) => "ContractDefinition",
            Self::StructDefinition { .. } => "StructDefinition",
            Self::EventDefinition { .. } => "EventDefinition",
            Self::FunctionDefinition(_) => "FunctionDefinition",
            Self::VariableDeclaration(_) => "VariableDeclaration",
            Self::ModifierInvocation { .. } => "ModifierInvocation",
            Self::Block { .. } => "Block",
            Self::UncheckedBlock { .. } => "UncheckedBlock",
            Self::ExpressionStatement { .. } => "ExpressionStatement",
            Self::VariableDeclarationStatement { .. } => "VariableDeclarationStatement",
            Self::IfStatement { .. } => "IfStatement",
            Self::ForStatement { .. } => "ForStatement",
            Self::WhileStatement { .. } => "WhileStatement",
            Self::DoWhileStatement { .. } => "DoWhileStatement",
            Self::Return { .. } => "Return",
            Self::EmitStatement { .. } => "EmitStatement",
            Self::RevertStatement { .. } => "RevertStatement",
            Self::Break => "Break",
            Self::Continue => "Continue",
            Self::PlaceholderStatement => "PlaceholderStatement",
            Self::InlineAssembly { .. } => "InlineAssembly",
            Self::Identifier { .. } => "Identifier",
            Self::Literal { .. } => "Literal",
            Self::Assignment { .. } => "Assignment",
            Self::BinaryOperation { .. } => "BinaryOperation",
            Self::UnaryOperation { .. } => "UnaryOperation",
            Self::Conditional { .. } => "Conditional",
            Self::FunctionCall(_) => "FunctionCall",
            Self::FunctionCallOptions { .. } => "FunctionCallOptions",
            Self::MemberAccess { .. } => "MemberAccess",
            Self::IndexAccess { .. } => "IndexAccess",
            Self::TupleExpression { .. } => "TupleExpression",
            Self::ElementaryTypeNameExpression { .. } => "ElementaryTypeNameExpression",
            Self::NewExpression { .. } => "NewExpression",
        }
    }
}
