//! The annotation-language AST.
//!
//! Nodes are a closed set of tagged variants. Every node carries an identity allocated from an
//! explicit [`IdAllocator`], an optional [`NodeLocation`], and the type assigned by the type
//! checker (if any).

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{location::NodeLocation, types::SType, AnnotationType, SpecError, SrcRange};

/// Identity of an annotation-language node. Used for debugging and keyed lookups only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SNodeId(u64);

impl SNodeId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out node ids in assignment order. Ids are never reused by the same allocator.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start allocating after `start`; used when several parsers share one id space.
    pub fn starting_at(start: u64) -> Self {
        Self { next: start }
    }

    pub fn next_id(&mut self) -> SNodeId {
        let id = SNodeId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far (including the starting offset).
    pub fn allocated(&self) -> u64 {
        self.next
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum UnaryOp {
    #[strum(to_string = "-")]
    Neg,
    #[strum(to_string = "!")]
    Not,
    #[strum(to_string = "old")]
    Old,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum BinaryOp {
    #[strum(to_string = "**")]
    Pow,
    #[strum(to_string = "*")]
    Mul,
    #[strum(to_string = "/")]
    Div,
    #[strum(to_string = "%")]
    Mod,
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "<<")]
    Shl,
    #[strum(to_string = ">>")]
    Shr,
    #[strum(to_string = "&")]
    BitAnd,
    #[strum(to_string = "^")]
    BitXor,
    #[strum(to_string = "|")]
    BitOr,
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = "<=")]
    Le,
    #[strum(to_string = ">=")]
    Ge,
    #[strum(to_string = "==")]
    Eq,
    #[strum(to_string = "!=")]
    Ne,
    #[strum(to_string = "&&")]
    And,
    #[strum(to_string = "||")]
    Or,
    #[strum(to_string = "==>")]
    Implies,
    #[strum(to_string = "<==>")]
    Iff,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SNodeKind {
    /// A plain identifier.
    Id(String),
    /// A numeric literal, as written (decimal or `0x`-prefixed hex).
    Number(String),
    Bool(bool),
    StringLiteral(String),
    /// A hex string literal, given as the hex digits only.
    HexLiteral(String),
    AddressLiteral(String),
    /// `$result`, the single return value of the annotated function.
    Result,
    UnaryOperation {
        op: UnaryOp,
        sub: Box<SNode>,
    },
    BinaryOperation {
        left: Box<SNode>,
        op: BinaryOp,
        right: Box<SNode>,
    },
    Conditional {
        condition: Box<SNode>,
        true_case: Box<SNode>,
        false_case: Box<SNode>,
    },
    IndexAccess {
        base: Box<SNode>,
        index: Box<SNode>,
    },
    MemberAccess {
        base: Box<SNode>,
        member: String,
    },
    FunctionCall {
        callee: Box<SNode>,
        args: Vec<SNode>,
    },
    /// `let x := rhs in body`.
    Let {
        names: Vec<String>,
        rhs: Box<SNode>,
        body: Box<SNode>,
    },

    /// `#require`/`#try`/`#assert`/`#if_succeeds`/`#invariant` annotation.
    Property {
        kind: AnnotationType,
        expr: Box<SNode>,
    },
    /// `#let name := expr;` annotation.
    LetAnnotation {
        name: String,
        expr: Box<SNode>,
    },
    /// `#define name(params) returns_type = body;` annotation.
    UserFunctionDefinition {
        name: String,
        params: Vec<(String, SType)>,
        return_type: SType,
        body: Box<SNode>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SNode {
    pub id: SNodeId,
    pub src: Option<NodeLocation>,
    pub ty: Option<SType>,
    pub kind: SNodeKind,
}

impl SNode {
    pub fn new(ids: &mut IdAllocator, kind: SNodeKind) -> Self {
        Self { id: ids.next_id(), src: None, ty: None, kind }
    }

    pub fn at(mut self, loc: impl Into<NodeLocation>) -> Self {
        self.src = Some(loc.into());
        self
    }

    pub fn typed(mut self, ty: SType) -> Self {
        self.ty = Some(ty);
        self
    }

    /// Direct children, in field order.
    pub fn children(&self) -> Vec<&SNode> {
        match &self.kind {
            SNodeKind::Id(_) |
            SNodeKind::Number(_) |
            SNodeKind::Bool(_) |
            SNodeKind::StringLiteral(_) |
            SNodeKind::HexLiteral(_) |
            SNodeKind::AddressLiteral(_) |
            SNodeKind::Result => vec![],
            SNodeKind::UnaryOperation { sub, .. } => vec![sub],
            SNodeKind::BinaryOperation { left, right, .. } => vec![left, right],
            SNodeKind::Conditional { condition, true_case, false_case } => {
                vec![condition, true_case, false_case]
            }
            SNodeKind::IndexAccess { base, index } => vec![base, index],
            SNodeKind::MemberAccess { base, .. } => vec![base],
            SNodeKind::FunctionCall { callee, args } => {
                std::iter::once(callee.as_ref()).chain(args.iter()).collect()
            }
            SNodeKind::Let { rhs, body, .. } => vec![rhs, body],
            SNodeKind::Property { expr, .. } | SNodeKind::LetAnnotation { expr, .. } => {
                vec![expr]
            }
            SNodeKind::UserFunctionDefinition { body, .. } => vec![body],
        }
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, cb: &mut impl FnMut(&'a SNode)) {
        cb(self);
        for child in self.children() {
            child.walk(cb);
        }
    }

    /// The location of this node. Fails if the parser did not attach one.
    pub fn required_src(&self) -> Result<NodeLocation, SpecError> {
        self.src.ok_or(SpecError::MissingLocation(self.id))
    }

    /// The primary range of this node. For macro-instantiated nodes this is the range inside
    /// the macro definition.
    pub fn required_range(&self) -> Result<SrcRange, SpecError> {
        Ok(self.required_src()?.primary())
    }

    pub fn source_fragment<'a>(&self, source: &'a str) -> Result<&'a str, SpecError> {
        let range = self.required_range()?;
        range.fragment(source).ok_or_else(|| SpecError::MalformedRange(range.to_string()))
    }

    /// The expression an annotation evaluates: the predicate of a property, the right-hand side
    /// of a `let` annotation, or the body of a user function. `None` for plain expressions.
    pub fn annotation_expr(&self) -> Option<&SNode> {
        match &self.kind {
            SNodeKind::Property { expr, .. } | SNodeKind::LetAnnotation { expr, .. } => Some(expr),
            SNodeKind::UserFunctionDefinition { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl fmt::Display for SNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SNodeKind::Id(name) => write!(f, "{name}"),
            SNodeKind::Number(value) => write!(f, "{value}"),
            SNodeKind::Bool(value) => write!(f, "{value}"),
            SNodeKind::StringLiteral(value) => write!(f, "{value:?}"),
            SNodeKind::HexLiteral(value) => write!(f, "hex\"{value}\""),
            SNodeKind::AddressLiteral(value) => write!(f, "{value}"),
            SNodeKind::Result => write!(f, "$result"),
            SNodeKind::UnaryOperation { op: UnaryOp::Old, sub } => write!(f, "old({sub})"),
            SNodeKind::UnaryOperation { op, sub } => write!(f, "({op}{sub})"),
            SNodeKind::BinaryOperation { left, op, right } => write!(f, "({left} {op} {right})"),
            SNodeKind::Conditional { condition, true_case, false_case } => {
                write!(f, "({condition} ? {true_case} : {false_case})")
            }
            SNodeKind::IndexAccess { base, index } => write!(f, "{base}[{index}]"),
            SNodeKind::MemberAccess { base, member } => write!(f, "{base}.{member}"),
            SNodeKind::FunctionCall { callee, args } => {
                write!(f, "{callee}({})", args.iter().join(", "))
            }
            SNodeKind::Let { names, rhs, body } => {
                write!(f, "(let {} := {rhs} in {body})", names.join(", "))
            }
            SNodeKind::Property { kind, expr } => write!(f, "#{kind} {expr};"),
            SNodeKind::LetAnnotation { name, expr } => write!(f, "#let {name} := {expr};"),
            SNodeKind::UserFunctionDefinition { name, params, return_type, body } => {
                let params = params.iter().map(|(name, ty)| format!("{ty} {name}")).join(", ");
                write!(f, "#define {name}({params}) {return_type} = {body};")
            }
        }
    }
}

/// Shorthand constructors sharing one allocator. Used by annotation parsers and in tests.
pub struct NodeBuilder<'a> {
    ids: &'a mut IdAllocator,
}

impl<'a> NodeBuilder<'a> {
    pub fn new(ids: &'a mut IdAllocator) -> Self {
        Self { ids }
    }

    pub fn node(&mut self, kind: SNodeKind) -> SNode {
        SNode::new(self.ids, kind)
    }

    pub fn id(&mut self, name: &str) -> SNode {
        self.node(SNodeKind::Id(name.to_string()))
    }

    pub fn number(&mut self, value: impl ToString) -> SNode {
        self.node(SNodeKind::Number(value.to_string())).typed(SType::uint256())
    }

    pub fn boolean(&mut self, value: bool) -> SNode {
        self.node(SNodeKind::Bool(value)).typed(SType::Bool)
    }

    pub fn result(&mut self) -> SNode {
        self.node(SNodeKind::Result)
    }

    pub fn unary(&mut self, op: UnaryOp, sub: SNode) -> SNode {
        self.node(SNodeKind::UnaryOperation { op, sub: Box::new(sub) })
    }

    pub fn old(&mut self, sub: SNode) -> SNode {
        let ty = sub.ty.clone();
        let node = self.unary(UnaryOp::Old, sub);
        Self::with_ty(node, ty)
    }

    pub fn binary(&mut self, left: SNode, op: BinaryOp, right: SNode) -> SNode {
        let ty = match op {
            BinaryOp::Lt |
            BinaryOp::Gt |
            BinaryOp::Le |
            BinaryOp::Ge |
            BinaryOp::Eq |
            BinaryOp::Ne |
            BinaryOp::And |
            BinaryOp::Or |
            BinaryOp::Implies |
            BinaryOp::Iff => Some(SType::Bool),
            _ => left.ty.clone(),
        };
        let node = self.node(SNodeKind::BinaryOperation {
            left: Box::new(left),
            op,
            right: Box::new(right),
        });
        Self::with_ty(node, ty)
    }

    pub fn call(&mut self, callee: SNode, args: Vec<SNode>) -> SNode {
        self.node(SNodeKind::FunctionCall { callee: Box::new(callee), args })
    }

    pub fn member(&mut self, base: SNode, member: &str) -> SNode {
        self.node(SNodeKind::MemberAccess { base: Box::new(base), member: member.to_string() })
    }

    pub fn index(&mut self, base: SNode, index: SNode) -> SNode {
        self.node(SNodeKind::IndexAccess { base: Box::new(base), index: Box::new(index) })
    }

    pub fn property(&mut self, kind: AnnotationType, expr: SNode) -> SNode {
        self.node(SNodeKind::Property { kind, expr: Box::new(expr) })
    }

    pub fn let_annotation(&mut self, name: &str, expr: SNode) -> SNode {
        self.node(SNodeKind::LetAnnotation { name: name.to_string(), expr: Box::new(expr) })
    }

    pub fn user_function(
        &mut self,
        name: &str,
        params: Vec<(String, SType)>,
        return_type: SType,
        body: SNode,
    ) -> SNode {
        self.node(SNodeKind::UserFunctionDefinition {
            name: name.to_string(),
            params,
            return_type,
            body: Box::new(body),
        })
    }

    fn with_ty(mut node: SNode, ty: Option<SType>) -> SNode {
        node.ty = ty;
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_assignment_ordered() {
        let mut ids = IdAllocator::new();
        let mut b = NodeBuilder::new(&mut ids);
        let x = b.id("x");
        let zero = b.number(0);
        let cmp = b.binary(x, BinaryOp::Gt, zero);

        let mut seen = vec![];
        cmp.walk(&mut |n| seen.push(n.id.as_u64()));
        assert_eq!(seen, vec![2, 0, 1]);
        assert_eq!(ids.allocated(), 3);
    }

    #[test]
    fn test_separate_allocators_do_not_interfere() {
        let mut a = IdAllocator::new();
        let mut b = IdAllocator::starting_at(100);
        assert_eq!(a.next_id().as_u64(), 0);
        assert_eq!(b.next_id().as_u64(), 100);
        assert_eq!(a.next_id().as_u64(), 1);
    }

    #[test]
    fn test_pretty_print() {
        let mut ids = IdAllocator::new();
        let mut b = NodeBuilder::new(&mut ids);
        let x = b.id("x");
        let old_x = b.old(x);
        let x = b.id("x");
        let body = b.binary(x, BinaryOp::Ge, old_x);
        let prop = b.property(AnnotationType::IfSucceeds, body);
        assert_eq!(prop.to_string(), "#if_succeeds (x >= old(x));");

        let a = b.id("a");
        let one = b.number(1);
        let body = b.binary(a, BinaryOp::Add, one);
        let def = b.user_function("inc", vec![("a".into(), SType::uint256())], SType::uint256(), body);
        assert_eq!(def.to_string(), "#define inc(uint256 a) uint256 = (a + 1);");
    }

    #[test]
    fn test_required_range_uses_primary() {
        let mut ids = IdAllocator::new();
        let in_macro = SrcRange::new(3, 1, 1);
        let site = SrcRange::new(0, 10, 0);
        let node = SNode::new(&mut ids, SNodeKind::Id("x".into()))
            .at(NodeLocation::MacroInstantiated(in_macro, site));
        assert_eq!(node.required_range().unwrap(), in_macro);
        assert_eq!(node.source_fragment("abcxyz").unwrap(), "x");

        let bare = SNode::new(&mut ids, SNodeKind::Result);
        assert!(matches!(bare.required_range(), Err(SpecError::MissingLocation(_))));
    }
}
