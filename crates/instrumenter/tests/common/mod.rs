#![allow(dead_code)]

use scribe_instrumenter::{
    ast::{
        ContractKind, FunctionDefinition, FunctionKind, NodeId, NodeKind, SolAst,
        StateMutability, TypeName, VariableDeclaration, Visibility,
    },
    Annotations, InstrumentationResult,
};
use scribe_spec_lang::{
    AnnotationType, BinaryOp, DataLocation, IdAllocator, NodeBuilder, SNode, SType, SrcRange,
};

/// A host program under construction plus its annotations.
pub struct Program {
    pub ast: SolAst,
    pub annotations: Annotations,
    pub ids: IdAllocator,
    /// Annotation ranges are handed out from here when a test does not care about them.
    next_offset: usize,
}

impl Program {
    pub fn new() -> Self {
        Self { ast: SolAst::new(), annotations: Annotations::new(), ids: IdAllocator::new(), next_offset: 0 }
    }

    pub fn contract(&mut self, name: &str, kind: ContractKind, bases: &[&str]) -> NodeId {
        self.ast.make_contract(name, kind, bases)
    }

    pub fn state_var(&mut self, contract: NodeId, name: &str, ty: &str) -> NodeId {
        let decl = self.ast.make_variable(VariableDeclaration {
            state_variable: true,
            ..VariableDeclaration::new(name, TypeName::elementary(ty), DataLocation::Default)
        });
        self.ast.append_child(contract, decl).unwrap();
        decl
    }

    /// `function <name>() <visibility> <mutability> { <stmts> }`
    pub fn function(
        &mut self,
        contract: NodeId,
        name: &str,
        visibility: Visibility,
        mutability: StateMutability,
        stmts: Vec<NodeId>,
    ) -> NodeId {
        let func = self.ast.add_empty_function(contract, name, visibility, mutability).unwrap();
        let body = self.ast.function_definition(func).unwrap().body.unwrap();
        for stmt in stmts {
            self.ast.append_child(body, stmt).unwrap();
        }
        func
    }

    /// An interface function without a body.
    pub fn declaration(
        &mut self,
        contract: NodeId,
        name: &str,
        mutability: StateMutability,
        params: &[&str],
        returns: &[&str],
    ) -> NodeId {
        let params = params
            .iter()
            .map(|ty| self.ast.make_param("", TypeName::elementary(*ty), DataLocation::Default))
            .collect();
        let return_parameters = returns
            .iter()
            .map(|ty| self.ast.make_param("", TypeName::elementary(*ty), DataLocation::Default))
            .collect();
        let func = self.ast.add_function(FunctionDefinition {
            visibility: Visibility::External,
            state_mutability: mutability,
            parameters: params,
            return_parameters,
            ..FunctionDefinition::new(name, FunctionKind::Function)
        });
        self.ast.append_child(contract, func).unwrap();
        func
    }

    /// `<var> += 1;`
    pub fn increment(&mut self, var: &str) -> NodeId {
        let lhs = self.ast.make_identifier(var, "uint256");
        let one = self.ast.make_number(1);
        let assign = self.ast.add(
            NodeKind::Assignment {
                operator: "+=".to_string(),
                lhs,
                rhs: one,
                type_string: "uint256".to_string(),
            },
            None,
        );
        self.ast.make_expression_statement(assign)
    }

    /// `<receiver>.<member>(args..);` where the callee has the solc type `callee_type`.
    pub fn external_call(
        &mut self,
        receiver: &str,
        receiver_type: &str,
        member: &str,
        callee_type: &str,
        args: Vec<NodeId>,
    ) -> (NodeId, NodeId) {
        let base = self.ast.make_identifier(receiver, receiver_type);
        let callee = self.ast.make_member_access(base, member, callee_type);
        let call = self.ast.make_call(callee, args, "uint256");
        (call, self.ast.make_expression_statement(call))
    }

    pub fn unit(&mut self, path: &str, nodes: Vec<NodeId>) -> NodeId {
        let file_index = self.ast.units().len();
        let pragma = self.ast.make_pragma("solidity ^0.8.0");
        let mut members = vec![pragma];
        members.extend(nodes);
        self.ast.add_unit(path, file_index, members)
    }

    fn next_range(&mut self, length: usize) -> SrcRange {
        let range = SrcRange::new(self.next_offset, length, 0);
        self.next_offset += length + 1;
        range
    }

    /// `<var> > 0` over a `uint256` program variable.
    pub fn positive(&mut self, var: &str) -> SNode {
        let range = self.next_range(var.len() + 4);
        let mut b = NodeBuilder::new(&mut self.ids);
        let x = b.id(var).typed(SType::uint256());
        let zero = b.number(0);
        b.binary(x, BinaryOp::Gt, zero).at(range)
    }

    pub fn truth(&mut self) -> SNode {
        let range = self.next_range(4);
        NodeBuilder::new(&mut self.ids).boolean(true).at(range)
    }

    /// Attach a `kind` property over `expr` to `target`. Returns the annotation id.
    pub fn annotate(&mut self, target: NodeId, kind: AnnotationType, expr: SNode, message: &str) -> usize {
        let original = format!("#{kind} {};", expr);
        let range = self.next_range(original.len());
        let prop = NodeBuilder::new(&mut self.ids).property(kind, expr).at(range);
        self.annotations.push(target, prop, original, message).unwrap()
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

/// Printed source of the unit at `path`.
pub fn source<'a>(result: &'a InstrumentationResult, path: &str) -> &'a str {
    &result.sources.units.iter().find(|unit| unit.path == path).unwrap().source
}

/// Printed text of `node`.
pub fn printed<'a>(result: &'a InstrumentationResult, node: NodeId) -> &'a str {
    let range = result.sources.range_of(node).unwrap();
    range.fragment(result.sources.source(range.file_index).unwrap()).unwrap()
}

/// The function named `name` in `contract`.
pub fn function_named(ast: &SolAst, contract: NodeId, name: &str) -> NodeId {
    ast.functions_of(contract)
        .unwrap()
        .into_iter()
        .find(|f| ast.function_definition(*f).unwrap().name == name)
        .unwrap_or_else(|| panic!("no function {name}"))
}

/// Byte offset of `needle` in `haystack`, panicking with context when absent.
pub fn pos(haystack: &str, needle: &str) -> usize {
    haystack.find(needle).unwrap_or_else(|| panic!("`{needle}` not found in:\n{haystack}"))
}
