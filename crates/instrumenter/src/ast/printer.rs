//! Source emission.
//!
//! Printing records, for every printed node, the byte range it occupies in the emitted text.
//! The file index of a range is the position of its unit in the print order.

use std::fmt::Write as _;

use itertools::Itertools;
use rustc_hash::FxHashMap;
use scribe_spec_lang::{DataLocation, SrcRange};

use super::*;

const INDENT: &str = "    ";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrintedUnit {
    pub unit: NodeId,
    pub path: String,
    pub source: String,
}

#[derive(Clone, Debug, Default)]
pub struct PrintedSources {
    pub units: Vec<PrintedUnit>,
    pub ranges: FxHashMap<NodeId, SrcRange>,
}

impl PrintedSources {
    pub fn range_of(&self, node: NodeId) -> Option<SrcRange> {
        self.ranges.get(&node).copied()
    }

    pub fn source(&self, file_index: usize) -> Option<&str> {
        self.units.get(file_index).map(|unit| unit.source.as_str())
    }
}

/// Print `order` (a list of source units) in sequence.
pub fn print_units(ast: &SolAst, order: &[NodeId]) -> Result<PrintedSources> {
    let mut printed = PrintedSources::default();
    for (file_index, unit) in order.iter().enumerate() {
        let mut printer =
            Printer { ast, out: String::new(), depth: 0, file_index, ranges: &mut printed.ranges };
        printer.node(*unit)?;
        let path = ast.source_unit(*unit)?.path.clone();
        printed.units.push(PrintedUnit { unit: *unit, path, source: printer.out });
    }
    Ok(printed)
}

struct Printer<'a> {
    ast: &'a SolAst,
    out: String,
    depth: usize,
    file_index: usize,
    ranges: &'a mut FxHashMap<NodeId, SrcRange>,
}

impl Printer<'_> {
    fn newline(&mut self) {
        self.out.push('\n');
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
    }

    fn node(&mut self, id: NodeId) -> Result<()> {
        let start = self.out.len();
        self.node_inner(id)?;
        self.ranges.insert(id, SrcRange::new(start, self.out.len() - start, self.file_index));
        Ok(())
    }

    fn list(&mut self, ids: &[NodeId], sep: &str) -> Result<()> {
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                self.out.push_str(sep);
            }
            self.node(*id)?;
        }
        Ok(())
    }

    fn documentation(&mut self, id: NodeId) -> Result<()> {
        if let Some(doc) = &self.ast.node(id)?.documentation {
            for line in doc.lines() {
                self.out.push_str("/// ");
                self.out.push_str(line);
                self.newline();
            }
        }
        Ok(())
    }

    fn block_body(&mut self, statements: &[NodeId]) -> Result<()> {
        if statements.is_empty() {
            self.out.push_str("{}");
            return Ok(());
        }
        self.out.push('{');
        self.depth += 1;
        for stmt in statements {
            self.newline();
            self.node(*stmt)?;
        }
        self.depth -= 1;
        self.newline();
        self.out.push('}');
        Ok(())
    }

    /// The body of a control statement: blocks stay on the same line.
    fn nested(&mut self, body: NodeId) -> Result<()> {
        if self.ast.kind(body)?.is_block() {
            self.out.push(' ');
            self.node(body)
        } else {
            self.depth += 1;
            self.newline();
            self.node(body)?;
            self.depth -= 1;
            Ok(())
        }
    }

    fn variable(&mut self, decl: &VariableDeclaration) -> Result<()> {
        write!(self.out, "{}", decl.type_name).ok();
        if decl.indexed {
            self.out.push_str(" indexed");
        }
        if decl.state_variable {
            if decl.visibility != Visibility::Default {
                write!(self.out, " {}", decl.visibility).ok();
            }
            match decl.mutability {
                Mutability::Constant => self.out.push_str(" constant"),
                Mutability::Immutable => self.out.push_str(" immutable"),
                Mutability::Mutable => {}
            }
        } else if decl.location != DataLocation::Default {
            write!(self.out, " {}", decl.location).ok();
        }
        if !decl.name.is_empty() {
            write!(self.out, " {}", decl.name).ok();
        }
        if let Some(value) = decl.value {
            self.out.push_str(" = ");
            self.node(value)?;
        }
        Ok(())
    }

    fn function(&mut self, func: &FunctionDefinition) -> Result<()> {
        match func.kind {
            FunctionKind::Constructor => self.out.push_str("constructor("),
            FunctionKind::Fallback => self.out.push_str("fallback("),
            FunctionKind::Receive => self.out.push_str("receive("),
            FunctionKind::Function | FunctionKind::FreeFunction => {
                write!(self.out, "function {}(", func.name).ok();
            }
        }
        self.list(&func.parameters, ", ")?;
        self.out.push(')');

        if func.visibility != Visibility::Default {
            write!(self.out, " {}", func.visibility).ok();
        }
        if func.state_mutability != StateMutability::NonPayable {
            write!(self.out, " {}", func.state_mutability).ok();
        }
        if func.is_virtual {
            self.out.push_str(" virtual");
        }
        match &func.overrides {
            Some(bases) if bases.is_empty() => self.out.push_str(" override"),
            Some(bases) => {
                write!(self.out, " override({})", bases.join(", ")).ok();
            }
            None => {}
        }
        for modifier in &func.modifiers {
            self.out.push(' ');
            self.node(*modifier)?;
        }
        if !func.return_parameters.is_empty() {
            self.out.push_str(" returns (");
            self.list(&func.return_parameters, ", ")?;
            self.out.push(')');
        }

        match func.body {
            Some(body) => {
                self.out.push(' ');
                self.node(body)
            }
            None => {
                self.out.push(';');
                Ok(())
            }
        }
    }

    /// The init and loop slots of a `for` header are printed without their terminator.
    fn for_slot(&mut self, slot: NodeId) -> Result<()> {
        let start = self.out.len();
        self.node(slot)?;
        if self.out.ends_with(';') && self.out.len() > start {
            self.out.pop();
            if let Some(range) = self.ranges.get_mut(&slot) {
                range.length -= 1;
            }
        }
        Ok(())
    }

    fn node_inner(&mut self, id: NodeId) -> Result<()> {
        let ast = self.ast;
        match ast.kind(id)? {
            NodeKind::SourceUnit(unit) => {
                for (i, member) in unit.nodes.iter().enumerate() {
                    if i > 0 {
                        self.out.push('\n');
                        if !matches!(
                            ast.kind(*member)?,
                            NodeKind::PragmaDirective { .. } | NodeKind::ImportDirective { .. }
                        ) {
                            self.out.push('\n');
                        }
                    }
                    self.documentation(*member)?;
                    self.node(*member)?;
                }
                self.out.push('\n');
            }
            NodeKind::PragmaDirective { literals } => {
                write!(self.out, "pragma {literals};").ok();
            }
            NodeKind::ImportDirective { path } => {
                write!(self.out, "import {path:?};").ok();
            }
            NodeKind::ContractDefinition(contract) => {
                if contract.is_abstract {
                    self.out.push_str("abstract ");
                }
                write!(self.out, "{} {}", contract.kind, contract.name).ok();
                if !contract.base_contracts.is_empty() {
                    self.out.push_str(" is ");
                    for (i, base) in contract.base_contracts.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.out.push_str(&base.name);
                        if !base.arguments.is_empty() {
                            self.out.push('(');
                            self.list(&base.arguments, ", ")?;
                            self.out.push(')');
                        }
                    }
                }
                self.out.push_str(" {");
                self.depth += 1;
                for (i, member) in contract.nodes.iter().enumerate() {
                    if i > 0 {
                        self.out.push('\n');
                    }
                    self.newline();
                    self.documentation(*member)?;
                    self.node(*member)?;
                    if matches!(ast.kind(*member)?, NodeKind::VariableDeclaration(_)) {
                        self.out.push(';');
                    }
                }
                self.depth -= 1;
                self.newline();
                self.out.push('}');
            }
            NodeKind::StructDefinition { name, members } => {
                write!(self.out, "struct {name} {{").ok();
                self.depth += 1;
                for member in members {
                    self.newline();
                    self.node(*member)?;
                    self.out.push(';');
                }
                self.depth -= 1;
                self.newline();
                self.out.push('}');
            }
            NodeKind::EventDefinition { name, parameters, anonymous } => {
                write!(self.out, "event {name}(").ok();
                self.list(parameters, ", ")?;
                self.out.push(')');
                if *anonymous {
                    self.out.push_str(" anonymous");
                }
                self.out.push(';');
            }
            NodeKind::FunctionDefinition(func) => self.function(func)?,
            NodeKind::VariableDeclaration(decl) => self.variable(decl)?,
            NodeKind::ModifierInvocation { name, arguments } => {
                self.out.push_str(name);
                if !arguments.is_empty() {
                    self.out.push('(');
                    self.list(arguments, ", ")?;
                    self.out.push(')');
                }
            }

            NodeKind::Block { statements } => self.block_body(statements)?,
            NodeKind::UncheckedBlock { statements } => {
                self.out.push_str("unchecked ");
                self.block_body(statements)?;
            }
            NodeKind::ExpressionStatement { expression } => {
                self.node(*expression)?;
                self.out.push(';');
            }
            NodeKind::VariableDeclarationStatement { declarations, initial_value } => {
                match declarations.as_slice() {
                    [Some(decl)] => self.node(*decl)?,
                    _ => {
                        self.out.push('(');
                        for (i, decl) in declarations.iter().enumerate() {
                            if i > 0 {
                                self.out.push_str(", ");
                            }
                            if let Some(decl) = decl {
                                self.node(*decl)?;
                            }
                        }
                        self.out.push(')');
                    }
                }
                if let Some(value) = initial_value {
                    self.out.push_str(" = ");
                    self.node(*value)?;
                }
                self.out.push(';');
            }
            NodeKind::IfStatement { condition, true_body, false_body } => {
                self.out.push_str("if (");
                self.node(*condition)?;
                self.out.push(')');
                self.nested(*true_body)?;
                if let Some(false_body) = false_body {
                    if ast.kind(*true_body)?.is_block() {
                        self.out.push(' ');
                    } else {
                        self.newline();
                    }
                    self.out.push_str("else");
                    self.nested(*false_body)?;
                }
            }
            NodeKind::ForStatement { initialization, condition, loop_expression, body } => {
                self.out.push_str("for (");
                if let Some(init) = initialization {
                    self.for_slot(*init)?;
                }
                self.out.push(';');
                if let Some(condition) = condition {
                    self.out.push(' ');
                    self.node(*condition)?;
                }
                self.out.push(';');
                if let Some(step) = loop_expression {
                    self.out.push(' ');
                    self.for_slot(*step)?;
                }
                self.out.push(')');
                self.nested(*body)?;
            }
            NodeKind::WhileStatement { condition, body } => {
                self.out.push_str("while (");
                self.node(*condition)?;
                self.out.push(')');
                self.nested(*body)?;
            }
            NodeKind::DoWhileStatement { condition, body } => {
                self.out.push_str("do");
                self.nested(*body)?;
                self.out.push_str(" while (");
                self.node(*condition)?;
                self.out.push_str(");");
            }
            NodeKind::Return { expression } => {
                self.out.push_str("return");
                if let Some(expression) = expression {
                    self.out.push(' ');
                    self.node(*expression)?;
                }
                self.out.push(';');
            }
            NodeKind::EmitStatement { event_call } => {
                self.out.push_str("emit ");
                self.node(*event_call)?;
                self.out.push(';');
            }
            NodeKind::RevertStatement { error_call } => {
                self.out.push_str("revert ");
                self.node(*error_call)?;
                self.out.push(';');
            }
            NodeKind::Break => self.out.push_str("break;"),
            NodeKind::Continue => self.out.push_str("continue;"),
            NodeKind::PlaceholderStatement => self.out.push_str("_;"),
            NodeKind::InlineAssembly { source } => {
                write!(self.out, "assembly {{ {source} }}").ok();
            }

            NodeKind::Identifier { name, .. } => self.out.push_str(name),
            NodeKind::Literal { kind, value, .. } => match kind {
                LiteralKind::Number | LiteralKind::Bool => self.out.push_str(value),
                LiteralKind::String => {
                    write!(self.out, "{value:?}").ok();
                }
                LiteralKind::HexString => {
                    write!(self.out, "hex\"{value}\"").ok();
                }
            },
            NodeKind::Assignment { operator, lhs, rhs, .. } |
            NodeKind::BinaryOperation { operator, lhs, rhs, .. } => {
                self.node(*lhs)?;
                write!(self.out, " {operator} ").ok();
                self.node(*rhs)?;
            }
            NodeKind::UnaryOperation { operator, prefix, sub, .. } => {
                if *prefix {
                    self.out.push_str(operator);
                    if operator.chars().all(char::is_alphabetic) {
                        self.out.push(' ');
                    }
                    self.node(*sub)?;
                } else {
                    self.node(*sub)?;
                    self.out.push_str(operator);
                }
            }
            NodeKind::Conditional { condition, true_expression, false_expression, .. } => {
                self.node(*condition)?;
                self.out.push_str(" ? ");
                self.node(*true_expression)?;
                self.out.push_str(" : ");
                self.node(*false_expression)?;
            }
            NodeKind::FunctionCall(call) => {
                self.node(call.expression)?;
                self.out.push('(');
                self.list(&call.arguments, ", ")?;
                self.out.push(')');
            }
            NodeKind::FunctionCallOptions { expression, names, options } => {
                self.node(*expression)?;
                self.out.push('{');
                for (i, (name, value)) in names.iter().zip_eq(options.iter()).enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    write!(self.out, "{name}: ").ok();
                    self.node(*value)?;
                }
                self.out.push('}');
            }
            NodeKind::MemberAccess { expression, member_name, .. } => {
                self.node(*expression)?;
                write!(self.out, ".{member_name}").ok();
            }
            NodeKind::IndexAccess { base, index, .. } => {
                self.node(*base)?;
                self.out.push('[');
                if let Some(index) = index {
                    self.node(*index)?;
                }
                self.out.push(']');
            }
            NodeKind::TupleExpression { components, is_inline_array } => {
                let (open, close) = if *is_inline_array { ('[', ']') } else { ('(', ')') };
                self.out.push(open);
                for (i, component) in components.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    if let Some(component) = component {
                        self.node(*component)?;
                    }
                }
                self.out.push(close);
            }
            NodeKind::ElementaryTypeNameExpression { type_name } => {
                write!(self.out, "{type_name}").ok();
            }
            NodeKind::NewExpression { type_name } => {
                write!(self.out, "new {type_name}").ok();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use scribe_spec_lang::DataLocation;

    use super::*;

    #[test]
    fn test_print_contract() {
        let mut ast = SolAst::new();
        let c = ast.make_contract("C", ContractKind::Contract, &[]);
        let x = ast.make_variable(VariableDeclaration {
            state_variable: true,
            ..VariableDeclaration::new("x", TypeName::elementary("uint256"), DataLocation::Default)
        });
        ast.append_child(c, x).unwrap();

        let f = ast
            .add_empty_function(c, "inc", Visibility::Public, StateMutability::NonPayable)
            .unwrap();
        ast.add_fun_param(f, "a", TypeName::elementary("uint256"), DataLocation::Default, false)
            .unwrap();
        let lhs = ast.make_identifier("x", "uint256");
        let rhs = ast.make_identifier("a", "uint256");
        let assign = ast.make_assignment(lhs, rhs);
        let stmt = ast.make_expression_statement(assign);
        let body = ast.function_definition(f).unwrap().body.unwrap();
        ast.append_child(body, stmt).unwrap();

        let pragma = ast.make_pragma("solidity ^0.8.0");
        let unit = ast.add_unit("c.sol", 0, vec![pragma, c]);
        let printed = print_units(&ast, &[unit]).unwrap();

        let expected = "pragma solidity ^0.8.0;\n\ncontract C {\n    uint256 x;\n\n    function \
                        inc(uint256 a) public {\n        x = a;\n    }\n}\n";
        assert_eq!(printed.units[0].source, expected);

        let range = printed.range_of(stmt).unwrap();
        assert_eq!(range.fragment(&printed.units[0].source), Some("x = a;"));
        let range = printed.range_of(rhs).unwrap();
        assert_eq!(range.fragment(&printed.units[0].source), Some("a"));
        assert_eq!(range.file_index, 0);
    }

    #[test]
    fn test_print_override_and_docs() {
        let mut ast = SolAst::new();
        let c = ast.make_contract("D", ContractKind::Contract, &["B1", "B2"]);
        let f = ast
            .add_empty_function(c, "check", Visibility::Internal, StateMutability::View)
            .unwrap();
        {
            let def = ast.function_definition_mut(f).unwrap();
            def.is_virtual = true;
            def.overrides = Some(vec!["B1".into(), "B2".into()]);
        }
        ast.set_documentation(f, "Check things").unwrap();
        let unit = ast.add_unit("d.sol", 0, vec![c]);
        let printed = print_units(&ast, &[unit]).unwrap();

        assert!(printed.units[0].source.contains(
            "/// Check things\n    function check() internal view virtual override(B1, B2) {}"
        ));
        assert!(printed.units[0].source.starts_with("contract D is B1, B2 {"));
    }
}
