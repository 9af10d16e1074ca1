//! Loading of compiled units into the arena.
//!
//! The input is solc's JSON AST as modelled by `foundry_compilers::artifacts`. Every node keeps
//! its compiler source location. Cross references (referenced declarations, linearizations) are
//! solc ids and are resolved once all units are loaded, after which the AST is linked.

use foundry_compilers::artifacts::{self as solc, ast::SourceLocation};
use rustc_hash::FxHashMap;
use scribe_spec_lang::{DataLocation, SrcRange};
use serde::Serialize;
use serde_json::Value;

use super::*;

/// The arena range of a compiler location. Locations solc reports as `-1` have none.
pub fn src_range(src: &SourceLocation) -> Option<SrcRange> {
    SrcRange::try_from(src).ok()
}

/// Load `units` together with their source text. Units without a file index in their location
/// are numbered in iteration order.
pub fn load_source_units<'a>(
    units: impl IntoIterator<Item = (&'a solc::SourceUnit, &'a str)>,
) -> Result<SolAst> {
    let mut loader = Loader::default();
    for (position, (unit, source)) in units.into_iter().enumerate() {
        loader.source = source;
        let file_index = unit.src.index.unwrap_or(position);
        loader.unit(unit, file_index)?;
    }
    loader.finish()
}

#[derive(Default)]
struct Loader<'a> {
    ast: SolAst,
    /// Source text of the unit being loaded.
    source: &'a str,
    /// Solc id to arena id, for every loaded declaration.
    declarations: FxHashMap<usize, NodeId>,
    /// Identifiers and member accesses with the solc id they refer to.
    references: Vec<(NodeId, usize)>,
    linearizations: Vec<(NodeId, Vec<usize>)>,
}

/// Conversion of one compiler node into the arena.
trait Load {
    fn load(&self, loader: &mut Loader<'_>) -> Result<NodeId>;
}

impl<T: Load> Load for Box<T> {
    fn load(&self, loader: &mut Loader<'_>) -> Result<NodeId> {
        (**self).load(loader)
    }
}

macro_rules! impl_load {
    ($ty:ty, | $val:ident, $loader:ident | $e:expr) => {
        impl Load for $ty {
            fn load(&self, loader: &mut Loader<'_>) -> Result<NodeId> {
                let $val = self;
                let $loader = loader;
                $e
            }
        }
    };
}

/// The solc spelling of a keyword-like value (`"nonpayable"`, `"+="`, `"constructor"`).
fn keyword<T: Serialize>(value: &T) -> Result<Option<String>> {
    Ok(serde_json::to_value(value)?.as_str().map(str::to_string))
}

/// Natspec text, reported by solc either as a plain string or as a documentation node.
fn documentation<T: Serialize>(doc: &Option<T>) -> Result<Option<String>> {
    Ok(match serde_json::to_value(doc)? {
        Value::String(text) => Some(text),
        Value::Object(node) => node.get("text").and_then(Value::as_str).map(str::to_string),
        _ => None,
    })
}

/// A node outside of what the arena models.
fn unloadable<T: Serialize>(node: &T) -> InstrumentationError {
    let value = serde_json::to_value(node).unwrap_or_default();
    let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
    InstrumentationError::Unloadable {
        what: field("nodeType").unwrap_or_else(|| "node".to_string()),
        location: field("src").unwrap_or_else(|| "<unknown>".to_string()),
    }
}

fn type_string(desc: &solc::TypeDescriptions) -> String {
    desc.type_string.clone().unwrap_or_else(|| MISSING_TYPE.to_string())
}

fn visibility(value: &impl Serialize) -> Result<Visibility> {
    Ok(match keyword(value)?.as_deref() {
        Some("external") => Visibility::External,
        Some("public") => Visibility::Public,
        Some("internal") => Visibility::Internal,
        Some("private") => Visibility::Private,
        _ => Visibility::Default,
    })
}

fn state_mutability(value: &impl Serialize) -> Result<StateMutability> {
    Ok(match keyword(value)?.as_deref() {
        Some("pure") => StateMutability::Pure,
        Some("view") | Some("constant") => StateMutability::View,
        Some("payable") => StateMutability::Payable,
        _ => StateMutability::NonPayable,
    })
}

fn elementary_name(ty: &solc::ElementaryTypeName) -> Result<String> {
    Ok(match keyword(&ty.state_mutability)?.as_deref() {
        Some("payable") if ty.name == "address" => "address payable".to_string(),
        _ => ty.name.clone(),
    })
}

fn user_type_name(ty: &solc::UserDefinedTypeName) -> String {
    ty.path_node.as_ref().map(|path| path.name.clone()).or_else(|| ty.name.clone()).unwrap_or_default()
}

fn base_name(base: &solc::UserDefinedTypeNameOrIdentifierPath) -> String {
    match base {
        solc::UserDefinedTypeNameOrIdentifierPath::UserDefinedTypeName(ty) => user_type_name(ty),
        solc::UserDefinedTypeNameOrIdentifierPath::IdentifierPath(path) => path.name.clone(),
    }
}

fn type_name(ty: &solc::TypeName) -> Result<TypeName> {
    Ok(match ty {
        solc::TypeName::ElementaryTypeName(ty) => TypeName::Elementary(elementary_name(ty)?),
        solc::TypeName::UserDefinedTypeName(ty) => TypeName::UserDefined(user_type_name(ty)),
        solc::TypeName::Mapping(mapping) => TypeName::Mapping(
            Box::new(type_name(&mapping.key_type)?),
            Box::new(type_name(&mapping.value_type)?),
        ),
        solc::TypeName::ArrayTypeName(array) => {
            let length = match &array.length {
                Some(solc::Expression::Literal(literal)) => literal.value.clone(),
                Some(other) => return Err(unloadable(other)),
                None => None,
            };
            TypeName::Array(Box::new(type_name(&array.base_type)?), length)
        }
        other => return Err(unloadable(other)),
    })
}

impl Loader<'_> {
    fn add(&mut self, kind: NodeKind, src: &SourceLocation) -> NodeId {
        self.ast.add(kind, src_range(src))
    }

    fn declare(&mut self, solc_id: usize, node: NodeId) {
        self.declarations.insert(solc_id, node);
    }

    fn refer(&mut self, node: NodeId, declaration: impl Into<Option<isize>>) {
        if let Some(declaration) = declaration.into().and_then(|id| usize::try_from(id).ok()) {
            self.references.push((node, declaration));
        }
    }

    fn all<T: Load>(&mut self, nodes: &[T]) -> Result<Vec<NodeId>> {
        nodes.iter().map(|node| node.load(self)).collect()
    }

    fn opt<T: Load>(&mut self, node: &Option<T>) -> Result<Option<NodeId>> {
        node.as_ref().map(|node| node.load(self)).transpose()
    }

    fn unit(&mut self, unit: &solc::SourceUnit, file_index: usize) -> Result<NodeId> {
        let nodes = self.all(&unit.nodes)?;
        let id = self.ast.add_unit(&unit.absolute_path, file_index, nodes);
        self.ast.node_mut(id)?.src = src_range(&unit.src);
        debug!(path = %unit.absolute_path, file_index, "loaded source unit");
        Ok(id)
    }

    fn parameters(&mut self, list: &solc::ParameterList) -> Result<Vec<NodeId>> {
        self.all(&list.parameters)
    }

    fn variable_declaration_statement(
        &mut self,
        stmt: &solc::VariableDeclarationStatement,
    ) -> Result<NodeId> {
        let declarations = stmt
            .declarations
            .iter()
            .map(|decl| self.opt(decl))
            .collect::<Result<Vec<_>>>()?;
        let initial_value = self.opt(&stmt.initial_value)?;
        Ok(self.add(NodeKind::VariableDeclarationStatement { declarations, initial_value }, &stmt.src))
    }

    fn function_call(&mut self, call: &solc::FunctionCall) -> Result<NodeId> {
        if !call.names.is_empty() {
            return Err(InstrumentationError::Unloadable {
                what: "call with named arguments".to_string(),
                location: call.src.to_string(),
            });
        }
        let kind = match keyword(&call.kind)?.as_deref() {
            Some("typeConversion") => FunctionCallKind::TypeConversion,
            Some("structConstructorCall") => FunctionCallKind::StructConstructorCall,
            _ => FunctionCallKind::FunctionCall,
        };
        let expression = call.expression.load(self)?;
        let arguments = self.all(&call.arguments)?;
        let type_string = type_string(&call.type_descriptions);
        Ok(self.add(
            NodeKind::FunctionCall(FunctionCall { kind, expression, arguments, type_string }),
            &call.src,
        ))
    }

    fn literal(&mut self, literal: &solc::Literal) -> Result<NodeId> {
        let kind = match keyword(&literal.kind)?.as_deref() {
            Some("bool") => LiteralKind::Bool,
            Some("string") | Some("unicodeString") => LiteralKind::String,
            Some("hexString") => LiteralKind::HexString,
            _ => LiteralKind::Number,
        };
        let mut value = match kind {
            LiteralKind::HexString => literal.hex_value.clone(),
            _ => literal.value.clone().unwrap_or_default(),
        };
        if let Some(unit) = keyword(&literal.subdenomination)? {
            value = format!("{value} {unit}");
        }
        let type_string = type_string(&literal.type_descriptions);
        Ok(self.add(NodeKind::Literal { kind, value, type_string }, &literal.src))
    }

    /// Resolve solc ids, then compute whatever linearization solc did not report.
    fn finish(mut self) -> Result<SolAst> {
        for (node, declaration) in std::mem::take(&mut self.references) {
            let Some(target) = self.declarations.get(&declaration).copied() else {
                continue;
            };
            match &mut self.ast.node_mut(node)?.kind {
                NodeKind::Identifier { referenced_declaration, .. } |
                NodeKind::MemberAccess { referenced_declaration, .. } => {
                    *referenced_declaration = Some(target)
                }
                _ => {}
            }
        }

        for (contract, solc_ids) in std::mem::take(&mut self.linearizations) {
            let resolved: Option<Vec<NodeId>> =
                solc_ids.iter().map(|id| self.declarations.get(id).copied()).collect();
            if let Some(lin) = resolved.filter(|lin| !lin.is_empty()) {
                self.ast.contract_definition_mut(contract)?.linearized_base_contracts = lin;
            }
        }

        self.ast.link()?;
        Ok(self.ast)
    }
}

impl_load!(solc::SourceUnitPart, |part, l| match part {
    solc::SourceUnitPart::PragmaDirective(pragma) => {
        // `["solidity", "^", "0.8", ".0"]` reads `solidity ^0.8.0`.
        let literals = match pragma.literals.split_first() {
            Some((name, rest)) => format!("{name} {}", rest.concat()),
            None => String::new(),
        };
        Ok(l.add(NodeKind::PragmaDirective { literals }, &pragma.src))
    }
    solc::SourceUnitPart::ImportDirective(import) => {
        Ok(l.add(NodeKind::ImportDirective { path: import.file.clone() }, &import.src))
    }
    solc::SourceUnitPart::ContractDefinition(contract) => contract.load(l),
    solc::SourceUnitPart::FunctionDefinition(function) => function.load(l),
    solc::SourceUnitPart::StructDefinition(definition) => definition.load(l),
    solc::SourceUnitPart::VariableDeclaration(declaration) => declaration.load(l),
    other => Err(unloadable(other)),
});

impl_load!(solc::ContractDefinition, |contract, l| {
    let kind = match keyword(&contract.kind)?.as_deref() {
        Some("interface") => ContractKind::Interface,
        Some("library") => ContractKind::Library,
        _ => ContractKind::Contract,
    };
    let mut base_contracts = vec![];
    for base in &contract.base_contracts {
        let arguments = l.all(&base.arguments)?;
        base_contracts.push(InheritanceSpecifier {
            name: base_name(&base.base_name),
            contract: None,
            arguments,
        });
    }

    let mut nodes = vec![];
    for part in &contract.nodes {
        nodes.push(match part {
            solc::ContractDefinitionPart::FunctionDefinition(function) => function.load(l)?,
            solc::ContractDefinitionPart::VariableDeclaration(declaration) => declaration.load(l)?,
            solc::ContractDefinitionPart::StructDefinition(definition) => definition.load(l)?,
            solc::ContractDefinitionPart::EventDefinition(definition) => definition.load(l)?,
            other => return Err(unloadable(other)),
        });
    }

    let id = l.add(
        NodeKind::ContractDefinition(ContractDefinition {
            name: contract.name.clone(),
            kind,
            is_abstract: contract.is_abstract,
            base_contracts,
            linearized_base_contracts: vec![],
            nodes,
        }),
        &contract.src,
    );
    l.ast.node_mut(id)?.documentation = documentation(&contract.documentation)?;
    l.declare(contract.id, id);
    l.linearizations.push((id, contract.linearized_base_contracts.clone()));
    Ok(id)
});

impl_load!(solc::FunctionDefinition, |function, l| {
    let kind = match keyword(&function.kind)?.as_deref() {
        Some("constructor") => FunctionKind::Constructor,
        Some("fallback") => FunctionKind::Fallback,
        Some("receive") => FunctionKind::Receive,
        Some("freeFunction") => FunctionKind::FreeFunction,
        _ => FunctionKind::Function,
    };
    // Free functions cannot spell out a visibility.
    let visibility = match kind {
        FunctionKind::FreeFunction => Visibility::Default,
        _ => visibility(&function.visibility)?,
    };
    let overrides = function.overrides.as_ref().map(|spec| spec.overrides.iter().map(base_name).collect());

    let parameters = l.parameters(&function.parameters)?;
    let return_parameters = l.parameters(&function.return_parameters)?;
    let mut modifiers = vec![];
    for invocation in &function.modifiers {
        let name = match &invocation.modifier_name {
            solc::IdentifierOrIdentifierPath::Identifier(ident) => ident.name.clone(),
            solc::IdentifierOrIdentifierPath::IdentifierPath(path) => path.name.clone(),
        };
        let arguments = l.all(&invocation.arguments)?;
        modifiers.push(l.add(NodeKind::ModifierInvocation { name, arguments }, &invocation.src));
    }
    let body = l.opt(&function.body)?;

    let id = l.add(
        NodeKind::FunctionDefinition(FunctionDefinition {
            name: function.name.clone(),
            kind,
            visibility,
            state_mutability: state_mutability(&function.state_mutability)?,
            is_virtual: function.is_virtual,
            overrides,
            parameters,
            return_parameters,
            modifiers,
            body,
        }),
        &function.src,
    );
    l.ast.node_mut(id)?.documentation = documentation(&function.documentation)?;
    l.declare(function.id, id);
    Ok(id)
});

impl_load!(solc::VariableDeclaration, |declaration, l| {
    let type_name = match &declaration.type_name {
        Some(ty) => type_name(ty)?,
        // `var` declarations of old compilers.
        None => TypeName::Elementary(type_string(&declaration.type_descriptions)),
    };
    let location = match keyword(&declaration.storage_location)?.as_deref() {
        Some("memory") => DataLocation::Memory,
        Some("storage") => DataLocation::Storage,
        Some("calldata") => DataLocation::Calldata,
        _ => DataLocation::Default,
    };
    let mutability = match keyword(&declaration.mutability)?.as_deref() {
        Some("constant") => Mutability::Constant,
        Some("immutable") => Mutability::Immutable,
        _ if declaration.constant => Mutability::Constant,
        _ => Mutability::Mutable,
    };
    // solc reports `internal` for locals and parameters too.
    let visibility = if declaration.state_variable {
        visibility(&declaration.visibility)?
    } else {
        Visibility::Default
    };
    let value = l.opt(&declaration.value)?;

    let id = l.add(
        NodeKind::VariableDeclaration(VariableDeclaration {
            name: declaration.name.clone(),
            type_name,
            location,
            visibility,
            mutability,
            state_variable: declaration.state_variable,
            indexed: declaration.indexed,
            value,
        }),
        &declaration.src,
    );
    l.declare(declaration.id, id);
    Ok(id)
});

impl_load!(solc::StructDefinition, |definition, l| {
    let members = l.all(&definition.members)?;
    let id = l.add(NodeKind::StructDefinition { name: definition.name.clone(), members }, &definition.src);
    l.declare(definition.id, id);
    Ok(id)
});

impl_load!(solc::EventDefinition, |definition, l| {
    let parameters = l.parameters(&definition.parameters)?;
    let id = l.add(
        NodeKind::EventDefinition {
            name: definition.name.clone(),
            parameters,
            anonymous: definition.anonymous,
        },
        &definition.src,
    );
    l.declare(definition.id, id);
    Ok(id)
});

impl_load!(solc::Block, |block, l| {
    let statements = l.all(&block.statements)?;
    Ok(l.add(NodeKind::Block { statements }, &block.src))
});

impl_load!(solc::BlockOrStatement, |body, l| match body {
    solc::BlockOrStatement::Block(block) => block.load(l),
    solc::BlockOrStatement::Statement(statement) => statement.load(l),
});

impl_load!(solc::ExpressionStatement, |stmt, l| {
    let expression = stmt.expression.load(l)?;
    Ok(l.add(NodeKind::ExpressionStatement { expression }, &stmt.src))
});

impl_load!(solc::ExpressionOrVariableDeclarationStatement, |init, l| match init {
    solc::ExpressionOrVariableDeclarationStatement::ExpressionStatement(stmt) => stmt.load(l),
    solc::ExpressionOrVariableDeclarationStatement::VariableDeclarationStatement(stmt) => {
        l.variable_declaration_statement(stmt)
    }
});

impl_load!(solc::Statement, |statement, l| match statement {
    solc::Statement::Block(block) => block.load(l),
    solc::Statement::UncheckedBlock(block) => {
        let statements = l.all(&block.statements)?;
        Ok(l.add(NodeKind::UncheckedBlock { statements }, &block.src))
    }
    solc::Statement::ExpressionStatement(stmt) => stmt.load(l),
    solc::Statement::VariableDeclarationStatement(stmt) => l.variable_declaration_statement(stmt),
    solc::Statement::IfStatement(stmt) => {
        let condition = stmt.condition.load(l)?;
        let true_body = stmt.true_body.load(l)?;
        let false_body = l.opt(&stmt.false_body)?;
        Ok(l.add(NodeKind::IfStatement { condition, true_body, false_body }, &stmt.src))
    }
    solc::Statement::ForStatement(stmt) => {
        let initialization = l.opt(&stmt.initialization_expression)?;
        let condition = l.opt(&stmt.condition)?;
        let loop_expression = l.opt(&stmt.loop_expression)?;
        let body = stmt.body.load(l)?;
        Ok(l.add(
            NodeKind::ForStatement { initialization, condition, loop_expression, body },
            &stmt.src,
        ))
    }
    solc::Statement::WhileStatement(stmt) => {
        let condition = stmt.condition.load(l)?;
        let body = stmt.body.load(l)?;
        Ok(l.add(NodeKind::WhileStatement { condition, body }, &stmt.src))
    }
    solc::Statement::DoWhileStatement(stmt) => {
        let condition = stmt.condition.load(l)?;
        let body = stmt.body.load(l)?;
        Ok(l.add(NodeKind::DoWhileStatement { condition, body }, &stmt.src))
    }
    solc::Statement::Return(stmt) => {
        let expression = l.opt(&stmt.expression)?;
        Ok(l.add(NodeKind::Return { expression }, &stmt.src))
    }
    solc::Statement::EmitStatement(stmt) => {
        let event_call = l.function_call(&stmt.event_call)?;
        Ok(l.add(NodeKind::EmitStatement { event_call }, &stmt.src))
    }
    solc::Statement::RevertStatement(stmt) => {
        let error_call = l.function_call(&stmt.error_call)?;
        Ok(l.add(NodeKind::RevertStatement { error_call }, &stmt.src))
    }
    solc::Statement::Break(stmt) => Ok(l.add(NodeKind::Break, &stmt.src)),
    solc::Statement::Continue(stmt) => Ok(l.add(NodeKind::Continue, &stmt.src)),
    solc::Statement::PlaceholderStatement(stmt) => Ok(l.add(NodeKind::PlaceholderStatement, &stmt.src)),
    solc::Statement::InlineAssembly(stmt) => {
        let source = src_range(&stmt.src)
            .and_then(|range| range.fragment(l.source))
            .ok_or_else(|| unloadable(statement))?
            .to_string();
        Ok(l.add(NodeKind::InlineAssembly { source }, &stmt.src))
    }
    other => Err(unloadable(other)),
});

impl_load!(solc::Expression, |expression, l| match expression {
    solc::Expression::Assignment(expr) => {
        let operator = keyword(&expr.operator)?.unwrap_or_default();
        let lhs = expr.lhs.load(l)?;
        let rhs = expr.rhs.load(l)?;
        let type_string = type_string(&expr.type_descriptions);
        Ok(l.add(NodeKind::Assignment { operator, lhs, rhs, type_string }, &expr.src))
    }
    solc::Expression::BinaryOperation(expr) => {
        let operator = keyword(&expr.operator)?.unwrap_or_default();
        let lhs = expr.lhs.load(l)?;
        let rhs = expr.rhs.load(l)?;
        let type_string = type_string(&expr.type_descriptions);
        Ok(l.add(NodeKind::BinaryOperation { operator, lhs, rhs, type_string }, &expr.src))
    }
    solc::Expression::UnaryOperation(expr) => {
        let operator = keyword(&expr.operator)?.unwrap_or_default();
        let sub = expr.sub_expression.load(l)?;
        let type_string = type_string(&expr.type_descriptions);
        Ok(l.add(NodeKind::UnaryOperation { operator, prefix: expr.prefix, sub, type_string }, &expr.src))
    }
    solc::Expression::Conditional(expr) => {
        let condition = expr.condition.load(l)?;
        let true_expression = expr.true_expression.load(l)?;
        let false_expression = expr.false_expression.load(l)?;
        let type_string = type_string(&expr.type_descriptions);
        Ok(l.add(
            NodeKind::Conditional { condition, true_expression, false_expression, type_string },
            &expr.src,
        ))
    }
    solc::Expression::FunctionCall(call) => l.function_call(call),
    solc::Expression::FunctionCallOptions(expr) => {
        let inner = expr.expression.load(l)?;
        let options = l.all(&expr.options)?;
        Ok(l.add(
            NodeKind::FunctionCallOptions { expression: inner, names: expr.names.clone(), options },
            &expr.src,
        ))
    }
    solc::Expression::Identifier(ident) => {
        let id = l.add(
            NodeKind::Identifier {
                name: ident.name.clone(),
                type_string: type_string(&ident.type_descriptions),
                referenced_declaration: None,
            },
            &ident.src,
        );
        l.refer(id, ident.referenced_declaration);
        Ok(id)
    }
    solc::Expression::MemberAccess(expr) => {
        let inner = expr.expression.load(l)?;
        let id = l.add(
            NodeKind::MemberAccess {
                expression: inner,
                member_name: expr.member_name.clone(),
                type_string: type_string(&expr.type_descriptions),
                referenced_declaration: None,
            },
            &expr.src,
        );
        l.refer(id, expr.referenced_declaration);
        Ok(id)
    }
    solc::Expression::IndexAccess(expr) => {
        let base = expr.base_expression.load(l)?;
        let index = l.opt(&expr.index_expression)?;
        let type_string = type_string(&expr.type_descriptions);
        Ok(l.add(NodeKind::IndexAccess { base, index, type_string }, &expr.src))
    }
    solc::Expression::Literal(literal) => l.literal(literal),
    solc::Expression::TupleExpression(expr) => {
        let components =
            expr.components.iter().map(|component| l.opt(component)).collect::<Result<Vec<_>>>()?;
        Ok(l.add(
            NodeKind::TupleExpression { components, is_inline_array: expr.is_inline_array },
            &expr.src,
        ))
    }
    solc::Expression::ElementaryTypeNameExpression(expr) => {
        let type_name = match &expr.type_name {
            solc::ElementaryOrRawTypeName::ElementaryTypeName(ty) => {
                TypeName::Elementary(elementary_name(ty)?)
            }
            solc::ElementaryOrRawTypeName::Raw(name) => TypeName::Elementary(name.clone()),
        };
        Ok(l.add(NodeKind::ElementaryTypeNameExpression { type_name }, &expr.src))
    }
    solc::Expression::NewExpression(expr) => {
        let type_name = type_name(&expr.type_name)?;
        Ok(l.add(NodeKind::NewExpression { type_name }, &expr.src))
    }
    other => Err(unloadable(other)),
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_src_range() {
        let loc: SourceLocation = "87:6:0".parse().unwrap();
        assert_eq!(src_range(&loc), Some(SrcRange::new(87, 6, 0)));
        let unknown: SourceLocation = "-1:-1:-1".parse().unwrap();
        assert_eq!(src_range(&unknown), None);
    }

    #[test]
    fn test_keywords() {
        assert_eq!(keyword(&"+=").unwrap().as_deref(), Some("+="));
        assert_eq!(keyword(&Option::<String>::None).unwrap(), None);
        assert_eq!(documentation(&Some("@notice hi")).unwrap().as_deref(), Some("@notice hi"));
        assert_eq!(
            documentation(&Some(serde_json::json!({"id": 1, "src": "0:0:0", "text": "#assert x > 0;"})))
                .unwrap()
                .as_deref(),
            Some("#assert x > 0;")
        );
    }
}
