//! Node construction helpers.
//!
//! Every helper allocates a detached node (its children are adopted). Generated expressions take
//! an explicit type string; callers pass [`MISSING_TYPE`] when the type is not known.

use scribe_spec_lang::DataLocation;

use super::*;

impl FunctionDefinition {
    /// An internal, non-virtual function with an empty parameter list and no body.
    pub fn new(name: impl Into<String>, kind: FunctionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            visibility: Visibility::Internal,
            state_mutability: StateMutability::NonPayable,
            is_virtual: false,
            overrides: None,
            parameters: vec![],
            return_parameters: vec![],
            modifiers: vec![],
            body: None,
        }
    }
}

impl VariableDeclaration {
    pub fn new(name: impl Into<String>, type_name: TypeName, location: DataLocation) -> Self {
        Self {
            name: name.into(),
            type_name,
            location,
            visibility: Visibility::Default,
            mutability: Mutability::Mutable,
            state_variable: false,
            indexed: false,
            value: None,
        }
    }
}

impl SolAst {
    pub fn make_pragma(&mut self, literals: &str) -> NodeId {
        self.add(NodeKind::PragmaDirective { literals: literals.to_string() }, None)
    }

    pub fn make_import(&mut self, path: &str) -> NodeId {
        self.add(NodeKind::ImportDirective { path: path.to_string() }, None)
    }

    /// A contract with unresolved bases; see [`SolAst::link`].
    pub fn make_contract(&mut self, name: &str, kind: ContractKind, bases: &[&str]) -> NodeId {
        let base_contracts = bases
            .iter()
            .map(|base| InheritanceSpecifier {
                name: base.to_string(),
                contract: None,
                arguments: vec![],
            })
            .collect();
        self.add(
            NodeKind::ContractDefinition(ContractDefinition {
                name: name.to_string(),
                kind,
                is_abstract: false,
                base_contracts,
                linearized_base_contracts: vec![],
                nodes: vec![],
            }),
            None,
        )
    }

    pub fn add_function(&mut self, def: FunctionDefinition) -> NodeId {
        self.add(NodeKind::FunctionDefinition(def), None)
    }

    /// A function with an empty body, appended to `contract` (or to a unit, for free functions).
    pub fn add_empty_function(
        &mut self,
        container: NodeId,
        name: &str,
        visibility: Visibility,
        mutability: StateMutability,
    ) -> Result<NodeId> {
        let body = self.make_block(vec![]);
        let kind = match self.kind(container)? {
            NodeKind::SourceUnit(_) => FunctionKind::FreeFunction,
            _ => FunctionKind::Function,
        };
        let func = self.add_function(FunctionDefinition {
            visibility,
            state_mutability: mutability,
            body: Some(body),
            ..FunctionDefinition::new(name, kind)
        });
        self.append_child(container, func)?;
        Ok(func)
    }

    pub fn make_variable(&mut self, decl: VariableDeclaration) -> NodeId {
        self.add(NodeKind::VariableDeclaration(decl), None)
    }

    pub fn make_param(&mut self, name: &str, type_name: TypeName, location: DataLocation) -> NodeId {
        self.make_variable(VariableDeclaration::new(name, type_name, location))
    }

    /// Append a parameter (or, with `is_return`, a named return) to `func`.
    pub fn add_fun_param(
        &mut self,
        func: NodeId,
        name: &str,
        type_name: TypeName,
        location: DataLocation,
        is_return: bool,
    ) -> Result<NodeId> {
        let param = self.make_param(name, type_name, location);
        let def = self.function_definition_mut(func)?;
        if is_return {
            def.return_parameters.push(param);
        } else {
            def.parameters.push(param);
        }
        self.node_mut(param)?.parent = Some(func);
        Ok(param)
    }

    pub fn make_struct(&mut self, name: &str, members: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::StructDefinition { name: name.to_string(), members }, None)
    }

    pub fn make_event(&mut self, name: &str, parameters: Vec<NodeId>) -> NodeId {
        self.add(
            NodeKind::EventDefinition { name: name.to_string(), parameters, anonymous: false },
            None,
        )
    }

    pub fn make_modifier_invocation(&mut self, name: &str, arguments: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::ModifierInvocation { name: name.to_string(), arguments }, None)
    }

    pub fn make_block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Block { statements }, None)
    }

    pub fn make_unchecked_block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::UncheckedBlock { statements }, None)
    }

    pub fn make_expression_statement(&mut self, expression: NodeId) -> NodeId {
        self.add(NodeKind::ExpressionStatement { expression }, None)
    }

    pub fn make_variable_declaration_statement(
        &mut self,
        declarations: Vec<Option<NodeId>>,
        initial_value: Option<NodeId>,
    ) -> NodeId {
        self.add(NodeKind::VariableDeclarationStatement { declarations, initial_value }, None)
    }

    pub fn make_if(
        &mut self,
        condition: NodeId,
        true_body: NodeId,
        false_body: Option<NodeId>,
    ) -> NodeId {
        self.add(NodeKind::IfStatement { condition, true_body, false_body }, None)
    }

    pub fn make_return(&mut self, expression: Option<NodeId>) -> NodeId {
        self.add(NodeKind::Return { expression }, None)
    }

    pub fn make_emit(&mut self, event_call: NodeId) -> NodeId {
        self.add(NodeKind::EmitStatement { event_call }, None)
    }

    pub fn make_break(&mut self) -> NodeId {
        self.add(NodeKind::Break, None)
    }

    pub fn make_continue(&mut self) -> NodeId {
        self.add(NodeKind::Continue, None)
    }

    pub fn make_placeholder(&mut self) -> NodeId {
        self.add(NodeKind::PlaceholderStatement, None)
    }

    pub fn make_identifier(&mut self, name: &str, type_string: &str) -> NodeId {
        self.add(
            NodeKind::Identifier {
                name: name.to_string(),
                type_string: type_string.to_string(),
                referenced_declaration: None,
            },
            None,
        )
    }

    /// An identifier naming a declaration (function, variable, contract).
    pub fn make_identifier_for(&mut self, decl: NodeId) -> Result<NodeId> {
        let name = match self.kind(decl)? {
            NodeKind::FunctionDefinition(func) => func.name.clone(),
            NodeKind::VariableDeclaration(var) => var.name.clone(),
            NodeKind::ContractDefinition(contract) => contract.name.clone(),
            NodeKind::StructDefinition { name, .. } | NodeKind::EventDefinition { name, .. } => {
                name.clone()
            }
            other => {
                return Err(InstrumentationError::Internal(format!(
                    "cannot reference a {}",
                    other.name()
                )))
            }
        };
        Ok(self.add(
            NodeKind::Identifier {
                name,
                type_string: MISSING_TYPE.to_string(),
                referenced_declaration: Some(decl),
            },
            None,
        ))
    }

    /// Like [`Self::make_identifier_for`], with the referenced declaration id shifted by
    /// `offset`. Tells apart references that must not resolve to `decl` itself.
    pub fn make_offset_identifier_for(&mut self, decl: NodeId, offset: usize) -> Result<NodeId> {
        let ident = self.make_identifier_for(decl)?;
        if let NodeKind::Identifier { referenced_declaration, .. } = &mut self.node_mut(ident)?.kind {
            *referenced_declaration = Some(NodeId(decl.0 + offset));
        }
        Ok(ident)
    }

    pub fn make_number(&mut self, value: impl ToString) -> NodeId {
        let value = value.to_string();
        let type_string = format!("int_const {value}");
        self.add(NodeKind::Literal { kind: LiteralKind::Number, value, type_string }, None)
    }

    pub fn make_bool(&mut self, value: bool) -> NodeId {
        self.add(
            NodeKind::Literal {
                kind: LiteralKind::Bool,
                value: value.to_string(),
                type_string: "bool".to_string(),
            },
            None,
        )
    }

    pub fn make_string_literal(&mut self, value: &str) -> NodeId {
        self.add(
            NodeKind::Literal {
                kind: LiteralKind::String,
                value: value.to_string(),
                type_string: format!("literal_string {value:?}"),
            },
            None,
        )
    }

    /// `hex"<digits>"`.
    pub fn make_hex_literal(&mut self, digits: &str) -> NodeId {
        self.add(
            NodeKind::Literal {
                kind: LiteralKind::HexString,
                value: digits.to_string(),
                type_string: MISSING_TYPE.to_string(),
            },
            None,
        )
    }

    pub fn make_assignment(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add(
            NodeKind::Assignment {
                operator: "=".to_string(),
                lhs,
                rhs,
                type_string: MISSING_TYPE.to_string(),
            },
            None,
        )
    }

    /// `<name> = <value>;` for a plain boolean variable.
    pub fn make_bool_assignment_stmt(&mut self, name: &str, value: bool) -> NodeId {
        let lhs = self.make_identifier(name, "bool");
        let rhs = self.make_bool(value);
        let assign = self.make_assignment(lhs, rhs);
        self.make_expression_statement(assign)
    }

    pub fn make_binary(&mut self, operator: &str, lhs: NodeId, rhs: NodeId, ty: &str) -> NodeId {
        self.add(
            NodeKind::BinaryOperation {
                operator: operator.to_string(),
                lhs,
                rhs,
                type_string: ty.to_string(),
            },
            None,
        )
    }

    pub fn make_unary(&mut self, operator: &str, sub: NodeId, ty: &str) -> NodeId {
        self.add(
            NodeKind::UnaryOperation {
                operator: operator.to_string(),
                prefix: true,
                sub,
                type_string: ty.to_string(),
            },
            None,
        )
    }

    pub fn make_conditional(
        &mut self,
        condition: NodeId,
        true_expression: NodeId,
        false_expression: NodeId,
        ty: &str,
    ) -> NodeId {
        self.add(
            NodeKind::Conditional {
                condition,
                true_expression,
                false_expression,
                type_string: ty.to_string(),
            },
            None,
        )
    }

    pub fn make_call(&mut self, expression: NodeId, arguments: Vec<NodeId>, ty: &str) -> NodeId {
        self.add(
            NodeKind::FunctionCall(FunctionCall {
                kind: FunctionCallKind::FunctionCall,
                expression,
                arguments,
                type_string: ty.to_string(),
            }),
            None,
        )
    }

    /// `<name>(<args>)` with an unresolved callee.
    pub fn make_call_to(&mut self, name: &str, arguments: Vec<NodeId>) -> NodeId {
        let callee = self.make_identifier(name, MISSING_TYPE);
        self.make_call(callee, arguments, MISSING_TYPE)
    }

    pub fn make_call_options(
        &mut self,
        expression: NodeId,
        names: Vec<String>,
        options: Vec<NodeId>,
    ) -> NodeId {
        self.add(NodeKind::FunctionCallOptions { expression, names, options }, None)
    }

    pub fn make_member_access(&mut self, expression: NodeId, member: &str, ty: &str) -> NodeId {
        self.add(
            NodeKind::MemberAccess {
                expression,
                member_name: member.to_string(),
                type_string: ty.to_string(),
                referenced_declaration: None,
            },
            None,
        )
    }

    pub fn make_index_access(&mut self, base: NodeId, index: NodeId, ty: &str) -> NodeId {
        self.add(
            NodeKind::IndexAccess { base, index: Some(index), type_string: ty.to_string() },
            None,
        )
    }

    pub fn make_tuple(&mut self, components: Vec<Option<NodeId>>) -> NodeId {
        self.add(NodeKind::TupleExpression { components, is_inline_array: false }, None)
    }

    pub fn make_elementary_type_expression(&mut self, name: &str) -> NodeId {
        self.add(
            NodeKind::ElementaryTypeNameExpression { type_name: TypeName::elementary(name) },
            None,
        )
    }

    /// Wrap a single statement into a block in place of the statement.
    pub fn wrap_in_block(&mut self, parent: NodeId, stmt: NodeId) -> Result<NodeId> {
        let placeholder = self.make_block(vec![]);
        self.replace_child(parent, stmt, placeholder)?;
        self.append_child(placeholder, stmt)?;
        Ok(placeholder)
    }
}
