//! Per-site binding state.
//!
//! Every function that receives instrumentation gets one [`TranspilingContext`] per
//! [`SiteKind`]. Temporaries are fields of a memory struct `vars<N>` that is only declared once
//! instrumentation of the whole compilation unit is done, so fields can be added at any time.
//! All sites of one function share the same [`Bindings`].

use rustc_hash::FxHashMap;
use scribe_spec_lang::{DataLocation, SrcRange};

use crate::{
    ast::{NodeId, SolAst, TypeName, VariableDeclaration, MISSING_TYPE},
    error::{InstrumentationError, Result},
};

/// Name of the local holding the bindings struct.
pub const BINDINGS_VAR: &str = "_v";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SiteKind {
    /// Checks evaluated in a single program point (checkers, user functions).
    SinglePointWrapper,
    /// An interposed stub: `old` values before the call to the original, checks after it.
    TwoPointWrapper,
    /// Statement-level instrumentation, anchored by explicit markers.
    Custom,
}

/// Where the next statement of one phase goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    /// Append to the end of a block.
    End(NodeId),
    /// Insert right before `anchor` inside `block`.
    Before { block: NodeId, anchor: NodeId },
}

/// A program value captured for `AssertionFailedData`.
#[derive(Clone, Debug, PartialEq)]
pub struct DebugValue {
    pub name: String,
    /// Detached expression evaluated in the failure branch.
    pub expr: NodeId,
    pub type_string: String,
    /// Every occurrence of the identifier in the annotation.
    pub ranges: Vec<SrcRange>,
}

/// The fields of one function's `vars<N>` struct.
#[derive(Clone, Debug, Default)]
pub struct Bindings {
    struct_name: String,
    fields: Vec<(String, TypeName)>,
    materialized: bool,
}

impl Bindings {
    pub fn new(struct_name: impl Into<String>) -> Self {
        Self { struct_name: struct_name.into(), fields: vec![], materialized: false }
    }

    pub fn struct_name(&self) -> &str {
        &self.struct_name
    }

    pub fn has_binding(&self, name: &str) -> bool {
        self.fields.iter().any(|(field, _)| field == name)
    }

    pub fn add_binding(&mut self, name: &str, ty: TypeName) -> Result<()> {
        if self.has_binding(name) {
            return Err(InstrumentationError::Internal(format!(
                "binding `{name}` already defined in {}",
                self.struct_name
            )));
        }
        if matches!(ty, TypeName::Mapping(..)) {
            return Err(InstrumentationError::Internal(format!(
                "binding `{name}` cannot hold a mapping"
            )));
        }
        self.fields.push((name.to_string(), ty));
        Ok(())
    }

    /// Declare the struct in `contract` and `vars<N> memory _v;` at the top of `container`.
    /// Returns the generated nodes, or nothing if there are no fields.
    pub fn materialize(
        &mut self,
        ast: &mut SolAst,
        container: NodeId,
        contract: NodeId,
    ) -> Result<Vec<NodeId>> {
        if self.fields.is_empty() || self.materialized {
            return Ok(vec![]);
        }
        self.materialized = true;

        let members = self
            .fields
            .iter()
            .map(|(name, ty)| ast.make_param(name, ty.clone(), DataLocation::Default))
            .collect();
        let def = ast.make_struct(&self.struct_name, members);
        match ast.parent(container) {
            Some(parent) if parent == contract => ast.insert_before(contract, container, def)?,
            _ => ast.insert_at_beginning(contract, def)?,
        }

        let decl = ast.make_variable(VariableDeclaration::new(
            BINDINGS_VAR,
            TypeName::UserDefined(self.struct_name.clone()),
            DataLocation::Memory,
        ));
        let stmt = ast.make_variable_declaration_statement(vec![Some(decl)], None);
        let body = ast.function_definition(container)?.body.ok_or_else(|| {
            InstrumentationError::Internal(format!("site {container} has no body"))
        })?;
        ast.insert_at_beginning(body, stmt)?;

        Ok(vec![def, stmt])
    }
}

#[derive(Clone, Debug)]
pub struct TranspilingContext {
    pub container: NodeId,
    pub contract: NodeId,
    pub kind: SiteKind,
    /// Lent by the context for the duration of one use of the site.
    pub(crate) bindings: Bindings,
    let_annotation_bindings: FxHashMap<String, String>,
    user_fun_args: FxHashMap<(String, usize), String>,
    old_marker: Marker,
    new_marker: Marker,
    debug_values: FxHashMap<usize, Vec<DebugValue>>,
}

impl TranspilingContext {
    pub fn new(
        container: NodeId,
        contract: NodeId,
        kind: SiteKind,
        bindings: Bindings,
        old_marker: Marker,
        new_marker: Marker,
    ) -> Self {
        Self {
            container,
            contract,
            kind,
            bindings,
            let_annotation_bindings: FxHashMap::default(),
            user_fun_args: FxHashMap::default(),
            old_marker,
            new_marker,
            debug_values: FxHashMap::default(),
        }
    }

    pub fn struct_name(&self) -> &str {
        self.bindings.struct_name()
    }

    /// Whether `old(..)` needs a binding evaluated before the original code.
    pub fn is_two_phase(&self) -> bool {
        self.kind != SiteKind::SinglePointWrapper
    }

    pub fn has_binding(&self, name: &str) -> bool {
        self.bindings.has_binding(name)
    }

    pub fn add_binding(&mut self, name: &str, ty: TypeName) -> Result<()> {
        self.bindings.add_binding(name, ty)
    }

    /// Add a binding named `<prefix>_<n>` with the first free `n`.
    pub fn fresh_binding(&mut self, prefix: &str, ty: TypeName) -> Result<String> {
        let name = (0..)
            .map(|n| format!("{prefix}_{n}"))
            .find(|name| !self.has_binding(name))
            .unwrap_or_else(|| prefix.to_string());
        self.add_binding(&name, ty)?;
        Ok(name)
    }

    /// `_v.<name>`.
    pub fn ref_binding(&self, ast: &mut SolAst, name: &str) -> Result<NodeId> {
        if !self.has_binding(name) {
            return Err(InstrumentationError::Internal(format!(
                "unknown binding `{name}` in {}",
                self.struct_name()
            )));
        }
        let base = ast.make_identifier(BINDINGS_VAR, MISSING_TYPE);
        Ok(ast.make_member_access(base, name, MISSING_TYPE))
    }

    /// The binding of the `#let` annotation named `name`, created on first use.
    pub fn let_annotation_binding(&mut self, name: &str, ty: TypeName) -> Result<String> {
        if let Some(field) = self.let_annotation_bindings.get(name) {
            return Ok(field.clone());
        }
        let field = self.fresh_binding(&format!("let_{name}"), ty)?;
        self.let_annotation_bindings.insert(name.to_string(), field.clone());
        Ok(field)
    }

    pub fn lookup_let_annotation(&self, name: &str) -> Option<&str> {
        self.let_annotation_bindings.get(name).map(String::as_str)
    }

    /// Name of the `index`th parameter of user function `fun` in its implementation.
    pub fn user_fun_arg(&mut self, fun: &str, index: usize, param: &str) -> String {
        self.user_fun_args
            .entry((fun.to_string(), index))
            .or_insert_with(|| format!("{param}_{index}"))
            .clone()
    }

    pub fn lookup_user_fun_arg(&self, fun: &str, index: usize) -> Option<&str> {
        self.user_fun_args.get(&(fun.to_string(), index)).map(String::as_str)
    }

    pub fn insert_statement(
        &self,
        ast: &mut SolAst,
        stmt: NodeId,
        before_original: bool,
    ) -> Result<()> {
        let marker = if before_original { self.old_marker } else { self.new_marker };
        match marker {
            Marker::End(block) => ast.append_child(block, stmt),
            Marker::Before { block, anchor } => ast.insert_before(block, anchor, stmt),
        }
    }

    pub fn reset_marker(&mut self, marker: Marker, before_original: bool) {
        if before_original {
            self.old_marker = marker;
        } else {
            self.new_marker = marker;
        }
    }

    /// Record a program identifier used by annotation `annot`. Repeated uses extend the ranges.
    pub fn add_debug_value(
        &mut self,
        ast: &mut SolAst,
        annot: usize,
        name: &str,
        type_string: String,
        range: Option<SrcRange>,
    ) {
        let values = self.debug_values.entry(annot).or_default();
        if let Some(value) = values.iter_mut().find(|value| value.name == name) {
            value.ranges.extend(range);
            return;
        }
        let expr = ast.make_identifier(name, &type_string);
        values.push(DebugValue {
            name: name.to_string(),
            expr,
            type_string,
            ranges: range.into_iter().collect(),
        });
    }

    pub fn debug_values(&self, annot: usize) -> &[DebugValue] {
        self.debug_values.get(&annot).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn materialize(&mut self, ast: &mut SolAst) -> Result<Vec<NodeId>> {
        self.bindings.materialize(ast, self.container, self.contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ContractKind, NodeKind, StateMutability, Visibility};

    fn site(ast: &mut SolAst) -> TranspilingContext {
        let c = ast.make_contract("C", ContractKind::Contract, &[]);
        let f = ast.add_empty_function(c, "f", Visibility::Public, StateMutability::NonPayable).unwrap();
        let body = ast.function_definition(f).unwrap().body.unwrap();
        TranspilingContext::new(
            f,
            c,
            SiteKind::SinglePointWrapper,
            Bindings::new("vars0"),
            Marker::End(body),
            Marker::End(body),
        )
    }

    #[test]
    fn test_bindings() {
        let mut ast = SolAst::new();
        let mut tctx = site(&mut ast);
        let uint = TypeName::elementary("uint256");

        assert_eq!(tctx.fresh_binding("old", uint.clone()).unwrap(), "old_0");
        assert_eq!(tctx.fresh_binding("old", uint.clone()).unwrap(), "old_1");
        assert!(tctx.add_binding("old_0", uint.clone()).is_err());
        assert!(tctx.ref_binding(&mut ast, "nope").is_err());

        let first = tctx.let_annotation_binding("x", uint.clone()).unwrap();
        assert_eq!(tctx.let_annotation_binding("x", uint).unwrap(), first);
        assert_eq!(tctx.lookup_let_annotation("x"), Some(first.as_str()));
    }

    #[test]
    fn test_materialize_declares_struct_first() {
        let mut ast = SolAst::new();
        let mut tctx = site(&mut ast);
        let body = ast.function_definition(tctx.container).unwrap().body.unwrap();
        let existing = ast.make_break();
        ast.append_child(body, existing).unwrap();

        assert!(tctx.materialize(&mut ast).unwrap().is_empty());
        tctx.add_binding("flag", TypeName::elementary("bool")).unwrap();
        let generated = tctx.materialize(&mut ast).unwrap();
        assert_eq!(generated.len(), 2);

        let NodeKind::Block { statements } = ast.kind(body).unwrap() else { panic!() };
        assert_eq!(statements, &vec![generated[1], existing]);
        let members = &ast.contract_definition(tctx.contract).unwrap().nodes;
        assert_eq!(members, &vec![generated[0], tctx.container]);
        assert!(tctx.materialize(&mut ast).unwrap().is_empty());
    }
}
