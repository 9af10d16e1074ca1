//! Translation of annotation expressions into host expressions.

use std::str::FromStr;

use alloy_primitives::Address;
use rustc_hash::FxHashMap;
use scribe_spec_lang::{BinaryOp, DataLocation, SNode, SNodeKind, SType, UnaryOp};

use crate::{
    annotations::AnnotationMetaData,
    ast::{types::stype_to_type_name, NodeId, NodeKind, SolAst, MISSING_TYPE},
    config::AssertionMode,
    context::InstrumentationContext,
    error::{InstrumentationError, Result},
    instrument::make_array_sum_fun,
    transpiling_context::TranspilingContext,
};

/// Transpile the expression of `annot` (predicate, `#let` right-hand side, or user-function
/// body) in the site `tctx`. Temporaries the expression needs are inserted through the site's
/// markers.
pub fn transpile_annotation(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    tctx: &mut TranspilingContext,
    annot: &AnnotationMetaData,
) -> Result<NodeId> {
    let expr = annot.parsed.annotation_expr().ok_or_else(|| {
        InstrumentationError::Internal(format!("annotation {} has no expression", annot.id))
    })?;
    let user_fun = match &annot.parsed.kind {
        SNodeKind::UserFunctionDefinition { name, params, .. } => Some((
            name.clone(),
            params.iter().map(|(param, _)| param.clone()).collect::<Vec<_>>(),
        )),
        _ => None,
    };

    let mut transpiler =
        Transpiler { ast, ctx, tctx, annot, scopes: vec![], user_fun, in_old: false };
    let res = transpiler.expr(expr)?;
    trace!(annotation = annot.id, node = %res, "transpiled annotation");
    Ok(res)
}

struct Transpiler<'a> {
    ast: &'a mut SolAst,
    ctx: &'a mut InstrumentationContext,
    tctx: &'a mut TranspilingContext,
    annot: &'a AnnotationMetaData,
    /// Innermost last; maps `let` names to binding fields.
    scopes: Vec<FxHashMap<String, String>>,
    user_fun: Option<(String, Vec<String>)>,
    in_old: bool,
}

impl Transpiler<'_> {
    fn unsupported(&self, msg: impl Into<String>) -> InstrumentationError {
        InstrumentationError::unsupported(self.ast, self.annot.target, msg)
    }

    /// Parenthesize compound expressions.
    fn paren(&mut self, id: NodeId) -> Result<NodeId> {
        Ok(match self.ast.kind(id)? {
            NodeKind::BinaryOperation { .. } |
            NodeKind::UnaryOperation { .. } |
            NodeKind::Conditional { .. } |
            NodeKind::Assignment { .. } => self.ast.make_tuple(vec![Some(id)]),
            _ => id,
        })
    }

    fn sub(&mut self, node: &SNode) -> Result<NodeId> {
        let id = self.expr(node)?;
        self.paren(id)
    }

    fn type_of(&self, node: &SNode, what: &str) -> Result<SType> {
        node.ty.clone().ok_or_else(|| self.unsupported(format!("cannot infer the type of {what} `{node}`")))
    }

    /// Bind `value` to a fresh field, assigned before the original code when `before` holds.
    fn bind(&mut self, prefix: &str, ty: &SType, value: NodeId, before: bool) -> Result<String> {
        if matches!(ty, SType::Mapping { .. }) {
            return Err(self.unsupported(format!("cannot bind a mapping in `{prefix}`")));
        }
        let field = self.tctx.fresh_binding(prefix, stype_to_type_name(ty))?;
        let lhs = self.tctx.ref_binding(self.ast, &field)?;
        let assign = self.ast.make_assignment(lhs, value);
        let stmt = self.ast.make_expression_statement(assign);
        self.tctx.insert_statement(self.ast, stmt, before)?;
        self.ctx.records.add_annotation_instrumentation(self.annot.id, &[stmt]);
        Ok(field)
    }

    fn identifier(&mut self, node: &SNode, name: &str, as_value: bool) -> Result<NodeId> {
        for scope in self.scopes.iter().rev() {
            if let Some(field) = scope.get(name) {
                let field = field.clone();
                return self.tctx.ref_binding(self.ast, &field);
            }
        }

        if let Some((fun, params)) = &self.user_fun {
            if let Some(index) = params.iter().position(|param| param == name) {
                let arg = self
                    .tctx
                    .lookup_user_fun_arg(fun, index)
                    .map(str::to_string)
                    .unwrap_or_else(|| name.to_string());
                return Ok(self.ast.make_identifier(&arg, MISSING_TYPE));
            }
        }

        if let Some(field) = self.tctx.lookup_let_annotation(name) {
            let field = field.to_string();
            return self.tctx.ref_binding(self.ast, &field);
        }

        let type_string = node.ty.as_ref().map(SType::to_string);
        if as_value && self.debug_enabled() {
            if let Some(ty) = node.ty.as_ref().filter(|ty| !matches!(ty, SType::Mapping { .. })) {
                let range = node.src.map(|loc| loc.primary());
                self.tctx.add_debug_value(self.ast, self.annot.id, name, ty.to_string(), range);
            }
        }
        Ok(self.ast.make_identifier(name, type_string.as_deref().unwrap_or(MISSING_TYPE)))
    }

    fn debug_enabled(&self) -> bool {
        self.ctx.config.debug_events &&
            self.ctx.config.assertion_mode == AssertionMode::Log &&
            self.annot.is_property()
    }

    fn result(&mut self) -> Result<NodeId> {
        if !self.tctx.is_two_phase() {
            return Err(self.unsupported("`$result` is only available in function annotations"));
        }
        let returns = self.ast.function_definition(self.tctx.container)?.return_parameters.clone();
        let [ret] = returns.as_slice() else {
            return Err(self.unsupported(format!(
                "`$result` needs exactly one return value, the function has {}",
                returns.len()
            )));
        };
        let name = self.ast.variable_declaration(*ret)?.name.clone();
        Ok(self.ast.make_identifier(&name, MISSING_TYPE))
    }

    fn call(&mut self, callee: &SNode, args: &[SNode]) -> Result<NodeId> {
        if let SNodeKind::Id(name) = &callee.kind {
            if let Some(implementation) = self.ctx.user_function(self.ast, self.tctx.contract, name)
            {
                let args = args.iter().map(|arg| self.expr(arg)).collect::<Result<Vec<_>>>()?;
                return Ok(self.ast.make_call_to(&implementation, args));
            }

            if name == "sum" {
                let [arr] = args else {
                    return Err(self.unsupported("`sum` takes exactly one array"));
                };
                return self.array_sum(arr);
            }
        }

        let callee = match &callee.kind {
            SNodeKind::Id(name) => self.identifier(callee, name, false)?,
            _ => self.expr(callee)?,
        };
        let args = args.iter().map(|arg| self.expr(arg)).collect::<Result<Vec<_>>>()?;
        Ok(self.ast.make_call(callee, args, MISSING_TYPE))
    }

    fn array_sum(&mut self, arr: &SNode) -> Result<NodeId> {
        let ty = self.type_of(arr, "the summed array")?;
        let SType::Array { elem, location, .. } = &ty else {
            return Err(self.unsupported(format!("`sum` expects an array, got {}", ty.type_name())));
        };
        let SType::Int { .. } = elem.as_ref() else {
            return Err(self.unsupported(format!(
                "`sum` expects a numeric array, got {}",
                ty.type_name()
            )));
        };
        let location = match location {
            DataLocation::Default => DataLocation::Memory,
            other => *other,
        };

        let helper = make_array_sum_fun(self.ast, self.ctx, self.tctx.contract, &ty, location)?;
        let arg = self.expr(arr)?;
        Ok(self.ast.make_call_to(&helper, vec![arg]))
    }

    fn let_expr(&mut self, names: &[String], rhs: &SNode, body: &SNode) -> Result<NodeId> {
        let [name] = names else {
            return Err(self.unsupported("`let` over several names is not supported"));
        };
        let ty = self.type_of(rhs, "the bound expression")?;
        let value = self.expr(rhs)?;
        let before = self.in_old || !self.tctx.is_two_phase();
        let field = self.bind(&format!("let_{name}"), &ty, value, before)?;

        self.scopes.push(FxHashMap::from_iter([(name.clone(), field)]));
        let res = self.expr(body);
        self.scopes.pop();
        res
    }

    fn old(&mut self, sub: &SNode) -> Result<NodeId> {
        if self.in_old || !self.tctx.is_two_phase() {
            return self.expr(sub);
        }
        let ty = self.type_of(sub, "the `old` expression")?;
        self.in_old = true;
        let value = self.expr(sub);
        self.in_old = false;
        let field = self.bind("old", &ty, value?, true)?;
        self.tctx.ref_binding(self.ast, &field)
    }

    fn binary(&mut self, left: &SNode, op: BinaryOp, right: &SNode) -> Result<NodeId> {
        let bool_ty = SType::Bool.to_string();
        let ty = match op {
            BinaryOp::Implies | BinaryOp::Iff => bool_ty,
            _ => MISSING_TYPE.to_string(),
        };
        match op {
            BinaryOp::Implies => {
                let lhs = self.expr(left)?;
                let lhs = self.ast.make_tuple(vec![Some(lhs)]);
                let not_lhs = self.ast.make_unary("!", lhs, &ty);
                let rhs = self.expr(right)?;
                let rhs = self.ast.make_tuple(vec![Some(rhs)]);
                let or = self.ast.make_binary("||", not_lhs, rhs, &ty);
                Ok(self.ast.make_tuple(vec![Some(or)]))
            }
            BinaryOp::Iff => {
                let lhs = self.sub(left)?;
                let rhs = self.sub(right)?;
                let eq = self.ast.make_binary("==", lhs, rhs, &ty);
                Ok(self.ast.make_tuple(vec![Some(eq)]))
            }
            op => {
                let lhs = self.sub(left)?;
                let rhs = self.sub(right)?;
                Ok(self.ast.make_binary(&op.to_string(), lhs, rhs, &ty))
            }
        }
    }

    fn expr(&mut self, node: &SNode) -> Result<NodeId> {
        match &node.kind {
            SNodeKind::Id(name) => self.identifier(node, name, true),
            SNodeKind::Number(value) => Ok(self.ast.make_number(value)),
            SNodeKind::Bool(value) => Ok(self.ast.make_bool(*value)),
            SNodeKind::StringLiteral(value) => Ok(self.ast.make_string_literal(value)),
            SNodeKind::HexLiteral(digits) => {
                hex::decode(digits)
                    .map_err(|err| self.unsupported(format!("invalid hex literal {digits:?}: {err}")))?;
                Ok(self.ast.make_hex_literal(digits))
            }
            SNodeKind::AddressLiteral(value) => {
                let address = Address::from_str(value).map_err(|err| {
                    self.unsupported(format!("invalid address literal {value}: {err}"))
                })?;
                let literal = self.ast.make_number(address.to_checksum(None));
                if let Ok(NodeKind::Literal { type_string, .. }) = self.ast.kind_mut(literal) {
                    *type_string = "address".to_string();
                }
                Ok(literal)
            }
            SNodeKind::Result => self.result(),
            SNodeKind::UnaryOperation { op: UnaryOp::Old, sub } => self.old(sub),
            SNodeKind::UnaryOperation { op, sub } => {
                let sub = self.sub(sub)?;
                Ok(self.ast.make_unary(&op.to_string(), sub, MISSING_TYPE))
            }
            SNodeKind::BinaryOperation { left, op, right } => self.binary(left, *op, right),
            SNodeKind::Conditional { condition, true_case, false_case } => {
                let condition = self.sub(condition)?;
                let true_case = self.sub(true_case)?;
                let false_case = self.sub(false_case)?;
                Ok(self.ast.make_conditional(condition, true_case, false_case, MISSING_TYPE))
            }
            SNodeKind::IndexAccess { base, index } => {
                let base = self.sub(base)?;
                let index = self.expr(index)?;
                Ok(self.ast.make_index_access(base, index, MISSING_TYPE))
            }
            SNodeKind::MemberAccess { base, member } => {
                let base = match &base.kind {
                    SNodeKind::Id(name) if base.ty.is_none() => {
                        // Contract, library or builtin namespace (`abi`, `block`, ...).
                        self.identifier(base, name, false)?
                    }
                    _ => self.sub(base)?,
                };
                Ok(self.ast.make_member_access(base, member, MISSING_TYPE))
            }
            SNodeKind::FunctionCall { callee, args } => self.call(callee, args),
            SNodeKind::Let { names, rhs, body } => self.let_expr(names, rhs, body),
            SNodeKind::Property { .. } |
            SNodeKind::LetAnnotation { .. } |
            SNodeKind::UserFunctionDefinition { .. } => Err(InstrumentationError::Internal(
                format!("annotation {} nested inside an expression", node.id),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use scribe_spec_lang::{AnnotationType, IdAllocator, NodeBuilder, SrcRange};

    use super::*;
    use crate::{
        annotations::Annotations,
        ast::{printer::print_units, ContractKind, StateMutability, Visibility},
        config::InstrumentationConfig,
        context::NameGenerator,
        transpiling_context::SiteKind,
    };

    struct Fixture {
        ast: SolAst,
        ctx: InstrumentationContext,
        func: NodeId,
        unit: NodeId,
    }

    fn fixture(config: InstrumentationConfig) -> Fixture {
        let mut ast = SolAst::new();
        let c = ast.make_contract("C", ContractKind::Contract, &[]);
        let func =
            ast.add_empty_function(c, "f", Visibility::Public, StateMutability::NonPayable).unwrap();
        let unit = ast.add_unit("c.sol", 0, vec![c]);
        ast.link().unwrap();
        let names = NameGenerator::from_ast(&ast);
        Fixture { ast, ctx: InstrumentationContext::new(config, names), func, unit }
    }

    fn render(ast: &mut SolAst, unit: NodeId, expr: NodeId) -> String {
        let stmt = ast.make_expression_statement(expr);
        let holder = ast.make_block(vec![stmt]);
        let unit_nodes = ast.source_unit(unit).unwrap().nodes.clone();
        let c = unit_nodes[0];
        let f = ast.functions_of(c).unwrap()[0];
        let body = ast.function_definition(f).unwrap().body.unwrap();
        ast.append_child(body, holder).unwrap();
        let printed = print_units(ast, &[unit]).unwrap();
        let range = printed.range_of(stmt).unwrap();
        range.fragment(&printed.units[0].source).unwrap().trim_end_matches(';').to_string()
    }

    #[test]
    fn test_implication_and_parens() {
        let mut fx = fixture(InstrumentationConfig::default());
        let mut ids = IdAllocator::new();
        let mut b = NodeBuilder::new(&mut ids);
        let x = b.id("x");
        let y = b.id("y");
        let one = b.number(1);
        let sum = b.binary(y, BinaryOp::Add, one);
        let zero = b.number(0);
        let gt = b.binary(sum, BinaryOp::Gt, zero);
        let imp = b.binary(x, BinaryOp::Implies, gt);
        let prop = b.property(AnnotationType::Assert, imp);

        let mut annots = Annotations::new();
        annots.push(fx.func, prop, "#assert x ==> y + 1 > 0;", "").unwrap();
        let annot = annots.get(0).unwrap().clone();

        let func = fx.func;
        let expr = fx
            .ctx
            .with_trans_ctx(&mut fx.ast, func, SiteKind::SinglePointWrapper, |ast, ctx, tctx| {
                transpile_annotation(ast, ctx, tctx, &annot)
            })
            .unwrap();
        assert_eq!(render(&mut fx.ast, fx.unit, expr), "(!(x) || ((y + 1) > 0))");
    }

    #[test]
    fn test_iff_and_checksummed_address() {
        let mut fx = fixture(InstrumentationConfig::default());
        let mut ids = IdAllocator::new();
        let mut b = NodeBuilder::new(&mut ids);
        let owner = b.id("owner");
        let addr = b.node(SNodeKind::AddressLiteral(
            "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".into(),
        ));
        let eq = b.binary(owner, BinaryOp::Eq, addr);
        let t = b.boolean(true);
        let iff = b.binary(eq, BinaryOp::Iff, t);
        let prop = b.property(AnnotationType::Assert, iff);

        let mut annots = Annotations::new();
        annots.push(fx.func, prop, "", "").unwrap();
        let annot = annots.get(0).unwrap().clone();

        let func = fx.func;
        let expr = fx
            .ctx
            .with_trans_ctx(&mut fx.ast, func, SiteKind::SinglePointWrapper, |ast, ctx, tctx| {
                transpile_annotation(ast, ctx, tctx, &annot)
            })
            .unwrap();
        assert_eq!(
            render(&mut fx.ast, fx.unit, expr),
            "((owner == 0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed) == true)"
        );
    }

    #[test]
    fn test_old_binds_before_original() {
        let mut fx = fixture(InstrumentationConfig::default());
        let body = fx.ast.function_definition(fx.func).unwrap().body.unwrap();
        let call = fx.ast.make_call_to("_original_C_f", vec![]);
        let call_stmt = fx.ast.make_expression_statement(call);
        fx.ast.append_child(body, call_stmt).unwrap();

        let mut ids = IdAllocator::new();
        let mut b = NodeBuilder::new(&mut ids);
        let x = b.id("x").typed(SType::uint256());
        let old_x = b.old(x);
        let x = b.id("x").typed(SType::uint256());
        let ge = b.binary(x, BinaryOp::Ge, old_x);
        let prop = b.property(AnnotationType::IfSucceeds, ge).at(SrcRange::new(0, 10, 0));

        let mut annots = Annotations::new();
        annots.push(fx.func, prop, "", "").unwrap();
        let annot = annots.get(0).unwrap().clone();

        let func = fx.func;
        let expr = fx
            .ctx
            .with_trans_ctx(&mut fx.ast, func, SiteKind::TwoPointWrapper, |ast, ctx, tctx| {
                transpile_annotation(ast, ctx, tctx, &annot)
            })
            .unwrap();

        let NodeKind::Block { statements } = fx.ast.kind(body).unwrap() else { panic!() };
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1], call_stmt);
        assert_eq!(fx.ctx.records.annotation[&0], vec![statements[0]]);
        assert_eq!(render(&mut fx.ast, fx.unit, expr), "x >= _v.old_0");
    }

    #[test]
    fn test_result_requires_single_return() {
        let mut fx = fixture(InstrumentationConfig::default());
        let mut ids = IdAllocator::new();
        let mut b = NodeBuilder::new(&mut ids);
        let res = b.result();
        let zero = b.number(0);
        let gt = b.binary(res, BinaryOp::Gt, zero);
        let prop = b.property(AnnotationType::IfSucceeds, gt);

        let mut annots = Annotations::new();
        annots.push(fx.func, prop, "", "").unwrap();
        let annot = annots.get(0).unwrap().clone();

        let func = fx.func;
        let err = fx
            .ctx
            .with_trans_ctx(&mut fx.ast, func, SiteKind::TwoPointWrapper, |ast, ctx, tctx| {
                transpile_annotation(ast, ctx, tctx, &annot)
            })
            .unwrap_err();
        assert!(err.is_unsupported());
    }
}
