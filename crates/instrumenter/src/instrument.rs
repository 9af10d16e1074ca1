//! Compilation of annotations into runtime checks, and the contract-invariant protocol.
//!
//! Invariants of a contract are checked at its external boundaries. The shared
//! `__scribble_out_of_contract` flag is `true` whenever execution is outside every instrumented
//! entry point; entry points clear it and restore it on exit, and external call sites set it
//! around calls that could re-enter with state changes.

use scribe_spec_lang::{AnnotationType, DataLocation, SNodeKind, SType};

use crate::{
    annotations::{AnnotationMetaData, Annotations},
    ast::{
        types::{stype_to_type_name, FunctionTypeDesc},
        ContractKind, FunctionCallKind, FunctionDefinition, FunctionKind, InheritanceSpecifier,
        NodeId, NodeKind, SolAst, StateMutability, TypeName, VariableDeclaration, Visibility,
        MISSING_TYPE,
    },
    config::AssertionMode,
    context::{
        internal_checker_name, DebugValueDesc, InstrumentationContext, UtilsUnit,
        ASSERTION_FAILED, ASSERTION_FAILED_DATA, CHECK_INVS_AT_END, CHECK_STATE_INVS,
        OUT_OF_CONTRACT_FLAG, SCRATCH_FIELD, UTILS_CONTRACT,
    },
    error::{single, InstrumentationError, Result},
    internal_ensure,
    interpose::{interpose, interpose_call},
    transpile::transpile_annotation,
    transpiling_context::{Marker, SiteKind, TranspilingContext},
};

/// Property ids are encoded in 12 bits in marker mode.
pub const MSTORE_ID_LIMIT: usize = 0x1000;

/// Sentinel written to the scratch field by `#try`.
const TRY_SENTINEL: u32 = 42;

/// Added to the event declaration id on coverage `HIT:` emissions.
pub const HIT_EVENT_OFFSET: usize = 1000;

/// Create the utility unit: the reentrancy flag and the assertion events.
pub fn generate_utils_contract(ast: &mut SolAst, ctx: &mut InstrumentationContext) -> Result<UtilsUnit> {
    let version = ctx.config.compiler_version.to_string();
    let pragma = ast.make_pragma(&format!("solidity {version}"));
    let contract = ast.make_contract(UTILS_CONTRACT, ContractKind::Contract, &[]);
    ast.contract_definition_mut(contract)?.linearized_base_contracts = vec![contract];
    ast.set_documentation(contract, "Utility contract holding a stack counter")?;

    let value = ast.make_bool(true);
    let flag = ast.make_variable(VariableDeclaration {
        state_variable: true,
        value: Some(value),
        ..VariableDeclaration::new(OUT_OF_CONTRACT_FLAG, TypeName::elementary("bool"), DataLocation::Default)
    });
    ast.append_child(contract, flag)?;

    let message = ast.make_param("message", TypeName::elementary("string"), DataLocation::Default);
    let assertion_failed = ast.make_event(ASSERTION_FAILED, vec![message]);
    ast.append_child(contract, assertion_failed)?;

    let event_id = ast.make_param("eventId", TypeName::elementary("int"), DataLocation::Default);
    let encoding = ast.make_param("encodingData", TypeName::elementary("bytes"), DataLocation::Default);
    let assertion_failed_data = ast.make_event(ASSERTION_FAILED_DATA, vec![event_id, encoding]);
    ast.append_child(contract, assertion_failed_data)?;

    let file_index = ast.units().len();
    let path = ctx.config.utils_path.clone();
    let unit = ast.add_unit(&path, file_index, vec![pragma, contract]);
    ctx.names.reserve(UTILS_CONTRACT);
    ctx.records.add_general_instrumentation(&[flag]);

    let utils = UtilsUnit { unit, contract, flag, assertion_failed, assertion_failed_data };
    ctx.utils = Some(utils);
    Ok(utils)
}

/// `0xcafe` repeated 15 times followed by the 4-hex-digit `id`.
pub fn bit_pattern(id: usize) -> String {
    let mut bytes = [0u8; 32];
    for chunk in bytes[..30].chunks_mut(2) {
        chunk.copy_from_slice(&[0xca, 0xfe]);
    }
    bytes[30..].copy_from_slice(&(id as u16).to_be_bytes());
    hex::encode_prefixed(bytes)
}

fn flag_ident(ast: &mut SolAst) -> NodeId {
    ast.make_identifier(OUT_OF_CONTRACT_FLAG, "bool")
}

fn call_general_checker(ast: &mut SolAst) -> NodeId {
    let call = ast.make_call_to(CHECK_STATE_INVS, vec![]);
    ast.make_expression_statement(call)
}

/// One `AssertionFailedData` emission per annotation that exposes debug values.
fn debug_info_emits(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    tctx: &TranspilingContext,
    annotations: &[&AnnotationMetaData],
) -> Result<Vec<Option<NodeId>>> {
    let mut res = vec![];
    for annot in annotations {
        let values = tctx.debug_values(annot.id);
        if values.is_empty() {
            res.push(None);
            continue;
        }

        ctx.debug_events.entry(annot.id).or_insert_with(|| {
            values
                .iter()
                .map(|value| DebugValueDesc {
                    ranges: value.ranges.clone(),
                    type_string: value.type_string.clone(),
                })
                .collect()
        });

        let args = values.iter().map(|value| value.expr).collect();
        let (_, data_event) = ctx.assertion_events(ast, tctx.contract)?;
        let event = ast.make_identifier_for(data_event)?;
        let id = ast.make_number(annot.id);
        let abi = ast.make_identifier("abi", MISSING_TYPE);
        let encode = ast.make_member_access(abi, "encode", MISSING_TYPE);
        let encoded = ast.make_call(encode, args, MISSING_TYPE);
        let call = ast.make_call(event, vec![id, encoded], MISSING_TYPE);
        res.push(Some(ast.make_emit(call)));
    }
    Ok(res)
}

/// The check for one assertion-style property: report (and optionally abort) when `expr`
/// evaluates to false.
fn emit_assert(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    tctx: &mut TranspilingContext,
    expr: NodeId,
    annot: &AnnotationMetaData,
    emit_stmt: Option<NodeId>,
) -> Result<NodeId> {
    let (failed, hit) = match ctx.config.assertion_mode {
        AssertionMode::Log => {
            let (event, _) = ctx.assertion_events(ast, tctx.contract)?;
            let message = format!("{}: {}", annot.id, annot.report_message());

            let callee = ast.make_identifier_for(event)?;
            let literal = ast.make_string_literal(&message);
            let call = ast.make_call(callee, vec![literal], MISSING_TYPE);
            let failed = ast.make_emit(call);

            let hit = if ctx.config.cov_assertions {
                let callee = ast.make_offset_identifier_for(event, HIT_EVENT_OFFSET)?;
                let literal = ast.make_string_literal(&format!("HIT: {message}"));
                let call = ast.make_call(callee, vec![literal], MISSING_TYPE);
                Some(ast.make_emit(call))
            } else {
                None
            };
            (failed, hit)
        }
        AssertionMode::Mstore => {
            if annot.id >= MSTORE_ID_LIMIT {
                return Err(InstrumentationError::PropertyCapacity {
                    id: annot.id,
                    limit: MSTORE_ID_LIMIT,
                });
            }
            let lhs = tctx.ref_binding(ast, SCRATCH_FIELD)?;
            let pattern = ast.make_number(bit_pattern(annot.id));
            let assign = ast.make_assignment(lhs, pattern);
            let failed = ast.make_expression_statement(assign);

            let hit = if ctx.config.cov_assertions {
                let lhs = tctx.ref_binding(ast, SCRATCH_FIELD)?;
                let pattern = ast.make_number(bit_pattern(annot.id | MSTORE_ID_LIMIT));
                let assign = ast.make_assignment(lhs, pattern);
                Some(ast.make_expression_statement(assign))
            } else {
                None
            };
            (failed, hit)
        }
    };

    let mut if_body = vec![failed];
    if let Some(emit_stmt) = emit_stmt {
        ctx.records.add_annotation_instrumentation(annot.id, &[emit_stmt]);
        if_body.push(emit_stmt);
    }
    if ctx.config.add_assert {
        let no = ast.make_bool(false);
        let call = ast.make_call_to("assert", vec![no]);
        if_body.push(ast.make_expression_statement(call));
    }

    let paren = ast.make_tuple(vec![Some(expr)]);
    let condition = ast.make_unary("!", paren, "bool");
    let block = ast.make_block(if_body.clone());
    let if_stmt = ast.make_if(condition, block, None);

    ctx.records.add_annotation_instrumentation(annot.id, &[failed, if_stmt]);
    ctx.records.add_annotation_check(annot.id, condition);
    ctx.records.add_annotation_failure_check(annot.id, &if_body);

    match hit {
        Some(hit) => {
            ctx.records.add_annotation_instrumentation(annot.id, &[hit]);
            Ok(ast.make_block(vec![hit, if_stmt]))
        }
        None => Ok(if_stmt),
    }
}

/// Transpile `annotations` and insert their checks through the markers of `tctx`.
pub fn insert_annotations(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    tctx: &mut TranspilingContext,
    annotations: &[&AnnotationMetaData],
) -> Result<()> {
    let mut predicates = vec![];
    let mut let_fields = vec![];
    for annot in annotations {
        internal_ensure!(annot.is_property(), "user function definition {} inserted as a check", annot.id);
        let writes_marker =
            matches!(annot.kind, AnnotationType::Assert | AnnotationType::IfSucceeds | AnnotationType::Invariant);
        if writes_marker && ctx.config.assertion_mode == AssertionMode::Mstore && annot.id >= MSTORE_ID_LIMIT {
            return Err(InstrumentationError::PropertyCapacity { id: annot.id, limit: MSTORE_ID_LIMIT });
        }
        predicates.push(transpile_annotation(ast, ctx, tctx, annot)?);

        // Bound right away, so that the annotations after it can refer to the name.
        let field = match &annot.parsed.kind {
            SNodeKind::LetAnnotation { name, expr } if annot.kind == AnnotationType::LetAnnotation => {
                let ty = expr.ty.as_ref().ok_or_else(|| {
                    InstrumentationError::unsupported(
                        ast,
                        annot.target,
                        format!("cannot infer the type of `#let {name}`"),
                    )
                })?;
                Some(tctx.let_annotation_binding(name, stype_to_type_name(ty))?)
            }
            _ => None,
        };
        let_fields.push(field);
    }

    // Debug events would change the event interface, which marker mode exists to avoid.
    let debug_infos = if ctx.config.debug_events && ctx.config.assertion_mode == AssertionMode::Log {
        debug_info_emits(ast, ctx, tctx, annotations)?
    } else {
        vec![None; annotations.len()]
    };

    let mut checks = vec![];
    let emissions = annotations.iter().zip(predicates).zip(debug_infos).zip(let_fields);
    for (((annot, predicate), emit_stmt), let_field) in emissions {
        let target_is_stmt = ast.kind(annot.target)?.is_statement();
        trace!(annotation = annot.id, kind = %annot.kind, "emitting property");

        let check = match annot.kind {
            AnnotationType::Require => {
                let call = ast.make_call_to("require", vec![predicate]);
                let stmt = ast.make_expression_statement(call);
                ctx.records.add_annotation_instrumentation(annot.id, &[stmt]);
                ctx.records.add_annotation_check(annot.id, predicate);
                (stmt, !target_is_stmt)
            }
            AnnotationType::Try => {
                if !tctx.has_binding(SCRATCH_FIELD) {
                    tctx.add_binding(SCRATCH_FIELD, TypeName::elementary("uint256"))?;
                }
                let lhs = tctx.ref_binding(ast, SCRATCH_FIELD)?;
                let sentinel = ast.make_number(TRY_SENTINEL);
                let assign = ast.make_assignment(lhs, sentinel);
                let assign = ast.make_expression_statement(assign);
                let stmt = ast.make_if(predicate, assign, None);
                ctx.records.add_annotation_instrumentation(annot.id, &[stmt]);
                ctx.records.add_annotation_check(annot.id, predicate);
                (stmt, !target_is_stmt)
            }
            AnnotationType::LetAnnotation => {
                let Some(field) = let_field else {
                    return Err(InstrumentationError::Internal(format!(
                        "annotation {} is not a let annotation",
                        annot.id
                    )));
                };
                let lhs = tctx.ref_binding(ast, &field)?;
                let assign = ast.make_assignment(lhs, predicate);
                let stmt = ast.make_expression_statement(assign);
                // Bindings are not checks; metadata consumers only expect checks per property.
                ctx.records.add_general_instrumentation(&[stmt]);
                (stmt, false)
            }
            AnnotationType::Assert | AnnotationType::IfSucceeds | AnnotationType::Invariant => {
                (emit_assert(ast, ctx, tctx, predicate, annot, emit_stmt)?, false)
            }
            AnnotationType::UserFunctionDefinition => {
                return Err(InstrumentationError::Internal(format!(
                    "user function definition {} inserted as a check",
                    annot.id
                )))
            }
        };
        checks.push(check);
    }

    for (check, before_original) in checks {
        tctx.insert_statement(ast, check, before_original)?;
    }
    Ok(())
}

/// Contract-level work: user functions, then (if the contract takes part in state-invariant
/// checking) both checkers, the constructor and every external call site.
pub fn instrument_contract(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    annotations: &Annotations,
    contract: NodeId,
) -> Result<()> {
    let name = ast.contract_name(contract)?.to_string();
    debug!(contract = %name, "instrumenting contract");

    let user_fns = annotations.of_kind(contract, AnnotationType::UserFunctionDefinition);
    make_user_functions(ast, ctx, &user_fns, contract)?;

    if !ctx.needs_state_invariants.contains(&contract) {
        return Ok(());
    }

    let invariants = annotations.of_kind(contract, AnnotationType::Invariant);
    if !invariants.is_empty() {
        make_internal_invariant_checker(ast, ctx, &invariants, contract)?;
    }
    make_general_invariant_checker(ast, ctx, annotations, contract)?;
    ctx.needs_utils(contract);

    // An annotated constructor is instrumented like any other annotated function.
    let needs_ctor = match ast.constructor_of(contract)? {
        Some(ctor) => !annotations.has_any(ctor),
        None => true,
    };
    if needs_ctor {
        instrument_constructor(ast, ctx, contract)?;
    }

    replace_external_call_sites(ast, ctx, contract)
}

fn make_user_functions(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    annotations: &[&AnnotationMetaData],
    contract: NodeId,
) -> Result<Vec<NodeId>> {
    // Register every name first so definitions can call each other.
    let mut planned = vec![];
    for annot in annotations {
        let SNodeKind::UserFunctionDefinition { name, .. } = &annot.parsed.kind else {
            return Err(InstrumentationError::Internal(format!(
                "annotation {} is not a user function",
                annot.id
            )));
        };
        let implementation = ctx.names.fresh(name, true);
        ctx.register_user_function(contract, name, implementation.clone());
        planned.push((annot, implementation));
    }

    let mut user_fns = vec![];
    for (annot, implementation) in planned {
        let SNodeKind::UserFunctionDefinition { name, params, return_type, .. } = &annot.parsed.kind
        else {
            continue;
        };

        let func = ast.add_empty_function(contract, &implementation, Visibility::Internal, StateMutability::View)?;
        ast.set_documentation(func, format!("Implementation of user function {}", annot.parsed))?;
        let outer = ast.function_definition(func)?.body.ok_or_else(|| {
            InstrumentationError::Internal(format!("user function {implementation} has no body"))
        })?;

        // Annotation arithmetic wraps on overflow.
        let body = if ctx.config.needs_unchecked_blocks() {
            let unchecked = ast.make_unchecked_block(vec![]);
            ast.append_child(outer, unchecked)?;
            unchecked
        } else {
            outer
        };

        let result = ctx.with_trans_ctx(ast, func, SiteKind::SinglePointWrapper, |ast, ctx, tctx| {
            tctx.reset_marker(Marker::End(body), true);
            tctx.reset_marker(Marker::End(body), false);
            for (i, (param, ty)) in params.iter().enumerate() {
                let arg = tctx.user_fun_arg(name, i, param);
                ast.add_fun_param(func, &arg, stype_to_type_name(ty), ty.location(), false)?;
            }
            ast.add_fun_param(func, "", stype_to_type_name(return_type), return_type.location(), true)?;
            transpile_annotation(ast, ctx, tctx, annot)
        })?;

        let ret = ast.make_return(Some(result));
        ast.append_child(body, ret)?;
        ctx.records.add_general_instrumentation(&[func]);
        debug!(function = %implementation, "synthesized user function");
        user_fns.push(func);
    }
    Ok(user_fns)
}

fn checker_mutability(ctx: &InstrumentationContext) -> StateMutability {
    if ctx.config.changes_mutability() {
        StateMutability::NonPayable
    } else {
        StateMutability::View
    }
}

/// Checks only the contract's own invariants.
fn make_internal_invariant_checker(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    invariants: &[&AnnotationMetaData],
    contract: NodeId,
) -> Result<NodeId> {
    let name = internal_checker_name(ast.contract_name(contract)?);
    ctx.names.reserve(&name);
    let checker = ast.add_empty_function(contract, &name, Visibility::Internal, checker_mutability(ctx))?;
    ast.set_documentation(checker, "Check only the current contract's state invariants")?;

    ctx.with_trans_ctx(ast, checker, SiteKind::SinglePointWrapper, |ast, ctx, tctx| {
        insert_annotations(ast, ctx, tctx, invariants)
    })?;
    Ok(checker)
}

/// The virtual checker: calls the internal checker of the contract and of every base in
/// linearization order.
fn make_general_invariant_checker(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    annotations: &Annotations,
    contract: NodeId,
) -> Result<NodeId> {
    let utils = ctx.utils()?.contract;
    let def = ast.contract_definition(contract)?.clone();

    let direct_bases = def
        .base_contracts
        .iter()
        .filter_map(|base| base.contract)
        .filter(|base| {
            *base != utils &&
                *base != contract &&
                ctx.needs_state_invariants.contains(base) &&
                matches!(ast.contract_definition(*base), Ok(b) if b.kind == ContractKind::Contract)
        })
        .map(|base| ast.contract_name(base).map(str::to_string))
        .collect::<Result<Vec<_>>>()?;

    let overrides = match direct_bases.len() {
        0 => None,
        1 => Some(vec![]),
        _ => Some(direct_bases),
    };

    let checker = ast.add_empty_function(contract, CHECK_STATE_INVS, Visibility::Internal, checker_mutability(ctx))?;
    {
        let checker = ast.function_definition_mut(checker)?;
        checker.is_virtual = true;
        checker.overrides = overrides;
    }
    ast.set_documentation(checker, "Check the state invariant for the current contract and all its bases")?;
    let body = ast.function_definition(checker)?.body.ok_or_else(|| {
        InstrumentationError::Internal("general checker has no body".to_string())
    })?;

    for base in &def.linearized_base_contracts {
        let base_def = ast.contract_definition(*base)?;
        if *base == utils || base_def.kind == ContractKind::Interface {
            continue;
        }
        if annotations.of_kind(*base, AnnotationType::Invariant).is_empty() {
            continue;
        }
        let name = internal_checker_name(&base_def.name);
        let call = ast.make_call_to(&name, vec![]);
        let stmt = ast.make_expression_statement(call);
        ctx.records.add_general_instrumentation(&[stmt]);
        ast.append_child(body, stmt)?;
    }
    Ok(checker)
}

fn get_or_add_constructor(ast: &mut SolAst, ctx: &InstrumentationContext, contract: NodeId) -> Result<NodeId> {
    if let Some(ctor) = ast.constructor_of(contract)? {
        return Ok(ctor);
    }
    let body = ast.make_block(vec![]);
    let visibility = if ctx.config.compiler_version < semver::Version::new(0, 7, 0) {
        Visibility::Public
    } else {
        Visibility::Default
    };
    let ctor = ast.add_function(FunctionDefinition {
        visibility,
        body: Some(body),
        ..FunctionDefinition::new("", FunctionKind::Constructor)
    });
    // Constructors go after state variables and before functions.
    let first_fn = ast.functions_of(contract)?.first().copied();
    match first_fn {
        Some(first) => ast.insert_before(contract, first, ctor)?,
        None => ast.append_child(contract, ctor)?,
    }
    debug!(contract = %ast.contract_name(contract)?, "added default constructor");
    Ok(ctor)
}

/// Wrap the constructor: clear the flag first, check invariants and set the flag last.
fn instrument_constructor(ast: &mut SolAst, ctx: &mut InstrumentationContext, contract: NodeId) -> Result<()> {
    let ctor = get_or_add_constructor(ast, ctx, contract)?;
    let body = ast.function_definition(ctor)?.body.ok_or_else(|| {
        InstrumentationError::unsupported(ast, ctor, "constructor without a body")
    })?;
    wrap_constructor_body(ast, ctx, body)
}

fn wrap_constructor_body(ast: &mut SolAst, ctx: &mut InstrumentationContext, body: NodeId) -> Result<()> {
    let entry = ast.make_bool_assignment_stmt(OUT_OF_CONTRACT_FLAG, false);
    let check = call_general_checker(ast);
    let exit = ast.make_bool_assignment_stmt(OUT_OF_CONTRACT_FLAG, true);
    ctx.records.add_general_instrumentation(&[entry, check, exit]);

    ast.insert_at_beginning(body, entry)?;
    ast.append_child(body, check)?;
    ast.append_child(body, exit)
}

/// The member access a call goes through, looking past call options.
fn callee_access(ast: &SolAst, call: NodeId) -> Result<NodeId> {
    let expression = ast.function_call(call)?.expression;
    Ok(match ast.kind(expression)? {
        NodeKind::FunctionCallOptions { expression, .. } => *expression,
        _ => expression,
    })
}

/// The decoded type of the callee of `call`, if it has a function type.
fn callee_type(ast: &SolAst, call: NodeId) -> Result<Option<FunctionTypeDesc>> {
    let access = callee_access(ast, call)?;
    Ok(ast.kind(access)?.type_string().and_then(|ty| ty.parse().ok()))
}

/// Calls below `root` that leave the contract: calls to external functions and the low-level
/// `call`/`delegatecall`/`staticcall`. Calls added by instrumentation carry the missing type
/// and are skipped.
pub fn find_external_calls(ast: &SolAst, root: NodeId) -> Result<Vec<NodeId>> {
    let mut res = vec![];
    for id in ast.descendants(root) {
        let NodeKind::FunctionCall(call) = ast.kind(id)? else {
            continue;
        };
        if call.kind != FunctionCallKind::FunctionCall {
            continue;
        }

        let access = callee_access(ast, id)?;
        let Some(type_string) = ast.kind(access)?.type_string() else {
            continue;
        };
        if type_string.contains(MISSING_TYPE) {
            continue;
        }

        let NodeKind::MemberAccess { expression, member_name, .. } = ast.kind(access)? else {
            // Function-typed values and plain internal calls.
            if type_string.parse::<FunctionTypeDesc>().is_ok_and(|ty| ty.is_external()) {
                res.push(id);
            }
            continue;
        };
        let receiver_type = ast.kind(*expression)?.type_string().unwrap_or_default();
        if receiver_type.starts_with("type(") {
            // Library and `super` style calls.
            continue;
        }

        let is_low_level = receiver_type.starts_with("address") &&
            matches!(member_name.as_str(), "call" | "delegatecall" | "staticcall");
        let is_external = type_string.parse::<FunctionTypeDesc>().is_ok_and(|ty| ty.is_external());
        if is_low_level || is_external {
            res.push(id);
        }
    }
    Ok(res)
}

fn replace_external_call_sites(ast: &mut SolAst, ctx: &mut InstrumentationContext, contract: NodeId) -> Result<()> {
    for call in find_external_calls(ast, contract)? {
        let containing = ast.enclosing_function(call);
        if let Some(func) = containing {
            if matches!(
                ast.function_definition(func)?.kind,
                FunctionKind::Fallback | FunctionKind::Receive
            ) {
                continue;
            }
        }

        let Some(desc) = callee_type(ast, call)? else {
            return Err(InstrumentationError::Internal(format!("callee of {call} has no function type")));
        };
        if desc.mutability == StateMutability::Pure {
            continue;
        }

        let (wrapper, desc) = interpose_call(ast, ctx, contract, call)?;
        let body = ast.function_definition(wrapper)?.body.ok_or_else(|| {
            InstrumentationError::Internal(format!("call-site wrapper {wrapper} has no body"))
        })?;
        let stmts = ast.kind(body)?.members().map(<[NodeId]>::to_vec).unwrap_or_default();
        let call_stmt = single(stmts, "statement in call-site wrapper")?;

        // The boundary check happens even for calls that cannot re-enter with state changes.
        let check = call_general_checker(ast);
        ast.insert_at_beginning(body, check)?;
        ctx.records.add_general_instrumentation(&[check]);

        if desc.mutability.changes_state() {
            let leave = ast.make_bool_assignment_stmt(OUT_OF_CONTRACT_FLAG, true);
            let back = ast.make_bool_assignment_stmt(OUT_OF_CONTRACT_FLAG, false);
            ast.insert_before(body, call_stmt, leave)?;
            ast.append_child(body, back)?;
            ctx.records.add_general_instrumentation(&[leave, back]);
        }

        if ctx.config.changes_mutability() {
            let wrapper_def = ast.function_definition_mut(wrapper)?;
            if !wrapper_def.state_mutability.changes_state() {
                wrapper_def.state_mutability = StateMutability::NonPayable;
            }
            if let Some(func) = containing {
                let func = ast.function_definition_mut(func)?;
                if !func.state_mutability.changes_state() {
                    func.state_mutability = StateMutability::NonPayable;
                }
            }
        }
    }
    Ok(())
}

fn is_public(visibility: Visibility) -> bool {
    matches!(visibility, Visibility::Public | Visibility::Default)
}

/// Instrument `func` with its own annotations, plus enter/exit markers when it is an entry
/// point of a contract that checks state invariants. Returns the stub.
pub fn instrument_function(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    annotations: &[&AnnotationMetaData],
    func: NodeId,
    needs_contract_invariants: bool,
) -> Result<NodeId> {
    for annot in annotations {
        internal_ensure!(annot.is_property(), "non-property annotation {} on a function", annot.id);
    }
    let original = ast.function_definition(func)?.clone();
    debug!(function = %original.name, annotations = annotations.len(), "instrumenting function");

    let stub = interpose(ast, ctx, func)?;
    ctx.with_trans_ctx(ast, stub, SiteKind::TwoPointWrapper, |ast, ctx, tctx| {
        insert_annotations(ast, ctx, tctx, annotations)?;

        if !annotations.is_empty() {
            let stub_def = ast.function_definition_mut(stub)?;
            stub_def.state_mutability = match (ctx.config.assertion_mode, stub_def.state_mutability) {
                (AssertionMode::Log, StateMutability::View | StateMutability::Pure) => StateMutability::NonPayable,
                (AssertionMode::Mstore, StateMutability::Pure) => StateMutability::View,
                (_, other) => other,
            };
        }

        if !needs_contract_invariants {
            return Ok(());
        }
        if original.kind == FunctionKind::Constructor {
            let body = ast.function_definition(stub)?.body.ok_or_else(|| {
                InstrumentationError::unsupported(ast, stub, "constructor without a body")
            })?;
            return wrap_constructor_body(ast, ctx, body);
        }

        let entry_point = matches!(original.visibility, Visibility::External) || is_public(original.visibility);
        if entry_point && original.state_mutability.changes_state() && original.kind != FunctionKind::Fallback {
            insert_enter_marker(ast, ctx, tctx, stub)?;
            insert_exit_marker(ast, ctx, tctx, stub)?;
        }
        Ok(())
    })?;
    Ok(stub)
}

fn stub_body(ast: &SolAst, stub: NodeId) -> Result<NodeId> {
    ast.function_definition(stub)?
        .body
        .ok_or_else(|| InstrumentationError::Internal(format!("stub {stub} has no body")))
}

/// external: clear the flag. public: remember the flag, then clear it.
fn insert_enter_marker(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    tctx: &mut TranspilingContext,
    stub: NodeId,
) -> Result<()> {
    let def = ast.function_definition(stub)?;
    let visibility = def.visibility;
    let body = stub_body(ast, stub)?;

    let mut stmts = vec![];
    if is_public(visibility) {
        if !tctx.has_binding(CHECK_INVS_AT_END) {
            tctx.add_binding(CHECK_INVS_AT_END, TypeName::elementary("bool"))?;
        }
        let saved = tctx.ref_binding(ast, CHECK_INVS_AT_END)?;
        let flag = flag_ident(ast);
        let store = ast.make_assignment(saved, flag);
        stmts.push(ast.make_expression_statement(store));
    }
    stmts.push(ast.make_bool_assignment_stmt(OUT_OF_CONTRACT_FLAG, false));

    ctx.records.add_general_instrumentation(&stmts);
    for stmt in stmts.into_iter().rev() {
        ast.insert_at_beginning(body, stmt)?;
    }
    Ok(())
}

/// external: check invariants, set the flag. public: check invariants only if the call came
/// from outside, then restore the flag.
fn insert_exit_marker(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    tctx: &mut TranspilingContext,
    stub: NodeId,
) -> Result<()> {
    let visibility = ast.function_definition(stub)?.visibility;
    let body = stub_body(ast, stub)?;

    let mut stmts = vec![];
    let check = call_general_checker(ast);
    if is_public(visibility) {
        let saved = tctx.ref_binding(ast, CHECK_INVS_AT_END)?;
        stmts.push(ast.make_if(saved, check, None));
        let lhs = flag_ident(ast);
        let saved = tctx.ref_binding(ast, CHECK_INVS_AT_END)?;
        let restore = ast.make_assignment(lhs, saved);
        stmts.push(ast.make_expression_statement(restore));
    } else {
        stmts.push(check);
        stmts.push(ast.make_bool_assignment_stmt(OUT_OF_CONTRACT_FLAG, true));
    }

    ctx.records.add_general_instrumentation(&stmts);
    for stmt in stmts {
        ast.append_child(body, stmt)?;
    }
    Ok(())
}

/// The helper summing an integer array of type `arr_ty` stored at `loc`, created on first use.
/// Returns its name.
pub fn make_array_sum_fun(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    contract: NodeId,
    arr_ty: &SType,
    loc: DataLocation,
) -> Result<String> {
    let SType::Array { elem, .. } = arr_ty else {
        return Err(InstrumentationError::Internal(format!("cannot sum over {}", arr_ty.type_name())));
    };
    let SType::Int { signed, .. } = elem.as_ref() else {
        return Err(InstrumentationError::Internal(format!(
            "array sum expects a numeric array, not {}",
            arr_ty.type_name()
        )));
    };

    let name = format!("sum_arr_{}_{loc}", arr_ty.desc());
    let free = ctx.config.supports_free_functions();
    let container = if free { ctx.utils()?.unit } else { contract };
    if free {
        let unit = ast.enclosing_unit(contract).ok_or_else(|| {
            InstrumentationError::Internal(format!("contract {contract} is outside of any unit"))
        })?;
        ctx.needs_utils_import(unit);
    }
    if ctx.has_array_sum_fun(ast, container, &name) {
        return Ok(name);
    }
    ctx.names.reserve(&name);

    let mutability = if loc == DataLocation::Storage { StateMutability::View } else { StateMutability::Pure };
    let visibility = if free { Visibility::Default } else { Visibility::Internal };
    let func = ast.add_empty_function(container, &name, visibility, mutability)?;
    ast.add_fun_param(func, "arr", stype_to_type_name(arr_ty), loc, false)?;
    let sum_ty = if *signed { "int256" } else { "uint256" };
    ast.add_fun_param(func, "ret", TypeName::elementary(sum_ty), DataLocation::Default, true)?;

    let idx = ast.make_param("idx", TypeName::elementary("uint256"), DataLocation::Default);
    let zero = ast.make_number(0);
    let init = ast.make_variable_declaration_statement(vec![Some(idx)], Some(zero));

    let idx_ref = ast.make_identifier("idx", "uint256");
    let arr_ref = ast.make_identifier("arr", MISSING_TYPE);
    let len = ast.make_member_access(arr_ref, "length", "uint256");
    let condition = ast.make_binary("<", idx_ref, len, "bool");

    let idx_ref = ast.make_identifier("idx", "uint256");
    let step = ast.add(
        NodeKind::UnaryOperation {
            operator: "++".to_string(),
            prefix: false,
            sub: idx_ref,
            type_string: "uint256".to_string(),
        },
        None,
    );
    let step = ast.make_expression_statement(step);

    let ret_ref = ast.make_identifier("ret", sum_ty);
    let arr_ref = ast.make_identifier("arr", MISSING_TYPE);
    let idx_ref = ast.make_identifier("idx", "uint256");
    let elem_ref = ast.make_index_access(arr_ref, idx_ref, MISSING_TYPE);
    let add = ast.add(
        NodeKind::Assignment {
            operator: "+=".to_string(),
            lhs: ret_ref,
            rhs: elem_ref,
            type_string: sum_ty.to_string(),
        },
        None,
    );
    let add = ast.make_expression_statement(add);
    let loop_body = ast.make_block(vec![add]);

    let for_stmt = ast.add(
        NodeKind::ForStatement {
            initialization: Some(init),
            condition: Some(condition),
            loop_expression: Some(step),
            body: loop_body,
        },
        None,
    );

    let body = stub_body(ast, func)?;
    if ctx.config.needs_unchecked_blocks() {
        let unchecked = ast.make_unchecked_block(vec![for_stmt]);
        ast.append_child(body, unchecked)?;
    } else {
        ast.append_child(body, for_stmt)?;
    }

    ctx.add_array_sum_fun(container, &name);
    ctx.records.add_general_instrumentation(&[func]);
    debug!(helper = %name, "synthesized array sum helper");
    Ok(name)
}

/// Make sure `stmt` sits directly in a block, wrapping single-statement bodies of control
/// statements. Returns the block.
fn ensure_stmt_in_block(ast: &mut SolAst, stmt: NodeId) -> Result<NodeId> {
    let parent = ast
        .parent(stmt)
        .ok_or_else(|| InstrumentationError::Internal(format!("statement {stmt} is detached")))?;
    match ast.kind(parent)? {
        NodeKind::Block { .. } | NodeKind::UncheckedBlock { .. } => Ok(parent),
        NodeKind::IfStatement { .. } | NodeKind::WhileStatement { .. } | NodeKind::DoWhileStatement { .. } => {
            ast.wrap_in_block(parent, stmt)
        }
        NodeKind::ForStatement { body, .. } if *body == stmt => ast.wrap_in_block(parent, stmt),
        NodeKind::ForStatement { .. } => Err(InstrumentationError::unsupported(
            ast,
            stmt,
            "cannot instrument the header of a for loop",
        )),
        other => Err(InstrumentationError::Internal(format!(
            "statement {stmt} inside a {}",
            other.name()
        ))),
    }
}

/// Instrument one annotated statement: single-point checks in a block right before it,
/// postconditions in a block right after it.
pub fn instrument_statement(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    annotations: &[&AnnotationMetaData],
    stmt: NodeId,
) -> Result<()> {
    let mut single_point = vec![];
    let mut if_succeeds = vec![];
    for annot in annotations {
        match annot.kind {
            kind if kind.is_single_point() => single_point.push(*annot),
            AnnotationType::IfSucceeds => if_succeeds.push(*annot),
            _ => {
                return Err(InstrumentationError::Internal(format!(
                    "unexpected annotation on statement: {}",
                    annot.original
                )))
            }
        }
    }
    debug!(statement = %stmt, before = single_point.len(), after = if_succeeds.len(), "instrumenting statement");

    let container = ensure_stmt_in_block(ast, stmt)?;
    let before = ast.make_block(vec![]);
    ast.insert_before(container, stmt, before)?;
    ctx.records.add_general_instrumentation(&[before]);

    let func = ast
        .enclosing_function(stmt)
        .ok_or_else(|| InstrumentationError::Internal(format!("orphan statement {stmt}")))?;

    ctx.with_trans_ctx(ast, func, SiteKind::Custom, |ast, ctx, tctx| {
        tctx.reset_marker(Marker::End(before), true);
        tctx.reset_marker(Marker::End(before), false);
        insert_annotations(ast, ctx, tctx, &single_point)?;

        if !if_succeeds.is_empty() {
            let after = ast.make_block(vec![]);
            ast.insert_after(container, stmt, after)?;
            ctx.records.add_general_instrumentation(&[after]);
            tctx.reset_marker(Marker::End(before), true);
            tctx.reset_marker(Marker::End(after), false);
            insert_annotations(ast, ctx, tctx, &if_succeeds)?;
        }
        Ok(())
    })?;

    ast.node_mut(stmt)?.documentation = None;
    Ok(())
}

/// Make every contract that uses the utility contract inherit it, and import its unit.
pub fn add_utils_bases(ast: &mut SolAst, ctx: &mut InstrumentationContext) -> Result<()> {
    let utils = ctx.utils()?;
    let mut users = ctx.contracts_needing_utils().to_vec();
    users.sort_by_key(|c| ast.contract_definition(*c).map(|d| d.linearized_base_contracts.len()).unwrap_or(0));

    let mut given = vec![];
    let mut imported = vec![];
    for contract in users {
        let def = ast.contract_definition(contract)?;
        if def.kind != ContractKind::Contract {
            continue;
        }
        let inherits = def.linearized_base_contracts.iter().skip(1).any(|base| given.contains(base));
        given.push(contract);
        if inherits {
            continue;
        }

        let def = ast.contract_definition_mut(contract)?;
        def.base_contracts.insert(
            0,
            InheritanceSpecifier { name: UTILS_CONTRACT.to_string(), contract: Some(utils.contract), arguments: vec![] },
        );

        if let Some(unit) = ast.enclosing_unit(contract) {
            if !imported.contains(&unit) {
                imported.push(unit);
                add_utils_import(ast, ctx, unit)?;
            }
        }
    }

    // Free helpers live in the utility unit too.
    for unit in ctx.units_needing_utils_import().to_vec() {
        if unit != utils.unit && !imported.contains(&unit) {
            imported.push(unit);
            add_utils_import(ast, ctx, unit)?;
        }
    }

    // Keep linearizations in sync: the utility contract is the most basic contract of all.
    for contract in ast.contracts() {
        let def = ast.contract_definition_mut(contract)?;
        if contract != utils.contract &&
            def.linearized_base_contracts.iter().any(|base| given.contains(base)) &&
            !def.linearized_base_contracts.contains(&utils.contract)
        {
            def.linearized_base_contracts.push(utils.contract);
        }
    }
    Ok(())
}

fn add_utils_import(ast: &mut SolAst, ctx: &mut InstrumentationContext, unit: NodeId) -> Result<()> {
    let import = ast.make_import(&ctx.config.utils_path);
    let last_pragma = ast
        .source_unit(unit)?
        .nodes
        .iter()
        .copied()
        .filter(|id| matches!(ast.kind(*id), Ok(NodeKind::PragmaDirective { .. })))
        .last();
    match last_pragma {
        Some(pragma) => ast.insert_after(unit, pragma, import)?,
        None => ast.insert_at_beginning(unit, import)?,
    }
    ctx.records.add_general_instrumentation(&[import]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_pattern() {
        assert_eq!(
            bit_pattern(0x2a),
            format!("0x{}002a", "cafe".repeat(15))
        );
        assert_eq!(bit_pattern(0x2a | MSTORE_ID_LIMIT), format!("0x{}102a", "cafe".repeat(15)));
        assert_eq!(bit_pattern(4095).len(), 66);
    }
}
