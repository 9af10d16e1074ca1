//! Function and call-site interposition.
//!
//! `interpose` renames a function and puts a stub with the original signature in its place.
//! `interpose_call` routes one external call through a private wrapper. In both cases the
//! generated body is exactly one statement, the call to what was interposed.

use scribe_spec_lang::DataLocation;

use crate::{
    ast::{
        types::{parse_type_name, FunctionTypeDesc, ParamDesc},
        FunctionDefinition, FunctionKind, NodeId, NodeKind, SolAst, StateMutability, TypeName,
        Visibility, MISSING_TYPE,
    },
    context::InstrumentationContext,
    error::{InstrumentationError, Result},
};

/// Name of the renamed original of `func` in `contract`.
pub fn original_name(contract: &str, func: &FunctionDefinition) -> String {
    let name = match func.kind {
        FunctionKind::Fallback => "fallback",
        FunctionKind::Receive => "receive",
        _ => func.name.as_str(),
    };
    format!("_original_{contract}_{name}")
}

/// `(a, b) = rhs;`, `a = rhs;` or `rhs;` depending on the number of return names.
fn assign_returns(ast: &mut SolAst, returns: &[String], rhs: NodeId) -> NodeId {
    let expr = match returns {
        [] => rhs,
        [single] => {
            let lhs = ast.make_identifier(single, MISSING_TYPE);
            ast.make_assignment(lhs, rhs)
        }
        many => {
            let components = many.iter().map(|name| Some(ast.make_identifier(name, MISSING_TYPE))).collect();
            let lhs = ast.make_tuple(components);
            ast.make_assignment(lhs, rhs)
        }
    };
    ast.make_expression_statement(expr)
}

/// Interpose on `func`, returning the stub. Constructors are their own stub.
pub fn interpose(ast: &mut SolAst, ctx: &mut InstrumentationContext, func: NodeId) -> Result<NodeId> {
    let def = ast.function_definition(func)?.clone();
    if def.kind == FunctionKind::Constructor {
        return Ok(func);
    }
    if def.body.is_none() {
        return Err(InstrumentationError::unsupported(
            ast,
            func,
            "cannot instrument a function without a body",
        ));
    }
    let contract = ast.enclosing_contract(func).ok_or_else(|| {
        InstrumentationError::unsupported(ast, func, "free functions cannot be instrumented")
    })?;
    let contract_name = ast.contract_name(contract)?.to_string();

    let mut params = vec![];
    let mut args = vec![];
    for (i, param) in def.parameters.iter().enumerate() {
        let copy = ast.deep_copy(*param)?;
        let decl = ast.variable_declaration_mut(copy)?;
        if decl.name.is_empty() {
            decl.name = format!("_arg{i}");
        }
        let name = decl.name.clone();
        args.push(ast.make_identifier(&name, MISSING_TYPE));
        params.push(copy);
    }

    let mut returns = vec![];
    let mut ret_names = vec![];
    for (i, ret) in def.return_parameters.iter().enumerate() {
        let copy = ast.deep_copy(*ret)?;
        let name = format!("RET_{i}");
        ast.variable_declaration_mut(copy)?.name = name.clone();
        ret_names.push(name);
        returns.push(copy);
    }

    let renamed = original_name(&contract_name, &def);
    ctx.names.reserve(&renamed);
    let callee = ast.make_identifier(&renamed, MISSING_TYPE);
    let call = ast.make_call(callee, args, MISSING_TYPE);
    let call_stmt = assign_returns(ast, &ret_names, call);
    let body = ast.make_block(vec![call_stmt]);

    let stub = ast.add_function(FunctionDefinition {
        name: def.name.clone(),
        kind: def.kind,
        visibility: def.visibility,
        state_mutability: def.state_mutability,
        is_virtual: def.is_virtual,
        overrides: def.overrides.clone(),
        parameters: params,
        return_parameters: returns,
        modifiers: def.modifiers.clone(),
        body: Some(body),
    });
    ast.insert_after(contract, func, stub)?;

    {
        let original = ast.function_definition_mut(func)?;
        original.name = renamed;
        original.kind = FunctionKind::Function;
        original.visibility = Visibility::Private;
        original.is_virtual = false;
        original.overrides = None;
        original.modifiers.clear();
        // Private functions cannot be payable.
        if original.state_mutability == StateMutability::Payable {
            original.state_mutability = StateMutability::NonPayable;
        }
    }

    ctx.records.add_general_instrumentation(&[call_stmt]);
    debug!(function = %def.name, contract = %contract_name, "interposed function");
    Ok(stub)
}

/// The receiver, callee member and call options of an external call.
struct CallShape {
    receiver: NodeId,
    member: String,
    callee_type: String,
    options: Vec<(String, NodeId)>,
}

fn call_shape(ast: &SolAst, call: NodeId) -> Result<CallShape> {
    let expression = ast.function_call(call)?.expression;
    let (access, options) = match ast.kind(expression)? {
        NodeKind::FunctionCallOptions { expression, names, options } => {
            (*expression, names.iter().cloned().zip(options.iter().copied()).collect())
        }
        _ => (expression, vec![]),
    };
    match ast.kind(access)? {
        NodeKind::MemberAccess { expression, member_name, type_string, .. } => Ok(CallShape {
            receiver: *expression,
            member: member_name.clone(),
            callee_type: type_string.clone(),
            options,
        }),
        _ => Err(InstrumentationError::unsupported(
            ast,
            call,
            "external calls through function-typed values are not supported",
        )),
    }
}

fn location_for_param(param: &ParamDesc) -> DataLocation {
    match param.location {
        DataLocation::Default | DataLocation::Calldata if !param.type_name.is_value_type() => {
            DataLocation::Memory
        }
        loc => loc,
    }
}

/// Route the external call `call` (inside `contract`) through a fresh private wrapper. The call
/// site is rewritten to call the wrapper. Returns the wrapper and the callee's decoded type.
pub fn interpose_call(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    contract: NodeId,
    call: NodeId,
) -> Result<(NodeId, FunctionTypeDesc)> {
    let shape = call_shape(ast, call)?;
    let callee_type: FunctionTypeDesc = shape.callee_type.parse()?;
    let receiver_type = ast
        .kind(shape.receiver)?
        .type_string()
        .map(parse_type_name)
        .filter(|ty| !matches!(ty, TypeName::Elementary(name) if name == MISSING_TYPE))
        .ok_or_else(|| InstrumentationError::unsupported(ast, call, "receiver of unknown type"))?;

    let name = ctx.names.fresh("_callsite_", false);

    let mut params = vec![ast.make_param("receiver", receiver_type, DataLocation::Default)];
    let mut option_names = vec![];
    for (option, _) in &shape.options {
        if !matches!(option.as_str(), "value" | "gas") {
            return Err(InstrumentationError::unsupported(
                ast,
                call,
                format!("unsupported call option `{option}`"),
            ));
        }
        params.push(ast.make_param(
            &format!("_{option}"),
            TypeName::elementary("uint256"),
            DataLocation::Default,
        ));
        option_names.push(option.clone());
    }
    let mut arg_names = vec![];
    for (i, param) in callee_type.params.iter().enumerate() {
        let arg = format!("arg{i}");
        params.push(ast.make_param(&arg, param.type_name.clone(), location_for_param(param)));
        arg_names.push(arg);
    }
    let mut ret_names = vec![];
    let mut returns = vec![];
    for (i, ret) in callee_type.returns.iter().enumerate() {
        let ret_name = format!("ret_{i}");
        returns.push(ast.make_param(&ret_name, ret.type_name.clone(), location_for_param(ret)));
        ret_names.push(ret_name);
    }

    // receiver.member{opts}(args) in the wrapper.
    let receiver = ast.make_identifier("receiver", MISSING_TYPE);
    let mut callee = ast.make_member_access(receiver, &shape.member, MISSING_TYPE);
    if !option_names.is_empty() {
        let values =
            option_names.iter().map(|option| ast.make_identifier(&format!("_{option}"), MISSING_TYPE)).collect();
        callee = ast.make_call_options(callee, option_names.clone(), values);
    }
    let args = arg_names.iter().map(|arg| ast.make_identifier(arg, MISSING_TYPE)).collect();
    let inner = ast.make_call(callee, args, MISSING_TYPE);
    let call_stmt = assign_returns(ast, &ret_names, inner);
    let body = ast.make_block(vec![call_stmt]);

    let mutability = match callee_type.mutability {
        StateMutability::Payable => StateMutability::NonPayable,
        other => other,
    };
    let wrapper = ast.add_function(FunctionDefinition {
        visibility: Visibility::Private,
        state_mutability: mutability,
        parameters: params,
        return_parameters: returns,
        body: Some(body),
        ..FunctionDefinition::new(name.clone(), FunctionKind::Function)
    });
    ast.append_child(contract, wrapper)?;

    // Rewrite the call site: `_callsite_<n>(receiver, opts.., args..)`.
    let original = ast.function_call(call)?.clone();
    let mut new_args = vec![shape.receiver];
    new_args.extend(shape.options.iter().map(|(_, value)| *value));
    new_args.extend(original.arguments.iter().copied());
    let wrapper_ref = ast.make_identifier(&name, MISSING_TYPE);
    let new_call = ast.make_call(wrapper_ref, new_args, &original.type_string);
    let call_src = ast.node(call)?.src;
    ast.node_mut(new_call)?.src = call_src;

    let parent = ast.parent(call).ok_or_else(|| {
        InstrumentationError::Internal(format!("call site {call} is detached"))
    })?;
    ast.replace_child(parent, call, new_call)?;

    ctx.records.add_general_instrumentation(&[call_stmt, new_call]);
    trace!(wrapper = %name, member = %shape.member, "interposed call site");
    Ok((wrapper, callee_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{printer::print_units, ContractKind, VariableDeclaration},
        config::InstrumentationConfig,
        context::NameGenerator,
    };

    fn contract_with_fn(ast: &mut SolAst) -> (NodeId, NodeId, NodeId) {
        let c = ast.make_contract("C", ContractKind::Contract, &[]);
        let f = ast.add_empty_function(c, "f", Visibility::Public, StateMutability::NonPayable).unwrap();
        ast.add_fun_param(f, "a", TypeName::elementary("uint256"), DataLocation::Default, false)
            .unwrap();
        ast.add_fun_param(f, "", TypeName::elementary("bytes"), DataLocation::Memory, false)
            .unwrap();
        ast.add_fun_param(f, "", TypeName::elementary("uint256"), DataLocation::Default, true)
            .unwrap();
        let m = ast.make_modifier_invocation("onlyOwner", vec![]);
        ast.function_definition_mut(f).unwrap().modifiers.push(m);
        ast.function_definition_mut(f).unwrap().is_virtual = true;
        let unit = ast.add_unit("c.sol", 0, vec![c]);
        (c, f, unit)
    }

    #[test]
    fn test_interpose_function() {
        let mut ast = SolAst::new();
        let (c, f, unit) = contract_with_fn(&mut ast);
        let mut ctx = InstrumentationContext::new(InstrumentationConfig::default(), NameGenerator::from_ast(&ast));

        let stub = interpose(&mut ast, &mut ctx, f).unwrap();
        assert_eq!(ast.contract_definition(c).unwrap().nodes, vec![f, stub]);

        let source = print_units(&ast, &[unit]).unwrap().units.remove(0).source;
        assert!(source.contains("function _original_C_f(uint256 a, bytes memory) private returns (uint256)"));
        assert!(source.contains(
            "function f(uint256 a, bytes memory _arg1) public virtual onlyOwner returns (uint256 RET_0) {\n        RET_0 = _original_C_f(a, _arg1);\n    }"
        ));
    }

    #[test]
    fn test_interpose_call_with_value() {
        let mut ast = SolAst::new();
        let c = ast.make_contract("C", ContractKind::Contract, &[]);
        let f = ast.add_empty_function(c, "pay", Visibility::Public, StateMutability::NonPayable).unwrap();
        let token = ast.make_identifier("token", "contract IToken");
        let access = ast.make_member_access(
            token,
            "deposit",
            "function (address) payable external returns (bool)",
        );
        let one = ast.make_number(1);
        let opts = ast.make_call_options(access, vec!["value".into()], vec![one]);
        let to = ast.make_identifier("to", "address");
        let call = ast.make_call(opts, vec![to], "bool");
        let stmt = ast.make_expression_statement(call);
        let body = ast.function_definition(f).unwrap().body.unwrap();
        ast.append_child(body, stmt).unwrap();
        let state = ast.make_variable(VariableDeclaration {
            state_variable: true,
            ..VariableDeclaration::new("token", TypeName::UserDefined("IToken".into()), DataLocation::Default)
        });
        ast.insert_at_beginning(c, state).unwrap();
        let unit = ast.add_unit("c.sol", 0, vec![c]);

        let mut ctx = InstrumentationContext::new(InstrumentationConfig::default(), NameGenerator::from_ast(&ast));
        let (wrapper, desc) = interpose_call(&mut ast, &mut ctx, c, call).unwrap();
        assert_eq!(desc.mutability, StateMutability::Payable);
        assert_eq!(ast.function_definition(wrapper).unwrap().state_mutability, StateMutability::NonPayable);

        let source = print_units(&ast, &[unit]).unwrap().units.remove(0).source;
        assert!(source.contains("_callsite_0(token, 1, to);"));
        assert!(source.contains(
            "function _callsite_0(IToken receiver, uint256 _value, address arg0) private returns (bool ret_0) {\n        ret_0 = receiver.deposit{value: _value}(arg0);\n    }"
        ));
    }
}
