mod common;

use common::{function_named, pos, printed, source, Program};
use scribe_instrumenter::{
    ast::{ContractKind, NodeId, NodeKind, SolAst, StateMutability, Visibility},
    instrument::HIT_EVENT_OFFSET,
    instrument, InstrumentationConfig, InstrumentationResult,
};
use scribe_spec_lang::{AnnotationType, BinaryOp, DataLocation, NodeBuilder, SType, SrcRange};

/// `contract C { uint256 x; uint256[] arr; function inc() public { x += 1; } }`
fn counter(p: &mut Program) -> (NodeId, NodeId) {
    let c = p.contract("C", ContractKind::Contract, &[]);
    p.state_var(c, "x", "uint256");
    p.state_var(c, "arr", "uint256[]");
    let inc = p.increment("x");
    let f = p.function(c, "inc", Visibility::Public, StateMutability::NonPayable, vec![inc]);
    p.unit("c.sol", vec![c]);
    (c, f)
}

fn fragment<'a>(res: &'a InstrumentationResult, range: &str) -> &'a str {
    let range: SrcRange = range.parse().unwrap();
    range.fragment(res.sources.source(range.file_index).unwrap()).unwrap()
}

#[test]
fn let_bindings_are_visible_to_later_annotations() {
    let mut p = Program::new();
    let (c, f) = counter(&mut p);

    let mut b = NodeBuilder::new(&mut p.ids);
    let x = b.id("x").typed(SType::uint256()).at(SrcRange::new(305, 1, 0));
    let binding = b.let_annotation("a", x).at(SrcRange::new(300, 12, 0));
    let let_id = p.annotations.push(f, binding, "#let a := x;", "").unwrap();

    let mut b = NodeBuilder::new(&mut p.ids);
    let x = b.id("x").typed(SType::uint256());
    let a = b.id("a").typed(SType::uint256());
    let grows = b.binary(x, BinaryOp::Gt, a).at(SrcRange::new(320, 5, 0));
    p.annotate(f, AnnotationType::IfSucceeds, grows, "");

    let res = instrument(&mut p.ast, &p.annotations, InstrumentationConfig::default()).unwrap();
    let stub = printed(&res, function_named(&p.ast, c, "inc"));
    let steps = ["_original_C_inc();", "_v.let_a_0 = x;", "if (!(x > _v.let_a_0)) {"];
    let offsets: Vec<usize> = steps.iter().map(|step| pos(stub, step)).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{stub}");
    assert!(source(&res, "c.sol").contains("struct vars0 {\n        uint256 let_a_0;\n    }"));

    // The binding is general instrumentation, not a property.
    let metadata = &res.metadata;
    assert_eq!(metadata.property_map.len(), 1);
    assert!(metadata.property_map.iter().all(|property| property.id != let_id));
    assert!(metadata.other_instrumentation.iter().any(|r| fragment(&res, r) == "_v.let_a_0 = x;"));
}

#[test]
fn try_sets_the_sentinel_before_the_original() {
    let mut p = Program::new();
    let (c, f) = counter(&mut p);
    let guess = p.positive("x");
    p.annotate(f, AnnotationType::Try, guess, "");

    let res = instrument(&mut p.ast, &p.annotations, InstrumentationConfig::default()).unwrap();
    let stub = printed(&res, function_named(&p.ast, c, "inc"));
    assert!(stub.contains("if (x > 0)\n            _v.__mstore_scratch__ = 42;"), "{stub}");
    assert!(pos(stub, "if (x > 0)") < pos(stub, "_original_C_inc();"));
    assert!(!stub.contains("AssertionFailed"));

    let property = &res.metadata.property_map[0];
    assert_eq!(property.target, "function");
    let checks: Vec<&str> = property.check_ranges.iter().map(|r| fragment(&res, r)).collect();
    assert_eq!(checks, ["x > 0"]);
    assert!(property.assertion_ranges.is_empty());
}

#[test]
fn user_functions_are_resolved_through_the_registry() {
    let mut p = Program::new();
    let (c, f) = counter(&mut p);

    // #define plus_one(uint256 v) uint256 = v + 1;
    let mut b = NodeBuilder::new(&mut p.ids);
    let v = b.id("v").typed(SType::uint256());
    let one = b.number(1);
    let body = b.binary(v, BinaryOp::Add, one).at(SrcRange::new(420, 5, 0));
    let define = b
        .user_function("plus_one", vec![("v".to_string(), SType::uint256())], SType::uint256(), body)
        .at(SrcRange::new(400, 40, 0));
    p.annotations.push(c, define, "#define plus_one(uint256 v) uint256 = v + 1;", "").unwrap();

    let mut b = NodeBuilder::new(&mut p.ids);
    let callee = b.id("plus_one");
    let x = b.id("x").typed(SType::uint256());
    let call = b.call(callee, vec![x]);
    let one = b.number(1);
    let post = b.binary(call, BinaryOp::Gt, one).at(SrcRange::new(450, 15, 0));
    p.annotate(f, AnnotationType::IfSucceeds, post, "");

    let res = instrument(&mut p.ast, &p.annotations, InstrumentationConfig::default()).unwrap();
    let implementation = printed(&res, function_named(&p.ast, c, "plus_one"));
    assert_eq!(
        implementation,
        "function plus_one(uint256 v_0) internal view returns (uint256) {\n        unchecked {\n            \
         return v_0 + 1;\n        }\n    }"
    );

    let stub = printed(&res, function_named(&p.ast, c, "inc"));
    assert!(stub.contains("if (!(plus_one(x) > 1)) {"), "{stub}");
    // Definitions are not properties.
    assert_eq!(res.metadata.property_map.len(), 1);
    assert_eq!(res.metadata.property_map[0].id, 1);
}

/// `#require sum(arr) > 0;` over the storage array `arr`.
fn require_positive_sum(p: &mut Program, f: NodeId) {
    let mut b = NodeBuilder::new(&mut p.ids);
    let callee = b.id("sum");
    let arr = b.id("arr").typed(SType::Array {
        elem: Box::new(SType::uint256()),
        size: None,
        location: DataLocation::Storage,
    });
    let sum = b.call(callee, vec![arr]);
    let zero = b.number(0);
    let positive = b.binary(sum, BinaryOp::Gt, zero).at(SrcRange::new(500, 12, 0));
    p.annotate(f, AnnotationType::Require, positive, "");
}

#[test]
fn array_sums_share_one_free_helper() {
    let mut p = Program::new();
    let (_, f) = counter(&mut p);
    require_positive_sum(&mut p, f);
    require_positive_sum(&mut p, f);

    let res = instrument(&mut p.ast, &p.annotations, InstrumentationConfig::default()).unwrap();
    let utils = source(&res, "__scribble_ReentrancyUtils.sol");
    assert_eq!(utils.matches("function sum_arr_uint256_arr_storage(").count(), 1, "{utils}");
    assert!(utils.contains(
        "function sum_arr_uint256_arr_storage(uint256[] storage arr) view returns (uint256 ret) {"
    ));

    // The helper lives in another unit, which the caller has to import.
    let src = source(&res, "c.sol");
    assert!(src.starts_with("pragma solidity ^0.8.0;\nimport \"__scribble_ReentrancyUtils.sol\";\n"), "{src}");
    assert!(!src.contains("function sum_arr_"));
    assert_eq!(src.matches("require(sum_arr_uint256_arr_storage(arr) > 0);").count(), 2);
}

#[test]
fn array_sums_stay_in_the_contract_without_free_functions() {
    let mut p = Program::new();
    let (c, f) = counter(&mut p);
    require_positive_sum(&mut p, f);
    require_positive_sum(&mut p, f);

    let config = InstrumentationConfig {
        compiler_version: semver::Version::new(0, 7, 0),
        ..Default::default()
    };
    let res = instrument(&mut p.ast, &p.annotations, config).unwrap();
    let helper = printed(&res, function_named(&p.ast, c, "sum_arr_uint256_arr_storage"));
    assert!(helper.starts_with(
        "function sum_arr_uint256_arr_storage(uint256[] storage arr) internal view returns (uint256 ret) {"
    ));
    assert!(!helper.contains("unchecked"));

    let src = source(&res, "c.sol");
    assert_eq!(src.matches("function sum_arr_uint256_arr_storage(").count(), 1);
    assert!(!source(&res, "__scribble_ReentrancyUtils.sol").contains("sum_arr_"));
}

#[test]
fn debug_events_carry_the_read_values() {
    let mut p = Program::new();
    let (c, f) = counter(&mut p);
    let mut b = NodeBuilder::new(&mut p.ids);
    let x = b.id("x").typed(SType::uint256()).at(SrcRange::new(600, 1, 0));
    let zero = b.number(0);
    let positive = b.binary(x, BinaryOp::Gt, zero).at(SrcRange::new(600, 5, 0));
    p.annotate(f, AnnotationType::IfSucceeds, positive, "");

    let config = InstrumentationConfig { debug_events: true, ..Default::default() };
    let res = instrument(&mut p.ast, &p.annotations, config).unwrap();
    let stub = printed(&res, function_named(&p.ast, c, "inc"));
    let steps = [
        "if (!(x > 0)) {",
        "emit AssertionFailed(\"0: #if_succeeds (x > 0);\");",
        "emit AssertionFailedData(0, abi.encode(x));",
    ];
    let offsets: Vec<usize> = steps.iter().map(|step| pos(stub, step)).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{stub}");

    let property = &res.metadata.property_map[0];
    assert_eq!(property.debug_event_encoding, [(vec!["600:1:0".to_string()], "uint256".to_string())]);
    assert!(property.instrumentation_ranges.iter().any(|r| fragment(&res, r).starts_with("emit AssertionFailedData(")));
}

#[test]
fn add_assert_aborts_after_reporting() {
    let mut p = Program::new();
    let (c, f) = counter(&mut p);
    let post = p.positive("x");
    p.annotate(f, AnnotationType::IfSucceeds, post, "");

    let config = InstrumentationConfig { add_assert: true, ..Default::default() };
    let res = instrument(&mut p.ast, &p.annotations, config).unwrap();
    let stub = printed(&res, function_named(&p.ast, c, "inc"));
    assert!(stub.contains(
        "if (!(x > 0)) {\n            emit AssertionFailed(\"0: #if_succeeds (x > 0);\");\n            \
         assert(false);\n        }"
    ), "{stub}");
}

fn event_named(ast: &SolAst, event: &str) -> NodeId {
    ast.units()
        .iter()
        .flat_map(|unit| ast.descendants(*unit))
        .find(|id| matches!(ast.kind(*id), Ok(NodeKind::EventDefinition { name, .. }) if name == event))
        .unwrap_or_else(|| panic!("no event {event}"))
}

#[test]
fn coverage_hits_reference_a_shifted_event_id() {
    let mut p = Program::new();
    let (c, f) = counter(&mut p);
    let post = p.positive("x");
    p.annotate(f, AnnotationType::IfSucceeds, post, "");

    let config = InstrumentationConfig { cov_assertions: true, ..Default::default() };
    let res = instrument(&mut p.ast, &p.annotations, config).unwrap();
    let stub_id = function_named(&p.ast, c, "inc");
    let stub = printed(&res, stub_id);
    let hit = pos(stub, "emit AssertionFailed(\"HIT: 0: #if_succeeds (x > 0);\");");
    assert!(pos(stub, "_original_C_inc();") < hit);
    assert!(hit < pos(stub, "if (!(x > 0)) {"));

    // Both emits name `AssertionFailed`; only the failure resolves to the event itself.
    let event = event_named(&p.ast, "AssertionFailed");
    let mut refs: Vec<usize> = p
        .ast
        .descendants(stub_id)
        .into_iter()
        .filter_map(|id| match p.ast.kind(id) {
            Ok(NodeKind::Identifier { name, referenced_declaration: Some(decl), .. })
                if name == "AssertionFailed" =>
            {
                Some(decl.index())
            }
            _ => None,
        })
        .collect();
    refs.sort_unstable();
    assert_eq!(refs, [event.index(), event.index() + HIT_EVENT_OFFSET]);
}
