mod common;

use common::{function_named, pos, printed, Program};
use scribe_instrumenter::{
    ast::{ContractKind, FunctionDefinition, FunctionKind, NodeId, StateMutability, Visibility},
    instrument::MSTORE_ID_LIMIT,
    instrument, AssertionMode, InstrumentationConfig, InstrumentationError,
};
use scribe_spec_lang::AnnotationType;

fn mstore() -> InstrumentationConfig {
    InstrumentationConfig { assertion_mode: AssertionMode::Mstore, ..Default::default() }
}

/// `contract C { uint256 x; function inc() public { x += 1; } }`
fn counter(p: &mut Program) -> (NodeId, NodeId) {
    let c = p.contract("C", ContractKind::Contract, &[]);
    p.state_var(c, "x", "uint256");
    let inc = p.increment("x");
    let f = p.function(c, "inc", Visibility::Public, StateMutability::NonPayable, vec![inc]);
    p.unit("c.sol", vec![c]);
    (c, f)
}

#[test]
fn failures_write_marker_patterns() {
    let mut p = Program::new();
    let (c, f) = counter(&mut p);
    let post = p.positive("x");
    p.annotate(f, AnnotationType::IfSucceeds, post, "");

    let config = InstrumentationConfig { cov_assertions: true, ..mstore() };
    let res = instrument(&mut p.ast, &p.annotations, config).unwrap();
    let stub = printed(&res, function_named(&p.ast, c, "inc"));

    let cafe = "cafe".repeat(15);
    let hit = format!("_v.__mstore_scratch__ = 0x{cafe}1000;");
    let failed = format!("_v.__mstore_scratch__ = 0x{cafe}0000;");
    let steps = ["_original_C_inc();", hit.as_str(), "if (!(x > 0)) {", failed.as_str()];
    let offsets: Vec<usize> = steps.iter().map(|step| pos(stub, step)).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{stub}");
    assert!(!stub.contains("AssertionFailed"));

    // The scratch slot lives in the bindings of the site.
    let src = &res.sources.units[0].source;
    assert!(src.contains("struct vars0 {\n        uint256 __mstore_scratch__;\n    }"), "{src}");
}

#[test]
fn pure_functions_become_view() {
    let mut p = Program::new();
    let c = p.contract("C", ContractKind::Contract, &[]);
    let f = p.function(c, "id", Visibility::Public, StateMutability::Pure, vec![]);
    p.unit("c.sol", vec![c]);
    let t = p.truth();
    p.annotate(f, AnnotationType::IfSucceeds, t, "");

    let res = instrument(&mut p.ast, &p.annotations, mstore()).unwrap();
    let stub = printed(&res, function_named(&p.ast, c, "id"));
    assert!(stub.starts_with("function id() public view {"), "{stub}");
}

#[test]
fn property_ids_fit_in_twelve_bits() {
    let mut p = Program::new();
    let (_, f) = counter(&mut p);
    for _ in 0..MSTORE_ID_LIMIT {
        let t = p.truth();
        p.annotate(f, AnnotationType::IfSucceeds, t, "");
    }

    let mut at_limit = Program::new();
    let (_, g) = counter(&mut at_limit);
    for _ in 0..MSTORE_ID_LIMIT {
        let t = at_limit.truth();
        at_limit.annotate(g, AnnotationType::IfSucceeds, t, "");
    }
    let t = at_limit.truth();
    at_limit.annotate(g, AnnotationType::IfSucceeds, t, "");

    let res = instrument(&mut p.ast, &p.annotations, mstore()).unwrap();
    assert_eq!(res.metadata.property_map.len(), MSTORE_ID_LIMIT);

    let err = instrument(&mut at_limit.ast, &at_limit.annotations, mstore()).unwrap_err();
    assert!(
        matches!(err, InstrumentationError::PropertyCapacity { id: 4096, limit: 4096 }),
        "{err}"
    );

    // Event mode has no such limit.
    let mut logged = Program::new();
    let (_, h) = counter(&mut logged);
    for _ in 0..=MSTORE_ID_LIMIT {
        let t = logged.truth();
        logged.annotate(h, AnnotationType::IfSucceeds, t, "");
    }
    instrument(&mut logged.ast, &logged.annotations, InstrumentationConfig::default()).unwrap();
}

#[test]
fn constructor_sites_share_one_binding_struct() {
    let mut p = Program::new();
    let c = p.contract("C", ContractKind::Contract, &[]);
    p.state_var(c, "x", "uint256");
    let inc = p.increment("x");
    let body = p.ast.make_block(vec![inc]);
    let ctor = p.ast.add_function(FunctionDefinition {
        body: Some(body),
        ..FunctionDefinition::new("", FunctionKind::Constructor)
    });
    p.ast.append_child(c, ctor).unwrap();
    p.unit("c.sol", vec![c]);

    let post = p.positive("x");
    p.annotate(ctor, AnnotationType::IfSucceeds, post, "");
    let before = p.positive("x");
    p.annotate(inc, AnnotationType::Assert, before, "");

    let res = instrument(&mut p.ast, &p.annotations, mstore()).unwrap();
    let src = &res.sources.units[0].source;
    assert_eq!(src.matches("memory _v;").count(), 1, "{src}");
    assert_eq!(src.matches("struct vars").count(), 1, "{src}");

    // The statement check comes before the statement, the postcondition after it.
    let ctor_text = printed(&res, ctor);
    let inc_at = pos(ctor_text, "x += 1;");
    assert!(pos(ctor_text, "vars0 memory _v;") < pos(ctor_text, "if (!(x > 0)) {"));
    assert!(pos(ctor_text, "if (!(x > 0)) {") < inc_at);
    assert!(ctor_text.rfind("if (!(x > 0)) {").unwrap() > inc_at, "{ctor_text}");
    assert_eq!(ctor_text.matches("_v.__mstore_scratch__ = 0x").count(), 2);
}

#[test]
fn requires_past_the_limit_are_accepted() {
    let mut p = Program::new();
    let (c, f) = counter(&mut p);
    for _ in 0..MSTORE_ID_LIMIT {
        let t = p.truth();
        p.annotate(f, AnnotationType::IfSucceeds, t, "");
    }
    // Ids 4096 and 4097 never reach a marker.
    let pre = p.positive("x");
    p.annotate(f, AnnotationType::Require, pre, "");
    let guess = p.positive("x");
    p.annotate(f, AnnotationType::Try, guess, "");

    let res = instrument(&mut p.ast, &p.annotations, mstore()).unwrap();
    assert_eq!(res.metadata.property_map.len(), MSTORE_ID_LIMIT + 2);
    let stub = printed(&res, function_named(&p.ast, c, "inc"));
    assert!(pos(stub, "require(x > 0);") < pos(stub, "_original_C_inc();"));
}
