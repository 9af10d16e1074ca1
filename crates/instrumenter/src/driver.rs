//! Whole-compilation orchestration: validate, instrument every contract bases-first, declare
//! the bindings, print, and describe the result.

use rustc_hash::FxHashSet;
use scribe_spec_lang::AnnotationType;

use crate::{
    annotations::{AnnotationMetaData, Annotations},
    ast::{
        printer::{print_units, PrintedSources},
        ContractKind, FunctionDefinition, FunctionKind, NodeId, NodeKind, SolAst, Visibility,
    },
    config::InstrumentationConfig,
    context::{InstrumentationContext, NameGenerator},
    error::{InstrumentationError, Result},
    instrument::{
        add_utils_bases, generate_utils_contract, instrument_contract, instrument_function,
        instrument_statement,
    },
    metadata::{generate_metadata, InstrumentationMetadata},
};

#[derive(Clone, Debug)]
pub struct InstrumentationResult {
    /// Instrumented units in print order; the utility unit comes last.
    pub sources: PrintedSources,
    pub metadata: InstrumentationMetadata,
}

/// Instrument `ast` in place with `annotations`.
pub fn instrument(
    ast: &mut SolAst,
    annotations: &Annotations,
    config: InstrumentationConfig,
) -> Result<InstrumentationResult> {
    ast.link()?;
    for annot in annotations.iter() {
        validate_target(ast, annot)?;
    }

    let original_units = ast.units().to_vec();
    let contracts = contracts_bases_first(ast)?;
    let mut ctx = InstrumentationContext::new(config, NameGenerator::from_ast(ast));
    for annot in annotations.iter() {
        ctx.snapshot_target(ast, annot.id, annot.target)?;
    }

    ctx.needs_state_invariants = contracts_needing_invariants(ast, annotations, &contracts)?;
    info!(
        contracts = contracts.len(),
        annotations = annotations.len(),
        checked = ctx.needs_state_invariants.len(),
        "instrumenting compilation unit"
    );

    let utils = generate_utils_contract(ast, &mut ctx)?;
    let statements = annotations.statement_targets(ast);

    for contract in contracts {
        instrument_contract(ast, &mut ctx, annotations, contract)?;
        instrument_functions(ast, &mut ctx, annotations, contract)?;

        let own_statements: Vec<NodeId> = statements
            .iter()
            .copied()
            .filter(|stmt| ast.enclosing_contract(*stmt) == Some(contract))
            .collect();
        for stmt in own_statements {
            instrument_statement(ast, &mut ctx, &annotations.of(stmt), stmt)?;
        }
    }

    ctx.finalize_bindings(ast)?;
    add_utils_bases(ast, &mut ctx)?;

    let mut order = original_units.clone();
    order.sort_by_key(|unit| ast.source_unit(*unit).map(|unit| unit.file_index).unwrap_or(usize::MAX));
    order.push(utils.unit);
    let sources = print_units(ast, &order)?;
    let metadata = generate_metadata(ast, &ctx, annotations, &original_units, &sources)?;

    Ok(InstrumentationResult { sources, metadata })
}

fn validate_target(ast: &SolAst, annot: &AnnotationMetaData) -> Result<()> {
    let allowed = match ast.kind(annot.target)? {
        NodeKind::ContractDefinition(def) => match annot.kind {
            AnnotationType::Invariant => def.kind == ContractKind::Contract,
            AnnotationType::IfSucceeds | AnnotationType::UserFunctionDefinition => {
                def.kind != ContractKind::Interface
            }
            _ => false,
        },
        NodeKind::FunctionDefinition(_) if ast.enclosing_contract(annot.target).is_none() => false,
        NodeKind::FunctionDefinition(_) => matches!(
            annot.kind,
            AnnotationType::Require |
                AnnotationType::Try |
                AnnotationType::Assert |
                AnnotationType::LetAnnotation |
                AnnotationType::IfSucceeds
        ),
        kind if kind.is_statement() && ast.enclosing_contract(annot.target).is_some() => matches!(
            annot.kind,
            AnnotationType::Require |
                AnnotationType::Try |
                AnnotationType::Assert |
                AnnotationType::LetAnnotation |
                AnnotationType::IfSucceeds
        ),
        _ => false,
    };
    if allowed {
        return Ok(());
    }
    let target = ast.kind(annot.target)?.name();
    Err(InstrumentationError::unsupported(
        ast,
        annot.target,
        format!("`#{}` cannot be attached to a {target}", annot.kind),
    ))
}

/// Contracts of the original program, every base before its derived contracts.
fn contracts_bases_first(ast: &SolAst) -> Result<Vec<NodeId>> {
    let mut contracts = ast
        .contracts()
        .into_iter()
        .map(|c| ast.contract_definition(c).map(|def| (def.linearized_base_contracts.len(), c)))
        .collect::<Result<Vec<_>>>()?;
    // A linearization strictly contains the linearization of every base.
    contracts.sort_by_key(|(len, _)| *len);
    Ok(contracts.into_iter().map(|(_, c)| c).collect())
}

/// Contracts inheriting an invariant, together with all of their (non-interface) bases.
fn contracts_needing_invariants(
    ast: &SolAst,
    annotations: &Annotations,
    contracts: &[NodeId],
) -> Result<FxHashSet<NodeId>> {
    let with_invariants: FxHashSet<NodeId> = contracts
        .iter()
        .copied()
        .filter(|c| !annotations.of_kind(*c, AnnotationType::Invariant).is_empty())
        .collect();

    let mut needs = FxHashSet::default();
    for contract in contracts {
        let def = ast.contract_definition(*contract)?;
        if def.kind != ContractKind::Contract ||
            !def.linearized_base_contracts.iter().any(|base| with_invariants.contains(base))
        {
            continue;
        }
        for base in &def.linearized_base_contracts {
            if ast.contract_definition(*base)?.kind == ContractKind::Contract {
                needs.insert(*base);
            }
        }
    }
    Ok(needs)
}

fn is_entry_point(def: &FunctionDefinition) -> bool {
    matches!(def.kind, FunctionKind::Function | FunctionKind::Receive) &&
        matches!(def.visibility, Visibility::External | Visibility::Public | Visibility::Default) &&
        def.state_mutability.changes_state() &&
        def.body.is_some()
}

/// Instrument every function of `contract` that has annotations, inherits contract-level
/// postconditions, or is an entry point of a contract checking invariants.
fn instrument_functions(
    ast: &mut SolAst,
    ctx: &mut InstrumentationContext,
    annotations: &Annotations,
    contract: NodeId,
) -> Result<()> {
    let needs_invariants = ctx.needs_state_invariants.contains(&contract);
    let contract_level = annotations.of_kind(contract, AnnotationType::IfSucceeds);

    for func in ast.functions_of(contract)? {
        let def = ast.function_definition(func)?;
        let entry_point = is_entry_point(def);

        let mut func_annotations = annotations.of(func);
        if entry_point {
            func_annotations.extend(contract_level.iter().copied());
        }
        if func_annotations.is_empty() && !(needs_invariants && entry_point) {
            continue;
        }
        instrument_function(ast, ctx, &func_annotations, func, needs_invariants)?;
    }
    Ok(())
}
