//! The instrumentation context shared by every step of one compilation.

use rustc_hash::{FxHashMap, FxHashSet};
use scribe_spec_lang::SrcRange;

use crate::{
    ast::{ContractKind, FunctionKind, NodeId, NodeKind, SolAst},
    config::InstrumentationConfig,
    error::{InstrumentationError, Result},
    transpiling_context::{Bindings, Marker, SiteKind, TranspilingContext},
};

pub const OUT_OF_CONTRACT_FLAG: &str = "__scribble_out_of_contract";
pub const SCRATCH_FIELD: &str = "__mstore_scratch__";
pub const UTILS_CONTRACT: &str = "__scribble_ReentrancyUtils";
pub const CHECK_STATE_INVS: &str = "__scribble_check_state_invariants";
pub const CHECK_INVS_AT_END: &str = "__scribble_check_invs_at_end";
pub const ASSERTION_FAILED: &str = "AssertionFailed";
pub const ASSERTION_FAILED_DATA: &str = "AssertionFailedData";

/// Name of the internal checker of `contract`.
pub fn internal_checker_name(contract: &str) -> String {
    format!("__scribble_{contract}_check_state_invariants_internal")
}

/// Hands out identifiers that clash with nothing in the program.
#[derive(Clone, Debug, Default)]
pub struct NameGenerator {
    used: FxHashSet<String>,
    counters: FxHashMap<String, usize>,
}

impl NameGenerator {
    /// Reserve every name declared or referenced in `ast`.
    pub fn from_ast(ast: &SolAst) -> Self {
        let mut names = Self::default();
        for unit in ast.units() {
            for id in ast.descendants(*unit) {
                let name = match ast.kind(id) {
                    Ok(NodeKind::ContractDefinition(def)) => &def.name,
                    Ok(NodeKind::FunctionDefinition(def)) => &def.name,
                    Ok(NodeKind::VariableDeclaration(def)) => &def.name,
                    Ok(NodeKind::StructDefinition { name, .. }) |
                    Ok(NodeKind::EventDefinition { name, .. }) |
                    Ok(NodeKind::Identifier { name, .. }) => name,
                    _ => continue,
                };
                names.used.insert(name.clone());
            }
        }
        names
    }

    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    /// `prefix` itself when `plain_if_free` and it is unused, otherwise `prefix<n>`.
    pub fn fresh(&mut self, prefix: &str, plain_if_free: bool) -> String {
        if plain_if_free && self.used.insert(prefix.to_string()) {
            return prefix.to_string();
        }
        let counter = self.counters.entry(prefix.to_string()).or_default();
        loop {
            let candidate = format!("{prefix}{counter}");
            *counter += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Classification of generated nodes, the basis of the metadata.
#[derive(Clone, Debug, Default)]
pub struct InstrumentationRecords {
    pub general: Vec<NodeId>,
    /// Everything generated for one property.
    pub annotation: FxHashMap<usize, Vec<NodeId>>,
    /// The conditions deciding whether a property holds.
    pub checks: FxHashMap<usize, Vec<NodeId>>,
    /// What runs when a property is violated.
    pub failures: FxHashMap<usize, Vec<NodeId>>,
}

impl InstrumentationRecords {
    pub fn add_general_instrumentation(&mut self, nodes: &[NodeId]) {
        self.general.extend_from_slice(nodes);
    }

    pub fn add_annotation_instrumentation(&mut self, annot: usize, nodes: &[NodeId]) {
        self.annotation.entry(annot).or_default().extend_from_slice(nodes);
    }

    pub fn add_annotation_check(&mut self, annot: usize, node: NodeId) {
        self.checks.entry(annot).or_default().push(node);
    }

    /// Failure-branch statements also count as instrumentation of the property.
    pub fn add_annotation_failure_check(&mut self, annot: usize, nodes: &[NodeId]) {
        self.failures.entry(annot).or_default().extend_from_slice(nodes);
        let all = self.annotation.entry(annot).or_default();
        for node in nodes {
            if !all.contains(node) {
                all.push(*node);
            }
        }
    }
}

/// The generated utility unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UtilsUnit {
    pub unit: NodeId,
    pub contract: NodeId,
    pub flag: NodeId,
    pub assertion_failed: NodeId,
    pub assertion_failed_data: NodeId,
}

/// One debug value as reported in the metadata: its annotation ranges and its type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugValueDesc {
    pub ranges: Vec<SrcRange>,
    pub type_string: String,
}

/// Snapshot of an instrumentation target taken before any rewriting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetDesc {
    pub kind: &'static str,
    pub name: String,
    pub contract: String,
    pub filename: String,
}

#[derive(Debug)]
pub struct InstrumentationContext {
    pub config: InstrumentationConfig,
    pub names: NameGenerator,
    pub records: InstrumentationRecords,
    pub utils: Option<UtilsUnit>,
    /// Contracts that must check state invariants at their boundaries.
    pub needs_state_invariants: FxHashSet<NodeId>,
    /// Contracts (and libraries) that use the utility contract.
    needs_utils: Vec<NodeId>,
    /// Units that call free helpers of the utility unit without inheriting its contract.
    needs_utils_import: Vec<NodeId>,
    trans_ctxs: FxHashMap<(NodeId, SiteKind), TranspilingContext>,
    /// One bindings struct per function, shared by all its sites.
    bindings: FxHashMap<NodeId, Bindings>,
    /// (defining contract, annotation name) to implementation name.
    user_functions: FxHashMap<(NodeId, String), String>,
    /// (container, helper name) pairs already emitted.
    array_sum_funs: FxHashSet<(NodeId, String)>,
    pub debug_events: FxHashMap<usize, Vec<DebugValueDesc>>,
    /// Events declared locally in libraries, which cannot inherit them.
    library_events: FxHashMap<NodeId, (NodeId, NodeId)>,
    pub targets: FxHashMap<usize, TargetDesc>,
}

impl InstrumentationContext {
    pub fn new(config: InstrumentationConfig, names: NameGenerator) -> Self {
        Self {
            config,
            names,
            records: InstrumentationRecords::default(),
            utils: None,
            needs_state_invariants: FxHashSet::default(),
            needs_utils: vec![],
            needs_utils_import: vec![],
            trans_ctxs: FxHashMap::default(),
            bindings: FxHashMap::default(),
            user_functions: FxHashMap::default(),
            array_sum_funs: FxHashSet::default(),
            debug_events: FxHashMap::default(),
            library_events: FxHashMap::default(),
            targets: FxHashMap::default(),
        }
    }

    pub fn utils(&self) -> Result<UtilsUnit> {
        self.utils.ok_or_else(|| {
            InstrumentationError::Internal("utility contract not generated yet".to_string())
        })
    }

    pub fn needs_utils(&mut self, contract: NodeId) {
        if !self.needs_utils.contains(&contract) {
            self.needs_utils.push(contract);
        }
    }

    pub fn contracts_needing_utils(&self) -> &[NodeId] {
        &self.needs_utils
    }

    pub fn needs_utils_import(&mut self, unit: NodeId) {
        if !self.needs_utils_import.contains(&unit) {
            self.needs_utils_import.push(unit);
        }
    }

    pub fn units_needing_utils_import(&self) -> &[NodeId] {
        &self.needs_utils_import
    }

    /// Run `f` with the site of `container`, creating it on first use. The site borrows the
    /// bindings of `container` for the duration of `f`.
    pub fn with_trans_ctx<R>(
        &mut self,
        ast: &mut SolAst,
        container: NodeId,
        kind: SiteKind,
        f: impl FnOnce(&mut SolAst, &mut Self, &mut TranspilingContext) -> Result<R>,
    ) -> Result<R> {
        let mut tctx = match self.trans_ctxs.remove(&(container, kind)) {
            Some(tctx) => tctx,
            None => self.make_trans_ctx(ast, container, kind)?,
        };
        tctx.bindings = match self.bindings.remove(&container) {
            Some(bindings) => bindings,
            None => self.make_bindings()?,
        };
        let res = f(ast, self, &mut tctx);
        self.bindings.insert(container, std::mem::take(&mut tctx.bindings));
        self.trans_ctxs.insert((container, kind), tctx);
        res
    }

    fn make_bindings(&mut self) -> Result<Bindings> {
        let mut bindings = Bindings::new(self.names.fresh("vars", false));
        if self.config.assertion_mode == crate::config::AssertionMode::Mstore {
            bindings.add_binding(SCRATCH_FIELD, crate::ast::TypeName::elementary("uint256"))?;
        }
        Ok(bindings)
    }

    fn make_trans_ctx(
        &mut self,
        ast: &SolAst,
        container: NodeId,
        kind: SiteKind,
    ) -> Result<TranspilingContext> {
        let func = ast.function_definition(container)?;
        let body = func.body.ok_or_else(|| {
            InstrumentationError::unsupported(ast, container, "function without a body")
        })?;
        let contract = ast.enclosing_contract(container).ok_or_else(|| {
            InstrumentationError::unsupported(ast, container, "free functions are not instrumented")
        })?;

        let end = Marker::End(body);
        let old_marker = match (kind, func.kind) {
            (SiteKind::TwoPointWrapper, _) => {
                match ast.kind(body)?.members().and_then(|stmts| stmts.first().copied()) {
                    Some(anchor) => Marker::Before { block: body, anchor },
                    None => end,
                }
            }
            _ => end,
        };

        Ok(TranspilingContext::new(container, contract, kind, Bindings::default(), old_marker, end))
    }

    /// Declare the bindings of every instrumented function, in container order.
    pub fn finalize_bindings(&mut self, ast: &mut SolAst) -> Result<()> {
        let mut containers: Vec<_> = self.bindings.keys().copied().collect();
        containers.sort();
        for container in containers {
            let contract = ast.enclosing_contract(container).ok_or_else(|| {
                InstrumentationError::Internal(format!("site {container} outside of a contract"))
            })?;
            if let Some(bindings) = self.bindings.get_mut(&container) {
                let generated = bindings.materialize(ast, container, contract)?;
                self.records.add_general_instrumentation(&generated);
            }
        }
        Ok(())
    }

    pub fn register_user_function(&mut self, contract: NodeId, name: &str, implementation: String) {
        self.user_functions.insert((contract, name.to_string()), implementation);
    }

    /// Resolve a user function visible from `contract` (defined in it or in one of its bases).
    pub fn user_function(&self, ast: &SolAst, contract: NodeId, name: &str) -> Option<String> {
        let lin = ast.contract_definition(contract).ok()?.linearized_base_contracts.clone();
        std::iter::once(contract)
            .chain(lin)
            .find_map(|base| self.user_functions.get(&(base, name.to_string())).cloned())
    }

    /// Whether the array-sum helper `name` is already visible from `container`.
    pub fn has_array_sum_fun(&self, ast: &SolAst, container: NodeId, name: &str) -> bool {
        let mut scope = vec![container];
        if let Ok(def) = ast.contract_definition(container) {
            scope.extend(def.linearized_base_contracts.iter().copied());
        }
        scope.iter().any(|c| self.array_sum_funs.contains(&(*c, name.to_string())))
    }

    pub fn add_array_sum_fun(&mut self, container: NodeId, name: &str) {
        self.array_sum_funs.insert((container, name.to_string()));
    }

    /// The `AssertionFailed`/`AssertionFailedData` pair used by code in `contract`. Libraries
    /// get their own declarations; everything else inherits the utility contract's.
    pub fn assertion_events(&mut self, ast: &mut SolAst, contract: NodeId) -> Result<(NodeId, NodeId)> {
        let utils = self.utils()?;
        if ast.contract_definition(contract)?.kind != ContractKind::Library {
            self.needs_utils(contract);
            return Ok((utils.assertion_failed, utils.assertion_failed_data));
        }
        if let Some(events) = self.library_events.get(&contract) {
            return Ok(*events);
        }

        let failed = ast.deep_copy(utils.assertion_failed)?;
        let failed_data = ast.deep_copy(utils.assertion_failed_data)?;
        ast.insert_at_beginning(contract, failed_data)?;
        ast.insert_at_beginning(contract, failed)?;
        self.records.add_general_instrumentation(&[failed, failed_data]);
        self.library_events.insert(contract, (failed, failed_data));
        Ok((failed, failed_data))
    }

    /// Snapshot the description of every annotation target.
    pub fn snapshot_target(&mut self, ast: &SolAst, annot: usize, target: NodeId) -> Result<()> {
        let contract = match ast.kind(target)? {
            NodeKind::ContractDefinition(_) => Some(target),
            _ => ast.enclosing_contract(target),
        };
        let contract_name = match contract {
            Some(contract) => ast.contract_name(contract)?.to_string(),
            None => String::new(),
        };
        let (kind, name) = match ast.kind(target)? {
            NodeKind::ContractDefinition(def) => ("contract", def.name.clone()),
            NodeKind::FunctionDefinition(def) => (
                "function",
                match def.kind {
                    FunctionKind::Constructor => "constructor".to_string(),
                    FunctionKind::Fallback => "fallback".to_string(),
                    FunctionKind::Receive => "receive".to_string(),
                    _ => def.name.clone(),
                },
            ),
            _ => ("statement", String::new()),
        };
        let filename = ast.unit_path(target).unwrap_or_default().to_string();
        self.targets
            .insert(annot, TargetDesc { kind, name, contract: contract_name, filename });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_names_avoid_program_names() {
        let mut ast = SolAst::new();
        let v = ast.make_identifier("vars0", "uint256");
        let stmt = ast.make_expression_statement(v);
        let body = ast.make_block(vec![stmt]);
        let mut f = crate::ast::FunctionDefinition::new("inc", FunctionKind::Function);
        f.body = Some(body);
        let f = ast.add_function(f);
        let c = ast.make_contract("C", ContractKind::Contract, &[]);
        ast.append_child(c, f).unwrap();
        ast.add_unit("c.sol", 0, vec![c]);

        let mut names = NameGenerator::from_ast(&ast);
        assert_eq!(names.fresh("vars", false), "vars1");
        assert_eq!(names.fresh("vars", false), "vars2");
        assert_eq!(names.fresh("inc", true), "inc0");
        assert_eq!(names.fresh("dec", true), "dec");
        assert_eq!(names.fresh("dec", true), "dec0");
    }

    #[test]
    fn test_failure_checks_are_instrumentation() {
        let mut records = InstrumentationRecords::default();
        let mut ast = SolAst::new();
        let a = ast.make_break();
        let b = ast.make_break();
        records.add_annotation_instrumentation(0, &[a]);
        records.add_annotation_failure_check(0, &[a, b]);
        assert_eq!(records.annotation[&0], vec![a, b]);
        assert_eq!(records.failures[&0], vec![a, b]);
    }
}
