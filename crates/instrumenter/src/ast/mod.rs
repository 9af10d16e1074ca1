//! Arena-owned, mutable model of the host AST.
//!
//! The pass owns the arena exclusively. Nodes are never freed: a node detached by a rewrite
//! simply loses its parent. Structural edits go through the list-insertion operations below
//! so that parent links stay consistent.

mod factory;
pub mod loader;
mod nodes;
pub mod printer;
pub mod types;

pub use nodes::*;

use paste::paste;
use rustc_hash::{FxHashMap, FxHashSet};
use scribe_spec_lang::SrcRange;
use std::fmt;

use crate::{
    error::{InstrumentationError, Result},
    internal_ensure,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    /// Range in the original sources. `None` for generated nodes.
    pub src: Option<SrcRange>,
    /// Natspec text printed above declarations.
    pub documentation: Option<String>,
    pub kind: NodeKind,
}

#[derive(Clone, Debug, Default)]
pub struct SolAst {
    nodes: Vec<Node>,
    units: Vec<NodeId>,
}

macro_rules! typed_accessors {
    ($($variant:ident),* $(,)?) => {
        paste! {
            $(
                #[doc = concat!("The `", stringify!($variant), "` payload of `id`.")]
                pub fn [<$variant:snake>](&self, id: NodeId) -> Result<&$variant> {
                    match &self.node(id)?.kind {
                        NodeKind::$variant(inner) => Ok(inner),
                        other => Err(InstrumentationError::Internal(format!(
                            "expected {} at {id}, found {}",
                            stringify!($variant),
                            other.name()
                        ))),
                    }
                }

                pub fn [<$variant:snake _mut>](&mut self, id: NodeId) -> Result<&mut $variant> {
                    match &mut self.node_mut(id)?.kind {
                        NodeKind::$variant(inner) => Ok(inner),
                        other => Err(InstrumentationError::Internal(format!(
                            "expected {} at {id}, found {}",
                            stringify!($variant),
                            other.name()
                        ))),
                    }
                }
            )*
        }
    };
}

impl SolAst {
    pub fn new() -> Self {
        Self::default()
    }

    typed_accessors!(SourceUnit, ContractDefinition, FunctionDefinition, VariableDeclaration, FunctionCall);

    /// Allocate a node. The children named by `kind` are adopted by the new node.
    pub fn add(&mut self, kind: NodeKind, src: Option<SrcRange>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let children = kind.children();
        self.nodes.push(Node { id, parent: None, src, documentation: None, kind });
        for child in children {
            if let Some(node) = self.nodes.get_mut(child.0) {
                node.parent = Some(id);
            }
        }
        id
    }

    /// Register a source unit as a root of the tree. Units are printed in registration order.
    pub fn add_unit(&mut self, path: &str, file_index: usize, nodes: Vec<NodeId>) -> NodeId {
        let unit = self.add(
            NodeKind::SourceUnit(SourceUnit { path: path.to_string(), file_index, nodes }),
            None,
        );
        self.units.push(unit);
        unit
    }

    pub fn units(&self) -> &[NodeId] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| InstrumentationError::Internal(format!("dangling node id {id}")))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| InstrumentationError::Internal(format!("dangling node id {id}")))
    }

    pub fn kind(&self, id: NodeId) -> Result<&NodeKind> {
        Ok(&self.node(id)?.kind)
    }

    pub fn kind_mut(&mut self, id: NodeId) -> Result<&mut NodeKind> {
        Ok(&mut self.node_mut(id)?.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes.get(id.0).map(|node| node.kind.children()).unwrap_or_default()
    }

    pub fn set_documentation(&mut self, id: NodeId, doc: impl Into<String>) -> Result<()> {
        self.node_mut(id)?.documentation = Some(doc.into());
        Ok(())
    }

    /// `id` and everything below it, in pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        out
    }

    /// The nearest strict ancestor of `id` satisfying `pred`.
    pub fn closest_parent(&self, id: NodeId, pred: impl Fn(&NodeKind) -> bool) -> Option<NodeId> {
        let mut cur = self.parent(id);
        while let Some(candidate) = cur {
            let node = self.nodes.get(candidate.0)?;
            if pred(&node.kind) {
                return Some(candidate);
            }
            cur = node.parent;
        }
        None
    }

    pub fn enclosing_contract(&self, id: NodeId) -> Option<NodeId> {
        self.closest_parent(id, |kind| matches!(kind, NodeKind::ContractDefinition(_)))
    }

    pub fn enclosing_function(&self, id: NodeId) -> Option<NodeId> {
        self.closest_parent(id, |kind| matches!(kind, NodeKind::FunctionDefinition(_)))
    }

    pub fn enclosing_unit(&self, id: NodeId) -> Option<NodeId> {
        if matches!(self.kind(id), Ok(NodeKind::SourceUnit(_))) {
            return Some(id);
        }
        self.closest_parent(id, |kind| matches!(kind, NodeKind::SourceUnit(_)))
    }

    /// The original range of `id`, or of its nearest ancestor that has one.
    pub fn closest_src(&self, id: NodeId) -> Option<SrcRange> {
        let mut cur = Some(id);
        while let Some(next) = cur {
            let node = self.nodes.get(next.0)?;
            if node.src.is_some() {
                return node.src;
            }
            cur = node.parent;
        }
        None
    }

    pub fn unit_path(&self, id: NodeId) -> Option<&str> {
        let unit = self.enclosing_unit(id)?;
        match self.kind(unit) {
            Ok(NodeKind::SourceUnit(unit)) => Some(unit.path.as_str()),
            _ => None,
        }
    }

    fn members_of(&mut self, container: NodeId) -> Result<&mut Vec<NodeId>> {
        let node = self.node_mut(container)?;
        let name = node.kind.name();
        node.kind.members_mut().ok_or_else(|| {
            InstrumentationError::Internal(format!("{name} at {container} is not a container"))
        })
    }

    fn position_in(&mut self, container: NodeId, anchor: NodeId) -> Result<usize> {
        self.members_of(container)?.iter().position(|member| *member == anchor).ok_or_else(|| {
            InstrumentationError::Internal(format!("{anchor} is not a member of {container}"))
        })
    }

    fn adopt(&mut self, container: NodeId, child: NodeId) -> Result<()> {
        self.node_mut(child)?.parent = Some(container);
        Ok(())
    }

    pub fn append_child(&mut self, container: NodeId, child: NodeId) -> Result<()> {
        self.members_of(container)?.push(child);
        self.adopt(container, child)
    }

    pub fn insert_at_beginning(&mut self, container: NodeId, child: NodeId) -> Result<()> {
        self.members_of(container)?.insert(0, child);
        self.adopt(container, child)
    }

    pub fn insert_before(&mut self, container: NodeId, anchor: NodeId, child: NodeId) -> Result<()> {
        let pos = self.position_in(container, anchor)?;
        self.members_of(container)?.insert(pos, child);
        self.adopt(container, child)
    }

    pub fn insert_after(&mut self, container: NodeId, anchor: NodeId, child: NodeId) -> Result<()> {
        let pos = self.position_in(container, anchor)?;
        self.members_of(container)?.insert(pos + 1, child);
        self.adopt(container, child)
    }

    pub fn remove_child(&mut self, container: NodeId, child: NodeId) -> Result<()> {
        let pos = self.position_in(container, child)?;
        self.members_of(container)?.remove(pos);
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    /// Put `new` in the place `old` occupies under `parent`.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) -> Result<()> {
        let replaced = self.kind_mut(parent)?.replace_child(old, new);
        internal_ensure!(replaced, "{old} is not a child of {parent}");
        self.node_mut(old)?.parent = None;
        self.adopt(parent, new)
    }

    /// Re-establish the parent links of the children of `id` after its kind was edited in place.
    pub fn reparent(&mut self, id: NodeId) -> Result<()> {
        for child in self.children(id) {
            self.adopt(id, child)?;
        }
        Ok(())
    }

    /// Copy the subtree rooted at `id`. The copy is detached and keeps the original ranges.
    pub fn deep_copy(&mut self, id: NodeId) -> Result<NodeId> {
        let node = self.node(id)?.clone();
        let mut map = FxHashMap::default();
        for child in node.kind.children() {
            map.insert(child, self.deep_copy(child)?);
        }

        let mut kind = node.kind;
        for (old, new) in map {
            kind.replace_child(old, new);
        }
        let copy = self.add(kind, node.src);
        self.node_mut(copy)?.documentation = node.documentation;
        Ok(copy)
    }

    /// All contracts, in unit order.
    pub fn contracts(&self) -> Vec<NodeId> {
        self.units
            .iter()
            .flat_map(|unit| self.children(*unit))
            .filter(|id| matches!(self.kind(*id), Ok(NodeKind::ContractDefinition(_))))
            .collect()
    }

    pub fn find_contract(&self, name: &str) -> Option<NodeId> {
        self.contracts().into_iter().find(|id| {
            matches!(self.contract_definition(*id), Ok(contract) if contract.name == name)
        })
    }

    /// Function members of a contract, in declaration order.
    pub fn functions_of(&self, contract: NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .contract_definition(contract)?
            .nodes
            .iter()
            .copied()
            .filter(|id| matches!(self.kind(*id), Ok(NodeKind::FunctionDefinition(_))))
            .collect())
    }

    pub fn constructor_of(&self, contract: NodeId) -> Result<Option<NodeId>> {
        Ok(self.functions_of(contract)?.into_iter().find(|id| {
            matches!(self.function_definition(*id), Ok(func) if func.kind == FunctionKind::Constructor)
        }))
    }

    pub fn contract_name(&self, contract: NodeId) -> Result<&str> {
        Ok(&self.contract_definition(contract)?.name)
    }

    /// Resolve base-contract names and compute the C3 linearization of every contract that does
    /// not carry one yet.
    pub fn link(&mut self) -> Result<()> {
        let contracts = self.contracts();
        let by_name: FxHashMap<String, NodeId> = contracts
            .iter()
            .filter_map(|id| Some((self.contract_definition(*id).ok()?.name.clone(), *id)))
            .collect();

        for contract in &contracts {
            let unresolved_at = self.node(*contract)?.src;
            for base in &mut self.contract_definition_mut(*contract)?.base_contracts {
                if base.contract.is_none() {
                    base.contract = Some(*by_name.get(&base.name).ok_or_else(|| {
                        InstrumentationError::Internal(format!(
                            "unknown base contract `{}` (at {unresolved_at:?})",
                            base.name
                        ))
                    })?);
                }
            }
        }

        let mut memo = FxHashMap::default();
        for contract in &contracts {
            if self.contract_definition(*contract)?.linearized_base_contracts.is_empty() {
                let lin = self.c3(*contract, &mut memo, &mut FxHashSet::default())?;
                self.contract_definition_mut(*contract)?.linearized_base_contracts = lin;
            }
        }
        Ok(())
    }

    fn c3(
        &self,
        contract: NodeId,
        memo: &mut FxHashMap<NodeId, Vec<NodeId>>,
        visiting: &mut FxHashSet<NodeId>,
    ) -> Result<Vec<NodeId>> {
        if let Some(lin) = memo.get(&contract) {
            return Ok(lin.clone());
        }
        internal_ensure!(visiting.insert(contract), "cyclic inheritance through {contract}");

        let def = self.contract_definition(contract)?;
        let written = if def.linearized_base_contracts.is_empty() {
            def.base_contracts.iter().filter_map(|base| base.contract).collect::<Vec<_>>()
        } else {
            memo.insert(contract, def.linearized_base_contracts.clone());
            visiting.remove(&contract);
            return Ok(def.linearized_base_contracts.clone());
        };

        // Bases are written most-basic first; the rightmost base is the closest to `contract`.
        let mut sequences = vec![];
        for base in written.iter().rev() {
            sequences.push(self.c3(*base, memo, visiting)?);
        }
        sequences.push(written.iter().rev().copied().collect());

        let mut lin = vec![contract];
        loop {
            sequences.retain(|seq| !seq.is_empty());
            if sequences.is_empty() {
                break;
            }
            let head = sequences
                .iter()
                .map(|seq| seq[0])
                .find(|candidate| !sequences.iter().any(|seq| seq[1..].contains(candidate)))
                .ok_or_else(|| {
                    InstrumentationError::Internal(format!(
                        "linearization of {contract} is impossible"
                    ))
                })?;
            lin.push(head);
            for seq in &mut sequences {
                if seq.first() == Some(&head) {
                    seq.remove(0);
                }
            }
        }

        visiting.remove(&contract);
        memo.insert(contract, lin.clone());
        Ok(lin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(ast: &mut SolAst, name: &str, bases: &[&str]) -> NodeId {
        ast.make_contract(name, ContractKind::Contract, bases)
    }

    #[test]
    fn test_insertion_keeps_parents() {
        let mut ast = SolAst::new();
        let a = ast.make_break();
        let b = ast.make_continue();
        let block = ast.make_block(vec![a]);

        ast.insert_before(block, a, b).unwrap();
        let c = ast.make_break();
        ast.insert_after(block, a, c).unwrap();
        let d = ast.make_continue();
        ast.insert_at_beginning(block, d).unwrap();

        let NodeKind::Block { statements } = ast.kind(block).unwrap() else { panic!() };
        assert_eq!(statements, &vec![d, b, a, c]);
        assert!(statements.iter().all(|s| ast.parent(*s) == Some(block)));

        assert!(ast.insert_before(block, NodeId(999), d).is_err());
    }

    #[test]
    fn test_replace_child() {
        let mut ast = SolAst::new();
        let x = ast.make_identifier("x", "uint256");
        let stmt = ast.make_expression_statement(x);
        let y = ast.make_identifier("y", "uint256");

        ast.replace_child(stmt, x, y).unwrap();
        assert_eq!(ast.children(stmt), vec![y]);
        assert_eq!(ast.parent(y), Some(stmt));
        assert_eq!(ast.parent(x), None);
        assert!(ast.replace_child(stmt, x, y).is_err());
    }

    #[test]
    fn test_closest_src_walks_up() {
        let mut ast = SolAst::new();
        let x = ast.make_identifier("x", "uint256");
        let stmt = ast.make_expression_statement(x);
        ast.node_mut(stmt).unwrap().src = Some(SrcRange::new(10, 5, 0));
        let c = contract(&mut ast, "C", &[]);
        ast.add_unit("a.sol", 0, vec![c]);

        assert_eq!(ast.closest_src(x), Some(SrcRange::new(10, 5, 0)));
        assert_eq!(ast.unit_path(c), Some("a.sol"));
        assert_eq!(ast.unit_path(x), None);
    }

    #[test]
    fn test_c3_linearization() {
        let mut ast = SolAst::new();
        let a = contract(&mut ast, "A", &[]);
        let b1 = contract(&mut ast, "B1", &["A"]);
        let b2 = contract(&mut ast, "B2", &["A"]);
        let d = contract(&mut ast, "D", &["B1", "B2"]);
        ast.add_unit("a.sol", 0, vec![a, b1, b2, d]);
        ast.link().unwrap();

        let lin = &ast.contract_definition(d).unwrap().linearized_base_contracts;
        assert_eq!(lin, &vec![d, b2, b1, a]);
        assert_eq!(ast.contract_definition(b1).unwrap().linearized_base_contracts, vec![b1, a]);
    }

    #[test]
    fn test_deep_copy_is_detached() {
        let mut ast = SolAst::new();
        let x = ast.make_identifier("x", "uint256");
        let one = ast.make_number(1);
        let sum = ast.make_binary("+", x, one, "uint256");
        let copy = ast.deep_copy(sum).unwrap();

        assert_ne!(copy, sum);
        assert_eq!(ast.parent(copy), None);
        let children = ast.children(copy);
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| ast.parent(*c) == Some(copy) && *c != x && *c != one));
    }
}
