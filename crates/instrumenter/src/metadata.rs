//! The instrumentation metadata consumed by downstream tooling.
//!
//! Ranges are `"offset:length:fileIndex"` strings. Instrumented ranges index into
//! `instrSourceList`, original ranges into `originalSourceList`.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use scribe_spec_lang::{AnnotationType, SrcRange};

use crate::{
    annotations::Annotations,
    ast::{printer::PrintedSources, NodeId, SolAst},
    context::InstrumentationContext,
    error::{InstrumentationError, Result},
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationMetadata {
    /// `[instrumented, original]` pairs.
    pub instr_to_original_map: Vec<(String, String)>,
    pub other_instrumentation: Vec<String>,
    pub property_map: Vec<PropertyDesc>,
    pub original_source_list: Vec<String>,
    pub instr_source_list: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDesc {
    pub id: usize,
    pub contract: String,
    pub filename: String,
    /// Range of the bare predicate.
    pub property_source: String,
    /// Range of the whole annotation text.
    pub annotation_source: String,
    /// `contract`, `function` or `statement`.
    pub target: String,
    pub target_name: String,
    /// `[ranges of the identifier, type]` per value of the `AssertionFailedData` payload.
    pub debug_event_encoding: Vec<(Vec<String>, String)>,
    pub message: String,
    pub instrumentation_ranges: Vec<String>,
    pub check_ranges: Vec<String>,
    pub assertion_ranges: Vec<String>,
}

impl InstrumentationMetadata {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| InstrumentationError::Internal(format!("cannot serialize metadata: {err}")))
    }
}

/// Printed ranges of `nodes`, sorted and deduplicated. Nodes that were not printed are skipped.
fn printed_ranges(printed: &PrintedSources, nodes: &[NodeId]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|node| printed.range_of(*node))
        .sorted_by_key(|range| (range.file_index, range.offset, range.length))
        .dedup()
        .map(|range| range.to_string())
        .collect()
}

fn sort_key(range: &SrcRange) -> (usize, usize, usize) {
    (range.file_index, range.offset, range.length)
}

pub fn generate_metadata(
    ast: &SolAst,
    ctx: &InstrumentationContext,
    annotations: &Annotations,
    original_units: &[NodeId],
    printed: &PrintedSources,
) -> Result<InstrumentationMetadata> {
    let no_nodes = vec![];
    let mut instr_to_original_map = vec![];
    let mut property_map = vec![];

    for annot in annotations.iter() {
        // `#let` bindings are general instrumentation and `#define`s are not checks.
        if !annot.is_property() || annot.kind == AnnotationType::LetAnnotation {
            continue;
        }
        let annotation_range = annot.annotation_range()?;
        let nodes = ctx.records.annotation.get(&annot.id).unwrap_or(&no_nodes);

        instr_to_original_map.extend(
            nodes
                .iter()
                .filter_map(|node| printed.range_of(*node))
                .sorted_by_key(sort_key)
                .map(|range| (range.to_string(), annotation_range.to_string())),
        );

        let target = ctx.targets.get(&annot.id).ok_or_else(|| {
            InstrumentationError::Internal(format!("no target snapshot for annotation {}", annot.id))
        })?;
        let debug_event_encoding = ctx
            .debug_events
            .get(&annot.id)
            .map(|values| {
                values
                    .iter()
                    .map(|value| {
                        (value.ranges.iter().map(ToString::to_string).collect(), value.type_string.clone())
                    })
                    .collect()
            })
            .unwrap_or_default();

        property_map.push(PropertyDesc {
            id: annot.id,
            contract: target.contract.clone(),
            filename: target.filename.clone(),
            property_source: annot.expression_range()?.to_string(),
            annotation_source: annotation_range.to_string(),
            target: target.kind.to_string(),
            target_name: target.name.clone(),
            debug_event_encoding,
            message: annot.message.clone(),
            instrumentation_ranges: printed_ranges(printed, nodes),
            check_ranges: printed_ranges(printed, ctx.records.checks.get(&annot.id).unwrap_or(&no_nodes)),
            assertion_ranges: printed_ranges(
                printed,
                ctx.records.failures.get(&annot.id).unwrap_or(&no_nodes),
            ),
        });
    }

    // Printed nodes that come from the original program map back to themselves.
    let originals = printed
        .ranges
        .iter()
        .filter_map(|(node, printed_range)| {
            let original = ast.node(*node).ok()?.src?;
            Some((*printed_range, original))
        })
        .sorted_by_key(|(printed_range, _)| sort_key(printed_range))
        .map(|(printed_range, original)| (printed_range.to_string(), original.to_string()));
    instr_to_original_map.extend(originals);

    let other_instrumentation = printed_ranges(printed, &ctx.records.general);

    let original_source_list = original_units
        .iter()
        .map(|unit| ast.source_unit(*unit).map(|unit| (unit.file_index, unit.path.clone())))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .sorted()
        .map(|(_, path)| path)
        .collect();
    let instr_source_list = printed.units.iter().map(|unit| unit.path.clone()).collect();

    Ok(InstrumentationMetadata {
        instr_to_original_map,
        other_instrumentation,
        property_map,
        original_source_list,
        instr_source_list,
    })
}
