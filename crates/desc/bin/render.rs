use std::fmt::Write;

use eyre::{eyre, Result};
use scribe_instrumenter::InstrumentationMetadata;
use scribe_spec_lang::SrcRange;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

fn rule40() -> String {
    "-".repeat(40)
}

fn rule80() -> String {
    "-".repeat(80)
}

/// The metadata as pretty JSON indented by four spaces.
fn meta_json(meta: &InstrumentationMetadata) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    meta.serialize(&mut ser)?;
    Ok(String::from_utf8(buf)?)
}

/// The text `range` covers in `source`.
fn fragment<'a>(source: &'a str, range: &str) -> Result<&'a str> {
    let parsed: SrcRange = range.parse()?;
    parsed.fragment(source).ok_or_else(|| eyre!("range {range} is out of bounds"))
}

/// Lay out the input, the instrumented output and every metadata entry with the text it points
/// at.
pub fn render(
    file_name: &str,
    original: &str,
    instrumented: &str,
    meta: &InstrumentationMetadata,
) -> Result<String> {
    let (r40, r80) = (rule40(), rule80());
    let mut out = String::new();

    writeln!(out, "{r80}\nINPUT\n{r80}\n{file_name}\n{r80}\n{original}\n{r80}")?;
    writeln!(out, "INSTRUMENTATION\n{r80}\n{instrumented}\n{r80}")?;
    writeln!(out, "META\n{r80}\n{}\n{r80}", meta_json(meta)?)?;

    writeln!(out, "\nSOURCE-TO-SOURCE MAPPING (ORIGINAL -> INSTRUMENTED)\n{r80}")?;
    for (instr_src, orig_src) in &meta.instr_to_original_map {
        let instr = fragment(instrumented, instr_src)?;
        let orig = fragment(original, orig_src)?;
        writeln!(out, "{orig_src} -> {instr_src}\n{r40}")?;
        if instr == orig {
            writeln!(out, "{instr}")?;
        } else {
            writeln!(out, "{orig}\n{r40}\n{instr}")?;
        }
        writeln!(out, "{r80}")?;
    }

    writeln!(out, "\nOTHER INSTRUMENTATION\n{r80}")?;
    for src in &meta.other_instrumentation {
        writeln!(out, "{src}\n{r40}\n{}\n{r80}", fragment(instrumented, src)?)?;
    }

    writeln!(out, "\nPROPERTIES\n{r80}")?;
    for entry in &meta.property_map {
        writeln!(out, "ID: {}", entry.id)?;
        writeln!(out, "CONTRACT: {}", entry.contract)?;
        writeln!(out, "TARGET: {} {}", entry.target, entry.target_name)?;
        writeln!(out, "MESSAGE: {}", entry.message)?;

        writeln!(out, "{r40}\nPREDICATE\n{r40}\n{}\n{r40}", fragment(original, &entry.property_source)?)?;
        writeln!(out, "ANNOTATION\n{r40}\n{}\n{r40}", fragment(original, &entry.annotation_source)?)?;

        writeln!(out, "INSTRUMENTATION RANGES\n{r40}")?;
        for src in &entry.instrumentation_ranges {
            writeln!(out, "{}\n{r40}", fragment(instrumented, src)?)?;
        }
        writeln!(out, "CHECK RANGES\n{r40}")?;
        for src in &entry.check_ranges {
            writeln!(out, "{}\n{r40}", fragment(instrumented, src)?)?;
        }
        writeln!(out, "{r80}")?;
    }

    Ok(out)
}
