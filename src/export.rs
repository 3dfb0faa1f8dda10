//! Tab-separated report export.
//!
//! Writes the result bundle as the three classic SAFE tables plus the full
//! score matrix. Every writer takes any `io::Write`; where the bytes go is
//! the caller's business.
//!
//! ```text
//! EnrichmentResult → write_node_properties()      → node_properties_annotation.txt
//!                  → write_domain_properties()    → domain_properties_annotation.txt
//!                  → write_attribute_properties() → attribute_properties_annotation.txt
//!                  → write_score_matrix()         → neighborhood_scores.txt
//! ```

use std::io::Write;

use crate::result::EnrichmentResult;
use crate::Result;

/// Placeholder for values that do not exist (not testable, no domain).
const MISSING: &str = "NA";

/// One line per node: key, label, primary domain and score, all domains.
pub fn write_node_properties(result: &EnrichmentResult, writer: &mut dyn Write) -> Result<()> {
    writeln!(writer, "id\tkey\tlabel\tdomain\tnes\tnum_domains\tdomains")?;
    for (node, id) in result.node_ids.iter().enumerate() {
        let (domain, nes) = match result.primary_domains[node] {
            Some(p) => (p.domain.to_string(), format_float(p.score)),
            None => (MISSING.to_string(), MISSING.to_string()),
        };
        let all = result.domains_of(node);
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            node,
            id,
            escape(&result.node_labels[node]),
            domain,
            nes,
            all.len(),
            join(all.iter().map(ToString::to_string)),
        )?;
    }
    Ok(())
}

/// One line per domain: id, label, representative attribute, size and
/// member attributes.
pub fn write_domain_properties(result: &EnrichmentResult, writer: &mut dyn Write) -> Result<()> {
    writeln!(writer, "id\tlabel\trepresentative\tnum_nodes\tattributes")?;
    for d in &result.domains {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}",
            d.id,
            escape(&d.label),
            d.representative,
            d.nodes.len(),
            join(d.attributes.iter().map(ToString::to_string)),
        )?;
    }
    Ok(())
}

/// One line per attribute with its enrichment footprint.
pub fn write_attribute_properties(result: &EnrichmentResult, writer: &mut dyn Write) -> Result<()> {
    writeln!(
        writer,
        "id\tname\tnum_neighborhoods_enriched\tnum_neighborhoods_depleted\tnum_connected_components\ttop\tdomains\tnot_testable"
    )?;
    for a in &result.attributes {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            a.id,
            escape(&a.name),
            a.enriched_nodes,
            a.depleted_nodes,
            a.components,
            a.eligible,
            join(a.domains.iter().map(ToString::to_string)),
            a.degeneracy.map_or(String::new(), |d| d.to_string()),
        )?;
    }
    Ok(())
}

/// Node × attribute matrix of signed scores; `NA` where not testable.
pub fn write_score_matrix(result: &EnrichmentResult, writer: &mut dyn Write) -> Result<()> {
    write!(writer, "key\tlabel")?;
    for a in &result.attributes {
        write!(writer, "\t{}", escape(&a.name))?;
    }
    writeln!(writer)?;

    for (node, id) in result.node_ids.iter().enumerate() {
        write!(writer, "{}\t{}", id, escape(&result.node_labels[node]))?;
        for score in result.scores.row(node) {
            match score {
                Some(s) => write!(writer, "\t{}", format_float(*s))?,
                None => write!(writer, "\t{MISSING}")?,
            }
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Signed score matrix as an Arrow batch: `key` plus one nullable
/// `Float64` column per attribute.
#[cfg(feature = "arrow-results")]
pub fn score_record_batch(result: &EnrichmentResult) -> Result<arrow_array::RecordBatch> {
    use std::sync::Arc;

    use arrow_array::{ArrayRef, Float64Array, RecordBatch, UInt64Array};
    use arrow_schema::{DataType, Field, Schema};

    let mut fields = vec![Field::new("key", DataType::UInt64, false)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(UInt64Array::from(
        result.node_ids.iter().map(|id| id.0).collect::<Vec<_>>(),
    ))];
    for (col, a) in result.attributes.iter().enumerate() {
        fields.push(Field::new(a.name.as_str(), DataType::Float64, true));
        let values: Vec<Option<f64>> = result.scores.column(col).copied().collect();
        columns.push(Arc::new(Float64Array::from(values)));
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Tabs and line breaks would shift columns.
fn escape(field: &str) -> String {
    field.replace(['\t', '\n', '\r'], " ")
}

fn join(items: impl Iterator<Item = String>) -> String {
    items.collect::<Vec<_>>().join(",")
}

fn format_float(x: f64) -> String {
    format!("{x:.6}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a\tb\nc"), "a b c");
    }

    #[test]
    fn test_join() {
        assert_eq!(join(std::iter::empty()), "");
        assert_eq!(join(["1", "2"].into_iter().map(String::from)), "1,2");
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(2.0), "2.000000");
        assert_eq!(format_float(-0.5), "-0.500000");
    }
}
