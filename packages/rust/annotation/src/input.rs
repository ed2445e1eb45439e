//! Positional text form sent to the annotation tool.

use variantflow_shared::Variant;

const VCF_HEADER: &str = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";

/// Join key between a variant and the tool's output lines.
///
/// Only chromosome (without `chr`) and position: two events at the same
/// position share a key and the last one wins.
pub fn position_key(chrom: &str, pos: &str) -> String {
    let chrom = chrom.strip_prefix("chr").unwrap_or(chrom);
    format!("{chrom}:{pos}")
}

pub fn variant_key(variant: &Variant) -> String {
    format!("{}:{}", variant.bare_chrom(), variant.pos())
}

/// Minimal VCF for one batch: header plus one `PASS` row per variant.
pub fn build_batch_input(batch: &[Variant]) -> String {
    let mut out = String::with_capacity(VCF_HEADER.len() + batch.len() * 32);
    out.push_str(VCF_HEADER);
    for v in batch {
        out.push_str(v.bare_chrom());
        out.push('\t');
        out.push_str(&v.pos().to_string());
        out.push_str("\t.\t");
        out.push_str(v.reference());
        out.push('\t');
        out.push_str(&v.alts().join(","));
        out.push_str("\t.\tPASS\t.\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_input_rows() {
        let batch = vec![
            Variant::new("chr1", 12345, "A", vec!["G".into()]),
            Variant::new("X", 99, "AT", vec!["A".into(), "ATT".into()]),
        ];
        let text = build_batch_input(&batch);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "##fileformat=VCFv4.2");
        assert!(lines[1].starts_with("#CHROM\tPOS"));
        assert_eq!(lines[2], "1\t12345\t.\tA\tG\t.\tPASS\t.");
        assert_eq!(lines[3], "X\t99\t.\tAT\tA,ATT\t.\tPASS\t.");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn keys_ignore_chr_prefix() {
        let v = Variant::new("chr7", 117559590, "G", vec!["A".into()]);
        assert_eq!(variant_key(&v), "7:117559590");
        assert_eq!(position_key("chr7", "117559590"), variant_key(&v));
        assert_eq!(position_key("7", "117559590"), variant_key(&v));
    }
}
