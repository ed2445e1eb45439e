//! Batched annotation of a whole variant list.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};
use variantflow_shared::{AnnotationConfig, Result, TaskProgress, Variant};

use crate::input::{build_batch_input, variant_key};
use crate::output::parse_tool_output;
use crate::tool::AnnotationTool;

/// Receives progress checkpoints. A failing checkpoint aborts the run.
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn checkpoint(&self, progress: TaskProgress) -> Result<()>;
}

/// Sink that drops every checkpoint.
pub struct NoCheckpoints;

#[async_trait]
impl CheckpointSink for NoCheckpoints {
    async fn checkpoint(&self, _progress: TaskProgress) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationStats {
    pub total_variants: usize,
    pub batches: usize,
    /// Output lines that matched a variant.
    pub matched: usize,
    /// Output lines whose position matched no variant.
    pub unmatched: usize,
    pub skipped_lines: usize,
    /// Variants that ended up with a gene symbol.
    pub with_gene: usize,
}

/// Drives the annotation tool over fixed-size batches.
pub struct AnnotationRunner {
    tool: Arc<dyn AnnotationTool>,
    batch_size: usize,
    checkpoint_every: usize,
}

impl AnnotationRunner {
    pub fn new(tool: Arc<dyn AnnotationTool>, batch_size: usize, checkpoint_every: usize) -> Self {
        Self {
            tool,
            batch_size: batch_size.max(1),
            checkpoint_every: checkpoint_every.max(1),
        }
    }

    pub fn from_config(tool: Arc<dyn AnnotationTool>, config: &AnnotationConfig) -> Self {
        Self::new(tool, config.batch_size, config.checkpoint_every)
    }

    pub fn total_batches(&self, variant_count: usize) -> usize {
        variant_count.div_ceil(self.batch_size)
    }

    /// Annotate every variant, returning the enriched list.
    ///
    /// Any tool failure aborts the run; work already merged into earlier
    /// batches is discarded with it. Checkpoints go out every
    /// `checkpoint_every` batches and after the last one.
    #[instrument(skip_all, fields(variants = variants.len(), batch_size = self.batch_size))]
    pub async fn run(
        &self,
        mut variants: Vec<Variant>,
        sink: &dyn CheckpointSink,
    ) -> Result<(Vec<Variant>, AnnotationStats)> {
        let total = variants.len();
        let total_batches = self.total_batches(total);
        let mut stats = AnnotationStats {
            total_variants: total,
            ..AnnotationStats::default()
        };

        // Last variant at a position wins.
        let index: HashMap<String, usize> = variants
            .iter()
            .enumerate()
            .map(|(i, v)| (variant_key(v), i))
            .collect();

        info!(total_batches, "starting annotation");

        for batch_idx in 0..total_batches {
            let start = batch_idx * self.batch_size;
            let end = (start + self.batch_size).min(total);
            let batch_num = batch_idx + 1;

            info!(batch = batch_num, total_batches, size = end - start, "annotating batch");

            let input = build_batch_input(&variants[start..end]);
            let stdout = self.tool.run_batch(input).await?;
            let parsed = parse_tool_output(&stdout);

            let mut matched = 0;
            for hit in &parsed.hits {
                match index.get(&hit.key) {
                    Some(&i) => {
                        hit.apply_to(&mut variants[i].info);
                        matched += 1;
                    }
                    None => stats.unmatched += 1,
                }
            }
            stats.matched += matched;
            stats.skipped_lines += parsed.skipped_lines;
            stats.batches = batch_num;

            info!(
                batch = batch_num,
                total_batches,
                matched,
                skipped = parsed.skipped_lines,
                "batch annotated"
            );

            if batch_num % self.checkpoint_every == 0 || batch_num == total_batches {
                sink.checkpoint(TaskProgress::at_batch(batch_num, total_batches, end, total))
                    .await?;
            }

            tokio::task::yield_now().await;
        }

        stats.with_gene = variants.iter().filter(|v| v.gene().is_some()).count();
        info!(
            matched = stats.matched,
            with_gene = stats.with_gene,
            skipped = stats.skipped_lines,
            "annotation complete"
        );
        Ok((variants, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use variantflow_shared::{Impact, VariantFlowError};

    /// Answers every input row with a fixed gene, remembering batch sizes.
    struct EchoTool {
        gene: &'static str,
        batches: Mutex<Vec<usize>>,
        fail_on_batch: Option<usize>,
    }

    impl EchoTool {
        fn new(gene: &'static str) -> Self {
            Self {
                gene,
                batches: Mutex::new(Vec::new()),
                fail_on_batch: None,
            }
        }
    }

    #[async_trait]
    impl AnnotationTool for EchoTool {
        async fn run_batch(&self, input: String) -> Result<String> {
            let rows: Vec<&str> = input.lines().filter(|l| !l.starts_with('#')).collect();
            let batch_no = {
                let mut batches = self.batches.lock().unwrap();
                batches.push(rows.len());
                batches.len()
            };
            if self.fail_on_batch == Some(batch_no) {
                return Err(VariantFlowError::Annotation("tool crashed".into()));
            }

            let mut out = String::from("not json at all\n");
            for row in rows {
                let mut cols = row.split('\t');
                let chrom = cols.next().unwrap();
                let pos = cols.next().unwrap();
                out.push_str(&format!(
                    "{{\"input\":\"{chrom}\\t{pos}\",\"transcript_consequences\":[{{\"gene_symbol\":\"{}\",\"consequence_terms\":[\"missense_variant\"],\"impact\":\"MODERATE\"}}]}}\n",
                    self.gene
                ));
            }
            Ok(out)
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<TaskProgress>>);

    #[async_trait]
    impl CheckpointSink for RecordingSink {
        async fn checkpoint(&self, progress: TaskProgress) -> Result<()> {
            self.0.lock().unwrap().push(progress);
            Ok(())
        }
    }

    fn variants(n: usize) -> Vec<Variant> {
        (0..n)
            .map(|i| Variant::new("chr2", 1000 + i as u64, "A", vec!["G".into()]))
            .collect()
    }

    #[tokio::test]
    async fn annotates_every_variant_in_batches() {
        let tool = Arc::new(EchoTool::new("MSH6"));
        let runner = AnnotationRunner::new(tool.clone(), 4, 1);
        let sink = RecordingSink::default();

        let (out, stats) = runner.run(variants(10), &sink).await.expect("run");

        assert_eq!(*tool.batches.lock().unwrap(), vec![4, 4, 2]);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.matched, 10);
        assert_eq!(stats.skipped_lines, 3);
        assert_eq!(stats.with_gene, 10);
        assert!(out.iter().all(|v| v.gene() == Some("MSH6")));
        assert_eq!(out[0].info.impact, Some(Impact::Moderate));
        assert_eq!(out[0].info.consequences, vec!["missense_variant".to_string()]);
    }

    #[tokio::test]
    async fn checkpoints_every_n_batches_and_at_end() {
        let runner = AnnotationRunner::new(Arc::new(EchoTool::new("TP53")), 2, 2);
        let sink = RecordingSink::default();

        runner.run(variants(9), &sink).await.expect("run");

        let seen: Vec<usize> = sink.0.lock().unwrap().iter().map(|p| p.current_batch).collect();
        assert_eq!(seen, vec![2, 4, 5]);
        let last = sink.0.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.progress_pct, 100.0);
        assert_eq!(last.variants_processed, 9);
    }

    #[tokio::test]
    async fn tool_failure_aborts_run() {
        let tool = Arc::new(EchoTool {
            fail_on_batch: Some(2),
            ..EchoTool::new("APC")
        });
        let runner = AnnotationRunner::new(tool.clone(), 3, 1);
        let sink = RecordingSink::default();

        let err = runner.run(variants(9), &sink).await.unwrap_err();
        assert!(matches!(err, VariantFlowError::Annotation(_)));
        assert_eq!(tool.batches.lock().unwrap().len(), 2);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_position_last_variant_wins() {
        let vs = vec![
            Variant::new("1", 500, "A", vec!["G".into()]),
            Variant::new("chr1", 500, "A", vec!["T".into()]),
        ];
        let runner = AnnotationRunner::new(Arc::new(EchoTool::new("LDLR")), 10, 1);
        let (out, stats) = runner.run(vs, &NoCheckpoints).await.unwrap();
        assert_eq!(stats.matched, 2);
        assert_eq!(out[0].gene(), None);
        assert_eq!(out[1].gene(), Some("LDLR"));
    }

    #[tokio::test]
    async fn empty_input_runs_no_batches() {
        let tool = Arc::new(EchoTool::new("X"));
        let runner = AnnotationRunner::new(tool.clone(), 10, 1);
        let (out, stats) = runner.run(Vec::new(), &NoCheckpoints).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(stats.batches, 0);
        assert!(tool.batches.lock().unwrap().is_empty());
    }
}
