// ============================================================
// Layer 4 — Prefix Dataset
// ============================================================
// Builds the in-memory dataset for one split and one task.
//
// Tokenization is expensive, so every record is tokenized
// exactly once here and the resulting masked examples are
// cached; nothing is mutated after construction.
//
// The per-dataset sequence capacity is a statistical cap over
// the whole corpus:
//
//   max_seq_len = min(mean_len + 10 * std_len, max_len)
//
// which trims extreme outliers while keeping near-complete
// coverage, and is frozen for the dataset's lifetime.

use anyhow::Result;
use burn::data::dataset::Dataset;
use tokenizers::Tokenizer;

use crate::data::masking::{MaskedExample, SupervisionMaskBuilder};
use crate::data::storage::{CaptionSplit, QaSplit};
use crate::domain::policy::OverflowPolicy;

/// One dataset record, fully tokenized and masked, with its
/// visual embedding resolved from the split's embedding array.
#[derive(Debug, Clone)]
pub struct PrefixExample {
    pub tokens:         Vec<u32>,
    pub attention_mask: Vec<f32>,
    pub loss_mask:      Vec<f32>,
    pub visual:         Vec<f32>,
}

/// Ground-truth metadata kept per example for the evaluation
/// record file (aligned index-for-index with the examples).
#[derive(Debug, Clone)]
pub struct ExampleMeta {
    pub image_id:  i64,
    pub question:  Option<String>,
    pub reference: String,
}

/// A tokenized, masked dataset split for one task.
pub struct PrefixDataset {
    examples:          Vec<PrefixExample>,
    meta:              Vec<ExampleMeta>,
    pub prefix_length: usize,
    pub max_seq_len:   usize,
    pub embedding_dim: usize,
}

/// `min(mean + 10 * std, max)` over the corpus token lengths.
/// Sample standard deviation (n - 1), matching the reference
/// statistics; a corpus of fewer than two sequences gets its
/// maximum length directly.
pub fn statistical_cap(lengths: &[usize]) -> usize {
    let max = lengths.iter().copied().max().unwrap_or(0);
    if lengths.len() < 2 {
        return max;
    }
    let n = lengths.len() as f64;
    let mean = lengths.iter().map(|&l| l as f64).sum::<f64>() / n;
    let var = lengths
        .iter()
        .map(|&l| (l as f64 - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    let cap = (mean + 10.0 * var.sqrt()) as usize;
    cap.min(max)
}

fn encode_ids(tokenizer: &Tokenizer, text: &str) -> Result<Vec<u32>> {
    let enc = tokenizer
        .encode(text, false)
        .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
    Ok(enc.get_ids().to_vec())
}

/// L2-normalize a visual embedding in place (skipped for the
/// zero vector).
fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

impl PrefixDataset {
    /// Build a captioning dataset: tokenize every caption,
    /// freeze the statistical length cap, derive masks.
    pub fn captioning(
        split:            &CaptionSplit,
        tokenizer:        &Tokenizer,
        prefix_length:    usize,
        normalize_prefix: bool,
    ) -> Result<Self> {
        split.validate(|r| r.embedding_index)?;

        let token_lists: Vec<Vec<u32>> = split
            .records
            .iter()
            .map(|r| encode_ids(tokenizer, &r.caption))
            .collect::<Result<_>>()?;

        let lengths: Vec<usize> = token_lists.iter().map(|t| t.len()).collect();
        let max_seq_len = statistical_cap(&lengths);
        tracing::info!(
            "Captioning split: {} records, max_seq_len={}",
            split.records.len(),
            max_seq_len
        );

        let builder = SupervisionMaskBuilder::new(prefix_length, max_seq_len);
        let mut examples = Vec::with_capacity(split.records.len());
        let mut meta = Vec::with_capacity(split.records.len());

        for (record, ids) in split.records.iter().zip(&token_lists) {
            let masked = builder.caption_example(ids);
            examples.push(Self::resolve(masked, split, record.embedding_index, normalize_prefix));
            meta.push(ExampleMeta {
                image_id:  record.image_id,
                question:  None,
                reference: record.caption.clone(),
            });
        }

        Ok(Self {
            examples,
            meta,
            prefix_length,
            max_seq_len,
            embedding_dim: split.embedding_dim(),
        })
    }

    /// Build a question-answering dataset. The token sequence is
    /// "question answer" plus one end-of-sequence marker; the
    /// loss mask covers the answer span only. Overflowing pairs
    /// are handled per `overflow`.
    pub fn question_answering(
        split:            &QaSplit,
        tokenizer:        &Tokenizer,
        prefix_length:    usize,
        normalize_prefix: bool,
        overflow:         OverflowPolicy,
        eos_token_id:     u32,
    ) -> Result<Self> {
        split.validate(|r| r.embedding_index)?;

        struct Tokenized {
            ids:   Vec<u32>,
            q_len: usize,
            a_len: usize,
        }

        let mut tokenized = Vec::with_capacity(split.records.len());
        for record in &split.records {
            let mut ids = encode_ids(tokenizer, &format!("{} {}", record.question, record.answer))?;
            ids.push(eos_token_id);
            let q_len = encode_ids(tokenizer, &record.question)?.len();
            // answer length includes the trailing end marker
            let a_len = encode_ids(tokenizer, &record.answer)?.len() + 1;
            tokenized.push(Tokenized { ids, q_len, a_len });
        }

        let lengths: Vec<usize> = tokenized.iter().map(|t| t.ids.len()).collect();
        let max_seq_len = statistical_cap(&lengths);
        tracing::info!(
            "QA split: {} records, max_seq_len={}",
            split.records.len(),
            max_seq_len
        );

        let builder = SupervisionMaskBuilder::new(prefix_length, max_seq_len);
        let mut examples = Vec::new();
        let mut meta = Vec::new();
        let mut dropped = 0usize;
        let mut overflowed = 0usize;

        for (record, tok) in split.records.iter().zip(&tokenized) {
            if tok.q_len + tok.a_len > max_seq_len {
                overflowed += 1;
            }
            match builder.qa_example(&tok.ids, tok.q_len, tok.a_len, overflow) {
                Some(masked) => {
                    examples.push(Self::resolve(
                        masked,
                        split,
                        record.embedding_index,
                        normalize_prefix,
                    ));
                    meta.push(ExampleMeta {
                        image_id:  record.image_id,
                        question:  Some(record.question.clone()),
                        reference: record.answer.clone(),
                    });
                }
                None => dropped += 1,
            }
        }

        if overflowed > 0 {
            tracing::warn!(
                "{} QA pairs exceed max_seq_len={} ({} dropped, {} kept with zero supervision)",
                overflowed,
                max_seq_len,
                dropped,
                overflowed - dropped
            );
        }

        Ok(Self {
            examples,
            meta,
            prefix_length,
            max_seq_len,
            embedding_dim: split.embedding_dim(),
        })
    }

    fn resolve<R>(
        masked:           MaskedExample,
        split:            &crate::data::storage::SplitStorage<R>,
        embedding_index:  usize,
        normalize_prefix: bool,
    ) -> PrefixExample {
        let mut visual = split.embeddings[embedding_index].clone();
        if normalize_prefix {
            l2_normalize(&mut visual);
        }
        PrefixExample {
            tokens:         masked.tokens,
            attention_mask: masked.attention_mask,
            loss_mask:      masked.loss_mask,
            visual,
        }
    }

    pub fn meta(&self) -> &[ExampleMeta] {
        &self.meta
    }

    pub fn sample_count(&self) -> usize {
        self.examples.len()
    }
}

impl Dataset<PrefixExample> for PrefixDataset {
    fn get(&self, index: usize) -> Option<PrefixExample> {
        self.examples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.examples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::{CaptionRecord, QaRecord};
    use crate::infra::tokenizer_store::build_word_level;

    fn tokenizer() -> Tokenizer {
        build_word_level(&["a dog runs fast", "a cat sits still", "what color is the dog brown"])
            .unwrap()
    }

    #[test]
    fn test_statistical_cap_trims_outliers() {
        // 99 sequences of length 10, one of length 10_000:
        // mean + 10 * std stays far below the outlier
        let mut lengths = vec![10usize; 99];
        lengths.push(10_000);
        let cap = statistical_cap(&lengths);
        assert!(cap < 10_000);
        assert!(cap >= 10);
    }

    #[test]
    fn test_statistical_cap_never_exceeds_max() {
        assert_eq!(statistical_cap(&[3, 3, 3, 3]), 3);
        assert_eq!(statistical_cap(&[7]), 7);
        assert_eq!(statistical_cap(&[]), 0);
    }

    #[test]
    fn test_caption_dataset_mask_lengths() {
        let split = CaptionSplit {
            embeddings: vec![vec![0.5; 8]],
            records:    vec![
                CaptionRecord { image_id: 1, caption: "a dog runs".into(), embedding_index: 0 },
                CaptionRecord { image_id: 1, caption: "a cat sits".into(), embedding_index: 0 },
            ],
        };
        let ds = PrefixDataset::captioning(&split, &tokenizer(), 10, false).unwrap();
        assert_eq!(ds.sample_count(), 2);
        let ex = ds.get(0).unwrap();
        assert_eq!(ex.attention_mask.len(), 10 + ds.max_seq_len);
        assert_eq!(ex.loss_mask.len(), 10 + ds.max_seq_len);
        assert_eq!(ex.visual.len(), 8);
    }

    #[test]
    fn test_normalize_prefix_gives_unit_norm() {
        let split = CaptionSplit {
            embeddings: vec![vec![3.0, 4.0]],
            records:    vec![CaptionRecord {
                image_id: 1, caption: "a dog".into(), embedding_index: 0,
            }],
        };
        let ds = PrefixDataset::captioning(&split, &tokenizer(), 4, true).unwrap();
        let v = ds.get(0).unwrap().visual;
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_qa_dataset_keeps_metadata_aligned_under_drop() {
        let split = QaSplit {
            embeddings: vec![vec![0.1; 4]],
            records:    vec![
                QaRecord {
                    image_id: 7,
                    question:  "what color is the dog".into(),
                    answer:    "brown".into(),
                    embedding_index: 0,
                },
                QaRecord {
                    image_id: 8,
                    question:  "is the cat still".into(),
                    answer:    "still".into(),
                    embedding_index: 0,
                },
            ],
        };
        let tok = tokenizer();
        let ds = PrefixDataset::question_answering(
            &split, &tok, 10, false, OverflowPolicy::ZeroSupervision, 3,
        )
        .unwrap();
        assert_eq!(ds.sample_count(), ds.meta().len());
        assert_eq!(ds.meta()[0].image_id, 7);
        assert_eq!(ds.meta()[1].reference, "still");
    }
}
