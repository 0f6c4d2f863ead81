//! Answer-ranking evaluation: accuracy and Hits@1/5/10.
//!
//! Every question is scored against the full entity table. The head entity
//! is pushed to the bottom of the ranking before the prediction is taken, so
//! a model cannot answer a question with its own topic entity.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};

use metaqa::{PreparedEntities, QaRecord, Vocabulary};

use crate::model::EntityScorer;
use crate::training::data::{encode_record, QaBatcher, QaItem};

/// Subtracted from the head entity's score before ranking.
pub const HEAD_MASK_PENALTY: f32 = 99999.0;

/// Candidates kept per question in the candidate dump.
pub const DUMP_TOP_K: usize = 200;

/// Largest k reported by Hits@k.
const MAX_HIT_K: usize = 10;

/// Evaluation settings.
#[derive(Debug, Clone, Copy)]
pub struct EvalOptions {
    /// Questions scored per forward pass.
    pub batch_size: usize,
    /// Top candidates kept on each [`SampleEval`]; 0 keeps none.
    pub keep_candidates: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            batch_size: 128,
            keep_candidates: 0,
        }
    }
}

/// A ranked candidate answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub entity: usize,
    pub score: f32,
}

/// Result for one successfully scored question.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleEval {
    pub question: String,
    pub head: usize,
    pub answers: Vec<usize>,
    /// Highest-scoring entity after head masking.
    pub prediction: usize,
    /// `prediction` is a gold answer.
    pub correct: bool,
    pub hit_at_1: bool,
    pub hit_at_5: bool,
    pub hit_at_10: bool,
    /// Best candidates in rank order, up to [`EvalOptions::keep_candidates`].
    pub candidates: Vec<Candidate>,
}

/// Per-question evaluation result.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Scored(SampleEval),
    /// The question could not be encoded; excluded from every metric.
    Failed { question: String, reason: String },
}

/// Aggregate metrics over a set of outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct EvalReport {
    pub total: usize,
    pub scored: usize,
    pub errors: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub hits_at_1: f64,
    pub hits_at_5: f64,
    pub hits_at_10: f64,
}

impl EvalReport {
    /// Aggregate outcomes. Rates are over scored samples only; 0.0 if none.
    pub fn from_outcomes(outcomes: &[SampleOutcome]) -> Self {
        let mut report = EvalReport {
            total: outcomes.len(),
            ..Default::default()
        };
        let (mut h1, mut h5, mut h10) = (0usize, 0usize, 0usize);
        for outcome in outcomes {
            match outcome {
                SampleOutcome::Scored(s) => {
                    report.scored += 1;
                    report.correct += s.correct as usize;
                    h1 += s.hit_at_1 as usize;
                    h5 += s.hit_at_5 as usize;
                    h10 += s.hit_at_10 as usize;
                }
                SampleOutcome::Failed { .. } => report.errors += 1,
            }
        }
        if report.scored > 0 {
            let n = report.scored as f64;
            report.accuracy = report.correct as f64 / n;
            report.hits_at_1 = h1 as f64 / n;
            report.hits_at_5 = h5 as f64 / n;
            report.hits_at_10 = h10 as f64 / n;
        }
        report
    }
}

/// Outcomes in input order plus their aggregate.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub outcomes: Vec<SampleOutcome>,
    pub report: EvalReport,
}

/// Push the head entity to the bottom of the ranking.
pub fn mask_head(scores: &mut [f32], head: usize) {
    if let Some(s) = scores.get_mut(head) {
        *s -= HEAD_MASK_PENALTY;
    }
}

/// Indices of the `k` highest scores, best first. Ties go to the lower index.
pub fn top_k(scores: &[f32], k: usize) -> Vec<usize> {
    let by_rank = |a: &usize, b: &usize| scores[*b].total_cmp(&scores[*a]).then(a.cmp(b));
    let mut idx: Vec<usize> = (0..scores.len()).collect();
    if k < idx.len() {
        idx.select_nth_unstable_by(k, by_rank);
        idx.truncate(k);
    }
    idx.sort_by(by_rank);
    idx
}

/// Rank one question's scores. `scores` is modified by head masking.
pub fn score_sample(item: &QaItem, scores: &mut [f32], keep_candidates: usize) -> SampleEval {
    mask_head(scores, item.head);
    let ranked = top_k(scores, MAX_HIT_K.max(keep_candidates).max(1));
    let in_top = |k: usize| ranked.iter().take(k).any(|e| item.answers.contains(e));

    let prediction = ranked[0];
    SampleEval {
        question: item.question.clone(),
        head: item.head,
        answers: item.answers.clone(),
        prediction,
        correct: item.answers.contains(&prediction),
        hit_at_1: in_top(1),
        hit_at_5: in_top(5),
        hit_at_10: in_top(10),
        candidates: ranked
            .iter()
            .take(keep_candidates)
            .map(|&entity| Candidate {
                entity,
                score: scores[entity],
            })
            .collect(),
    }
}

pub(crate) fn progress_bar(len: usize, message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(message);
    pb
}

/// Evaluate `model` on raw records.
///
/// Records that fail to encode become [`SampleOutcome::Failed`]; the rest are
/// scored in chunks of `options.batch_size`.
pub fn evaluate<B: Backend, M: EntityScorer<B>>(
    model: &M,
    records: &[QaRecord],
    vocab: &Vocabulary,
    entities: &PreparedEntities,
    options: &EvalOptions,
    device: &B::Device,
) -> anyhow::Result<Evaluation> {
    let num_entities = model.num_entities();
    if num_entities == 0 || num_entities != entities.len() {
        anyhow::bail!(
            "model scores {num_entities} entities but the entity index has {}",
            entities.len()
        );
    }

    let mut outcomes: Vec<Option<SampleOutcome>> = vec![None; records.len()];
    let mut pending: Vec<(usize, QaItem)> = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        match encode_record(record, vocab, entities) {
            Ok(item) => pending.push((i, item)),
            Err(e) => {
                tracing::debug!(question = %record.question, error = %e, "Sample failed to encode");
                outcomes[i] = Some(SampleOutcome::Failed {
                    question: record.question.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let batcher = QaBatcher::<B>::new(device.clone(), num_entities);
    let pb = progress_bar(records.len(), "evaluating");
    pb.inc((records.len() - pending.len()) as u64);

    for chunk in pending.chunks(options.batch_size.max(1)) {
        let items: Vec<QaItem> = chunk.iter().map(|(_, item)| item.clone()).collect();
        let batch = batcher.batch(items);
        let scores = model.score_entities(batch.tokens, batch.mask, batch.heads);
        let mut flat = scores
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Failed to read scores: {e:?}"))?;

        for ((i, item), row) in chunk.iter().zip(flat.chunks_mut(num_entities)) {
            outcomes[*i] = Some(SampleOutcome::Scored(score_sample(
                item,
                row,
                options.keep_candidates,
            )));
        }
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();

    let outcomes: Vec<SampleOutcome> = outcomes.into_iter().flatten().collect();
    let report = EvalReport::from_outcomes(&outcomes);
    tracing::info!(
        total = report.total,
        errors = report.errors,
        accuracy = %format!("{:.4}", report.accuracy),
        hits_at_1 = %format!("{:.4}", report.hits_at_1),
        hits_at_5 = %format!("{:.4}", report.hits_at_5),
        hits_at_10 = %format!("{:.4}", report.hits_at_10),
        "Evaluation finished"
    );
    Ok(Evaluation { outcomes, report })
}

#[derive(serde::Serialize)]
struct DumpedCandidate<'a> {
    entity: &'a str,
    score: f32,
}

#[derive(serde::Serialize)]
struct DumpedQuestion<'a> {
    question: &'a str,
    head: &'a str,
    candidates: Vec<DumpedCandidate<'a>>,
    answers: Vec<&'a str>,
}

fn entity_name(entities: &PreparedEntities, id: usize) -> anyhow::Result<&str> {
    entities
        .name(id)
        .ok_or_else(|| anyhow::anyhow!("entity id {id} out of range"))
}

/// Write one JSON object per scored question with its top candidates.
pub fn write_candidates(
    path: &Path,
    outcomes: &[SampleOutcome],
    entities: &PreparedEntities,
) -> anyhow::Result<()> {
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    for outcome in outcomes {
        let SampleOutcome::Scored(s) = outcome else {
            continue;
        };
        let line = DumpedQuestion {
            question: &s.question,
            head: entity_name(entities, s.head)?,
            candidates: s
                .candidates
                .iter()
                .map(|c| {
                    Ok(DumpedCandidate {
                        entity: entity_name(entities, c.entity)?,
                        score: c.score,
                    })
                })
                .collect::<anyhow::Result<_>>()?,
            answers: s
                .answers
                .iter()
                .map(|&a| entity_name(entities, a))
                .collect::<anyhow::Result<_>>()?,
        };
        serde_json::to_writer(&mut out, &line)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    tracing::info!(path = %path.display(), "Wrote candidate dump");
    Ok(())
}

/// Write `question<TAB>predicted entity id<TAB>1|0` per scored question.
pub fn write_predictions(path: &Path, outcomes: &[SampleOutcome]) -> anyhow::Result<()> {
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    for outcome in outcomes {
        if let SampleOutcome::Scored(s) = outcome {
            writeln!(out, "{}\t{}\t{}", s.question, s.prediction, u8::from(s.correct))?;
        }
    }
    out.flush()?;
    tracing::info!(path = %path.display(), "Wrote predictions");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;
    use metaqa::{DictLayout, EmbeddingMatrix, EntityIndex};

    type TestBackend = NdArray<f32>;

    fn item(head: usize, answers: Vec<usize>) -> QaItem {
        QaItem {
            head,
            tokens: vec![0],
            answers,
            len: 1,
            question: "q NE".to_string(),
        }
    }

    #[test]
    fn test_head_is_masked() {
        let mut scores = vec![0.0_f32; 8];
        scores[5] = 100.0;
        scores[2] = 3.0;
        let eval = score_sample(&item(5, vec![2]), &mut scores, 0);
        assert_eq!(eval.prediction, 2);
        assert!(eval.correct);
        assert!(eval.hit_at_1);
    }

    #[test]
    fn test_top_k_order_and_ties() {
        let scores = [0.5_f32, 2.0, 2.0, -1.0, 1.0];
        assert_eq!(top_k(&scores, 3), vec![1, 2, 4]);
        assert_eq!(top_k(&scores, 10), vec![1, 2, 4, 0, 3]);
        assert!(top_k(&scores, 0).is_empty());
    }

    #[test]
    fn test_hits_are_monotone_in_k() {
        // Gold answer at ranks 1, 3, 7 and 12.
        for (gold_rank, expect) in [
            (0usize, (true, true, true)),
            (2, (false, true, true)),
            (6, (false, false, true)),
            (11, (false, false, false)),
        ] {
            let mut scores: Vec<f32> = (0..20).map(|i| 100.0 - i as f32).collect();
            let gold = gold_rank;
            let eval = score_sample(&item(19, vec![gold]), &mut scores, 0);
            assert_eq!((eval.hit_at_1, eval.hit_at_5, eval.hit_at_10), expect);
            assert!(!eval.hit_at_1 || eval.hit_at_5);
            assert!(!eval.hit_at_5 || eval.hit_at_10);
        }
    }

    #[test]
    fn test_multi_answer_hit_uses_any_answer() {
        let mut scores = vec![9.0_f32, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0];
        let eval = score_sample(&item(0, vec![6, 4]), &mut scores, 3);
        assert_eq!(eval.prediction, 1);
        assert!(!eval.correct);
        assert!(eval.hit_at_5);
        assert_eq!(
            eval.candidates.iter().map(|c| c.entity).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_report_excludes_failures() {
        let hit = score_sample(&item(0, vec![1]), &mut [0.0, 1.0, 0.5], 0);
        let near_miss = SampleEval {
            correct: false,
            hit_at_1: false,
            ..hit.clone()
        };
        let outcomes = vec![
            SampleOutcome::Scored(hit),
            SampleOutcome::Failed {
                question: "x".into(),
                reason: "unknown token".into(),
            },
            SampleOutcome::Scored(near_miss),
        ];

        let report = EvalReport::from_outcomes(&outcomes);
        assert_eq!(report.total, 3);
        assert_eq!(report.scored, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.correct, 1);
        assert!((report.accuracy - 0.5).abs() < 1e-12);
        assert!((report.hits_at_1 - 0.5).abs() < 1e-12);
        assert!((report.hits_at_10 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_report() {
        let report = EvalReport::from_outcomes(&[]);
        assert_eq!(report.accuracy, 0.0);
        assert_eq!(report.scored, 0);
    }

    /// Scores every entity by a fixed table row, ignoring the question.
    struct FixedScorer {
        table: Vec<f32>,
        num_entities: usize,
    }

    impl EntityScorer<TestBackend> for FixedScorer {
        fn score_entities(
            &self,
            _tokens: Tensor<TestBackend, 2, Int>,
            _mask: Tensor<TestBackend, 2>,
            heads: Tensor<TestBackend, 1, Int>,
        ) -> Tensor<TestBackend, 2> {
            let table = Tensor::<TestBackend, 2>::from_data(
                TensorData::new(self.table.clone(), [self.num_entities, self.num_entities]),
                &heads.device(),
            );
            table.select(0, heads)
        }

        fn num_entities(&self) -> usize {
            self.num_entities
        }
    }

    #[test]
    fn test_evaluate_counts_encode_failures() {
        let matrix = EmbeddingMatrix::new(vec![0.0; 3], 1).unwrap();
        let entities = EntityIndex::from_dict_reader(
            "0\tA\n1\tB\n2\tC\n".as_bytes(),
            &matrix,
            DictLayout::IdName,
        )
        .unwrap()
        .prepare();
        let vocab = Vocabulary::from_questions(["who is NE"]);
        // Row h: scores given head h. Head A prefers B, head B prefers C.
        let scorer = FixedScorer {
            table: vec![5.0, 1.0, 0.0, 0.0, 5.0, 1.0, 1.0, 0.0, 5.0],
            num_entities: 3,
        };
        let records = vec![
            QaRecord::new("A", "who is NE", vec!["B".into()]),
            QaRecord::new("B", "who is NE", vec!["A".into()]),
            QaRecord::new("A", "what is NE", vec!["B".into()]),
            QaRecord::new("Z", "who is NE", vec!["B".into()]),
        ];
        let options = EvalOptions {
            batch_size: 1,
            keep_candidates: 2,
        };
        let eval = evaluate(&scorer, &records, &vocab, &entities, &options, &Default::default())
            .unwrap();

        assert_eq!(eval.outcomes.len(), 4);
        assert!(matches!(eval.outcomes[2], SampleOutcome::Failed { .. }));
        assert!(matches!(eval.outcomes[3], SampleOutcome::Failed { .. }));
        assert_eq!(eval.report.errors, 2);
        assert_eq!(eval.report.scored, 2);
        assert_eq!(eval.report.correct, 1);
        assert!((eval.report.accuracy - 0.5).abs() < 1e-12);

        let tmp = tempfile::TempDir::new().unwrap();
        let dump = tmp.path().join("candidates.jsonl");
        write_candidates(&dump, &eval.outcomes, &entities).unwrap();
        let lines: Vec<serde_json::Value> = std::fs::read_to_string(&dump)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["head"], "A");
        assert_eq!(lines[0]["candidates"][0]["entity"], "B");
        assert_eq!(lines[0]["answers"][0], "B");

        let preds = tmp.path().join("predictions.txt");
        write_predictions(&preds, &eval.outcomes).unwrap();
        assert_eq!(
            std::fs::read_to_string(&preds).unwrap(),
            "who is NE\t1\t1\nwho is NE\t2\t0\n"
        );
    }

    #[test]
    fn test_candidate_dump_keeps_top_200() {
        let n = 250;
        let dict: String = (0..n).map(|i| format!("{i}\tE{i}\n")).collect();
        let matrix = EmbeddingMatrix::new(vec![0.0; n], 1).unwrap();
        let entities = EntityIndex::from_dict_reader(dict.as_bytes(), &matrix, DictLayout::IdName)
            .unwrap()
            .prepare();
        let vocab = Vocabulary::from_questions(["who is NE"]);
        // Every row ranks entities by id, so the head E249 would come first.
        let scorer = FixedScorer {
            table: (0..n * n).map(|i| (i % n) as f32).collect(),
            num_entities: n,
        };
        let records = vec![QaRecord::new("E249", "who is NE", vec!["E10".into()])];
        let options = EvalOptions {
            batch_size: 8,
            keep_candidates: DUMP_TOP_K,
        };
        let eval = evaluate(&scorer, &records, &vocab, &entities, &options, &Default::default())
            .unwrap();

        let tmp = tempfile::TempDir::new().unwrap();
        let dump = tmp.path().join("candidates.jsonl");
        write_candidates(&dump, &eval.outcomes, &entities).unwrap();
        let text = std::fs::read_to_string(&dump).unwrap();
        let line: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        let candidates = line["candidates"].as_array().unwrap();

        assert_eq!(candidates.len(), DUMP_TOP_K);
        assert_eq!(candidates[0]["entity"], "E248");
        assert_eq!(candidates[DUMP_TOP_K - 1]["entity"], "E49");
        assert!(candidates.iter().all(|c| c["entity"] != "E249"));
        let scores: Vec<f64> = candidates.iter().map(|c| c["score"].as_f64().unwrap()).collect();
        assert!(scores.windows(2).all(|w| w[0] > w[1]));
    }
}
