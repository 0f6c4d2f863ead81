//! Knowledge-graph scoring functions.
//!
//! Every supported function factors as `score(h, r, t) = <combine(h, r), t>`,
//! so scoring a batch against every entity is one matmul with the entity
//! table after [`KgScoring::combine`]. TuckER additionally reads a learned
//! core tensor.

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;

/// Scoring function of the pretrained knowledge-graph embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KgScoring {
    /// Complex bilinear: embeddings are `[real | imaginary]` halves.
    ComplEx,
    /// Diagonal bilinear.
    DistMult,
    /// Tucker decomposition with a `(relation_dim, entity_dim, entity_dim)` core.
    TuckER,
}

impl KgScoring {
    /// Width of the question relation embedding for a given relation dimension.
    pub fn relation_width(&self, relation_dim: usize) -> usize {
        match self {
            KgScoring::ComplEx => 2 * relation_dim,
            KgScoring::DistMult | KgScoring::TuckER => relation_dim,
        }
    }

    /// Whether the function needs a core tensor.
    pub fn needs_core(&self) -> bool {
        matches!(self, KgScoring::TuckER)
    }

    /// Combine head and relation embeddings into a query vector.
    ///
    /// `head` is `(batch, entity_dim)` and `relation` is `(batch, relation
    /// width)`. For ComplEx the result is `[Re(h∘r) | Im(h∘r)]`, whose dot
    /// product with `[Re(t) | Im(t)]` is `Re(<h, r, conj(t)>)`. For TuckER it is
    /// `W ×₁ r ×₂ h`; without a `core` every query is zero.
    pub fn combine<B: Backend>(
        &self,
        head: Tensor<B, 2>,
        relation: Tensor<B, 2>,
        core: Option<Tensor<B, 3>>,
    ) -> Tensor<B, 2> {
        match self {
            KgScoring::DistMult => head * relation,
            KgScoring::TuckER => match core {
                Some(core) => tucker_query(head, relation, core),
                None => head.zeros_like(),
            },
            KgScoring::ComplEx => {
                let [batch, width] = head.dims();
                let half = width / 2;
                let re_h = head.clone().slice([0..batch, 0..half]);
                let im_h = head.slice([0..batch, half..width]);
                let re_r = relation.clone().slice([0..batch, 0..half]);
                let im_r = relation.slice([0..batch, half..width]);

                let re = re_h.clone() * re_r.clone() - im_h.clone() * im_r.clone();
                let im = re_h * im_r + im_h * re_r;
                Tensor::cat(vec![re, im], 1)
            }
        }
    }

    /// Score queries `(batch, width)` against every entity `(num_entities, width)`.
    pub fn score_all<B: Backend>(
        &self,
        query: Tensor<B, 2>,
        entities: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        query.matmul(entities.transpose())
    }
}

/// `query[b, k] = Σ_j Σ_i r[b, j] · h[b, i] · W[j, i, k]`.
fn tucker_query<B: Backend>(
    head: Tensor<B, 2>,
    relation: Tensor<B, 2>,
    core: Tensor<B, 3>,
) -> Tensor<B, 2> {
    let [batch, entity_dim] = head.dims();
    let [relation_dim, _, _] = core.dims();
    let mixed = relation
        .matmul(core.reshape([relation_dim, entity_dim * entity_dim]))
        .reshape([batch, entity_dim, entity_dim]);
    head.reshape([batch, 1, entity_dim])
        .matmul(mixed)
        .reshape([batch, entity_dim])
}

impl fmt::Display for KgScoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KgScoring::ComplEx => write!(f, "ComplEx"),
            KgScoring::DistMult => write!(f, "DistMult"),
            KgScoring::TuckER => write!(f, "TuckER"),
        }
    }
}

impl FromStr for KgScoring {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "complex" => Ok(KgScoring::ComplEx),
            "distmult" => Ok(KgScoring::DistMult),
            "tucker" => Ok(KgScoring::TuckER),
            other => Err(format!(
                "unsupported scoring function {other:?} (expected ComplEx, DistMult or TuckER)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    fn tensor(rows: &[&[f32]]) -> Tensor<TestBackend, 2> {
        let width = rows[0].len();
        let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_data(TensorData::new(flat, [rows.len(), width]), &Default::default())
    }

    fn values(t: Tensor<TestBackend, 2>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_distmult_score() {
        let h = tensor(&[&[1.0, 2.0]]);
        let r = tensor(&[&[3.0, 0.5]]);
        let e = tensor(&[&[1.0, 1.0], &[0.0, 2.0]]);
        let scoring = KgScoring::DistMult;
        let scores = values(scoring.score_all(scoring.combine(h, r, None), e));
        // h∘r = [3, 1]
        assert_eq!(scores, vec![4.0, 2.0]);
    }

    #[test]
    fn test_complex_matches_complex_arithmetic() {
        // h = 1 + 2i, r = 3 - 1i, t = 0.5 + 1i
        // h*r = (3 + 2) + (-1 + 6)i = 5 + 5i
        // Re(h * r * conj(t)) = Re((5 + 5i)(0.5 - 1i)) = 2.5 + 5 = 7.5
        let h = tensor(&[&[1.0, 2.0]]);
        let r = tensor(&[&[3.0, -1.0]]);
        let e = tensor(&[&[0.5, 1.0]]);
        let scoring = KgScoring::ComplEx;
        let scores = values(scoring.score_all(scoring.combine(h, r, None), e));
        assert!((scores[0] - 7.5).abs() < 1e-5, "got {}", scores[0]);
    }

    #[test]
    fn test_tucker_contracts_core() {
        // W[0] = [[1, 2], [3, 4]], r = [2]: h·(2W) = [1, 1]·[[2, 4], [6, 8]] = [8, 12]
        let core = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![1.0_f32, 2.0, 3.0, 4.0], [1, 2, 2]),
            &Default::default(),
        );
        let h = tensor(&[&[1.0, 1.0], &[1.0, 0.0]]);
        let r = tensor(&[&[2.0], &[1.0]]);
        let e = tensor(&[&[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0]]);
        let scoring = KgScoring::TuckER;
        let scores = values(scoring.score_all(scoring.combine(h, r, Some(core)), e));
        // Second row: h·W = [1, 2].
        assert_eq!(scores, vec![8.0, 12.0, 20.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_tucker_matches_triple_sum() {
        // W[j, i, k] = j + 2i + 3k over (2, 3, 3); h and r fixed.
        let (dr, de) = (2usize, 3usize);
        let w: Vec<f32> = (0..dr * de * de)
            .map(|n| {
                let (j, i, k) = (n / (de * de), (n / de) % de, n % de);
                (j + 2 * i + 3 * k) as f32 * 0.1
            })
            .collect();
        let h = [0.5_f32, -1.0, 2.0];
        let r = [1.5_f32, -0.5];
        let t = [1.0_f32, 0.25, -2.0];
        let mut expected = 0.0_f32;
        for j in 0..dr {
            for i in 0..de {
                for k in 0..de {
                    expected += r[j] * h[i] * t[k] * w[j * de * de + i * de + k];
                }
            }
        }

        let core = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(w, [dr, de, de]),
            &Default::default(),
        );
        let scoring = KgScoring::TuckER;
        let query = scoring.combine(tensor(&[&h[..]]), tensor(&[&r[..]]), Some(core));
        let scores = values(scoring.score_all(query, tensor(&[&t[..]])));
        assert!((scores[0] - expected).abs() < 1e-4, "{} vs {expected}", scores[0]);
    }

    #[test]
    fn test_relation_width() {
        assert_eq!(KgScoring::ComplEx.relation_width(30), 60);
        assert_eq!(KgScoring::DistMult.relation_width(30), 30);
        assert_eq!(KgScoring::TuckER.relation_width(30), 30);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("ComplEx".parse::<KgScoring>().unwrap(), KgScoring::ComplEx);
        assert_eq!("distmult".parse::<KgScoring>().unwrap(), KgScoring::DistMult);
        assert_eq!("TuckER".parse::<KgScoring>().unwrap(), KgScoring::TuckER);
        assert!("RotatE".parse::<KgScoring>().is_err());
        assert_eq!(KgScoring::ComplEx.to_string(), "ComplEx");
    }
}
