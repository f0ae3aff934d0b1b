//! Reconstruction losses between a predicted and a target spectrum.
//!
//! Every loss is computed per sample (row) and averaged over the batch.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

const EPS: f32 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LossKind {
    /// Sum of squared errors.
    #[serde(rename = "SSE", alias = "sse")]
    Sse,
    /// Cosine of the spectral angle, as `1 - cos(y, t)`.
    #[serde(rename = "CSA", alias = "csa")]
    Csa,
    /// Spectral angle `acos(cos(y, t))` in radians.
    #[serde(rename = "SA", alias = "sa")]
    Sa,
    /// Spectral information divergence: symmetric KL divergence between the
    /// spectra normalised to unit sum.
    #[serde(rename = "SID", alias = "sid")]
    Sid,
}

impl LossKind {
    /// Batch-mean loss and its gradient with respect to `prediction`.
    ///
    /// Both views are `[batch, features]` of identical shape.
    pub fn evaluate(self, prediction: ArrayView2<f32>, target: ArrayView2<f32>) -> (f32, Array2<f32>) {
        let batch = prediction.nrows().max(1) as f32;
        let mut grad = Array2::<f32>::zeros(prediction.raw_dim());
        let mut total = 0.0f32;
        for ((y, t), mut g) in prediction
            .outer_iter()
            .zip(target.outer_iter())
            .zip(grad.outer_iter_mut())
        {
            let (loss, row_grad) = match self {
                Self::Sse => sse(y, t),
                Self::Csa => {
                    let (cos, dcos) = cosine(y, t);
                    (1.0 - cos, -dcos)
                }
                Self::Sa => {
                    let (cos, dcos) = cosine(y, t);
                    let c = cos.clamp(-1.0 + 1e-6, 1.0 - 1e-6);
                    let scale = -1.0 / (1.0 - c * c).sqrt();
                    (c.acos(), dcos * scale)
                }
                Self::Sid => sid(y, t),
            };
            total += loss;
            g.assign(&(row_grad / batch));
        }
        (total / batch, grad)
    }
}

fn sse(y: ArrayView1<f32>, t: ArrayView1<f32>) -> (f32, Array1<f32>) {
    let diff = &y - &t;
    let loss = diff.dot(&diff);
    (loss, diff * 2.0)
}

/// Cosine similarity and its gradient with respect to `y`.
fn cosine(y: ArrayView1<f32>, t: ArrayView1<f32>) -> (f32, Array1<f32>) {
    let yy = y.dot(&y).max(EPS);
    let tt = t.dot(&t).max(EPS);
    let norm = (yy * tt).sqrt();
    let cos = y.dot(&t) / norm;
    let grad = &t / norm - &(&y * (cos / yy));
    (cos, grad)
}

fn sid(y: ArrayView1<f32>, t: ArrayView1<f32>) -> (f32, Array1<f32>) {
    let y_pos = y.mapv(|v| v.max(EPS));
    let t_pos = t.mapv(|v| v.max(EPS));
    let y_sum = y_pos.sum();
    let p = &y_pos / y_sum;
    let q = &t_pos / t_pos.sum();
    let log_ratio = Zip::from(&p).and(&q).map_collect(|&p, &q| (p / q).ln());
    let loss = (&p - &q).dot(&log_ratio);

    // dL/dp, then through the normalisation p = y / sum(y)
    let dp = Zip::from(&log_ratio)
        .and(&p)
        .and(&q)
        .map_collect(|&lr, &p, &q| lr + 1.0 - q / p);
    let mean = dp.dot(&p);
    let mut grad = (dp - mean) / y_sum;
    Zip::from(&mut grad).and(&y).for_each(|g, &v| {
        if v < EPS {
            *g = 0.0;
        }
    });
    (loss, grad)
}
