use ndarray::{s, Array2, Axis};

use crate::error::{MppiError, MppiResult};

/// Savitzky–Golay smoothing along the time axis of a `L x nu` sequence.
///
/// Every output sample is the value at its own position of a degree-`order`
/// least-squares polynomial fitted over `window` neighbours. Near the edges
/// the window is pinned to the first or last `window` samples and the fitted
/// polynomial is evaluated off-centre, so no sample is dropped or padded.
#[derive(Debug, Clone)]
pub struct SavGol {
    window: usize,
    order: usize,
    // ハット行列 A (AᵀA)⁻¹ Aᵀ
    hat: Array2<f64>,
}

impl SavGol {
    pub fn new(window: usize, order: usize) -> MppiResult<Self> {
        // 窓幅は奇数
        let window = if window % 2 == 0 { window.saturating_sub(1) } else { window };
        if order >= window {
            return Err(MppiError::Config(format!(
                "savgol order {order} must be less than window {window}"
            )));
        }
        let h = (window / 2) as f64;
        let a = na::DMatrix::from_fn(window, order + 1, |i, p| (i as f64 - h).powi(p as i32));
        let ata_inv = (a.transpose() * &a).try_inverse().ok_or_else(|| {
            MppiError::Numerical(format!("savgol normal matrix singular for window {window}"))
        })?;
        let hat = &a * ata_inv * a.transpose();
        Ok(Self {
            window,
            order,
            hat: Array2::from_shape_fn((window, window), |(i, j)| hat[(i, j)]),
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Filter for sequences of exactly `len` samples.
    ///
    /// When `len` is shorter than the window the largest odd window that
    /// fits is used instead; `None` if that cannot exceed the order.
    pub fn for_length(window: usize, order: usize, len: usize) -> MppiResult<Option<Self>> {
        let full = Self::new(window, order)?;
        if len >= full.window {
            return Ok(Some(full));
        }
        let w = if len % 2 == 0 { len.saturating_sub(1) } else { len };
        if w <= order {
            log::warn!("sequence of {len} too short for savgol order {order}, smoothing disabled");
            return Ok(None);
        }
        log::warn!("savgol window {} longer than sequence {len}, using {w}", full.window);
        Self::new(w, order).map(Some)
    }

    /// Smooth each column of `seq`. Sequences shorter than the window are
    /// returned unchanged.
    pub fn smooth(&self, seq: &Array2<f64>) -> Array2<f64> {
        if seq.nrows() < self.window {
            return seq.clone();
        }
        self.apply(seq)
    }

    fn apply(&self, seq: &Array2<f64>) -> Array2<f64> {
        let len = seq.nrows();
        let w = self.window;
        let h = w / 2;
        let mut out = Array2::zeros(seq.raw_dim());
        for (col, mut out_col) in seq.axis_iter(Axis(1)).zip(out.axis_iter_mut(Axis(1))) {
            for i in 0..len {
                let start = i.saturating_sub(h).min(len - w);
                let window = col.slice(s![start..start + w]);
                out_col[i] = self.hat.row(i - start).dot(&window);
            }
        }
        out
    }
}
