use ndarray::{Array1, Array3, Axis, Zip};

use crate::config::SquashFn;

/// Per-dimension control bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub min: Array1<f64>,
    pub max: Array1<f64>,
}

impl Bounds {
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> Self {
        Self {
            min: Array1::from(min),
            max: Array1::from(max),
        }
    }

    fn mid(&self) -> Array1<f64> {
        (&self.max + &self.min) / 2.0
    }

    fn half_range(&self) -> Array1<f64> {
        (&self.max - &self.min) / 2.0
    }
}

/// Hard clip of every action lane into `[min, max]`.
pub fn bound_action(actions: &mut Array3<f64>, bounds: &Bounds) {
    Zip::from(actions.lanes_mut(Axis(2))).for_each(|mut lane| {
        Zip::from(&mut lane)
            .and(&bounds.min)
            .and(&bounds.max)
            .for_each(|a, &lo, &hi| *a = a.max(lo).min(hi));
    });
}

/// Bring `mean + delta` into the bounds with the configured squash.
///
/// `clamp` clips directly; `clamp-rescale` and `tanh` first squash into
/// `[-1, 1]` and then map onto the bound interval; `identity` leaves the
/// actions untouched.
pub fn scale_ctrl(actions: &mut Array3<f64>, bounds: &Bounds, squash: SquashFn) {
    let (mid, half) = (bounds.mid(), bounds.half_range());
    let squash_one: fn(f64) -> f64 = match squash {
        SquashFn::Identity => return,
        SquashFn::Clamp => return bound_action(actions, bounds),
        SquashFn::ClampRescale => |v: f64| v.clamp(-1.0, 1.0),
        SquashFn::Tanh => f64::tanh,
    };
    Zip::from(actions.lanes_mut(Axis(2))).for_each(|mut lane| {
        Zip::from(&mut lane)
            .and(&mid)
            .and(&half)
            .for_each(|a, &m, &h| *a = m + squash_one(*a) * h);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn bounds() -> Bounds {
        Bounds::new(vec![-1.0, 0.0], vec![1.0, 4.0])
    }

    fn batch() -> Array3<f64> {
        Array::linspace(-6.0, 6.0, 24).into_shape((3, 4, 2)).unwrap()
    }

    #[test]
    fn clip_stays_in_bounds() {
        let mut a = batch();
        bound_action(&mut a, &bounds());
        for lane in a.lanes(Axis(2)) {
            assert!((-1.0..=1.0).contains(&lane[0]), "{lane}");
            assert!((0.0..=4.0).contains(&lane[1]), "{lane}");
        }
    }

    #[test]
    fn clip_keeps_interior_values() {
        let mut a = Array3::from_elem((2, 2, 2), 0.5);
        bound_action(&mut a, &bounds());
        assert!(a.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn every_squash_respects_bounds() {
        for squash in [SquashFn::Clamp, SquashFn::ClampRescale, SquashFn::Tanh] {
            let mut a = batch();
            scale_ctrl(&mut a, &bounds(), squash);
            for lane in a.lanes(Axis(2)) {
                assert!((-1.0..=1.0).contains(&lane[0]), "{squash}: {lane}");
                assert!((0.0..=4.0).contains(&lane[1]), "{squash}: {lane}");
            }
        }
    }

    #[test]
    fn rescale_maps_zero_to_mid() {
        let mut a = Array3::zeros((1, 1, 2));
        scale_ctrl(&mut a, &bounds(), SquashFn::Tanh);
        assert_eq!(a[[0, 0, 0]], 0.0);
        assert_eq!(a[[0, 0, 1]], 2.0);
    }

    #[test]
    fn identity_is_untouched() {
        let mut a = batch();
        scale_ctrl(&mut a, &bounds(), SquashFn::Identity);
        assert_eq!(a, batch());
    }
}
