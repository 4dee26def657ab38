//! Stateless tensor helpers shared by the encoder and the action heads.

use tch::{Kind, Tensor};

/// Softmax restricted to the entries where `mask` is set.
///
/// Masked-out entries get probability exactly zero and the remaining entries
/// sum to one. A row with no valid entry is undefined; it comes out uniform.
pub fn masked_softmax(logits: &Tensor, mask: &Tensor) -> Tensor {
    let mask = mask.to_kind(Kind::Float);
    // Masked logits sink to the bottom of the f32 range.
    let filled = logits
        .to_kind(Kind::Float)
        .masked_fill(&mask.le(0.5), f64::from(f32::MIN));
    let probs = filled.softmax(-1, Kind::Float) * &mask;
    let empty_rows = mask
        .sum_dim_intlist([-1].as_slice(), true, Kind::Float)
        .le(0.5)
        .to_kind(Kind::Float);
    let probs = probs + empty_rows;
    let z = probs.sum_dim_intlist([-1].as_slice(), true, Kind::Float);
    probs / z
}

/// One-hot float encoding of a `(batch, 1)` index tensor: `(batch, num_classes)`.
pub fn to_one_hot(indices: &Tensor, num_classes: i64) -> Tensor {
    indices
        .squeeze_dim(-1)
        .one_hot(num_classes)
        .to_kind(Kind::Float)
}

/// Number of Gaussian bins covering `[0, stop)` at the given spacing.
pub fn gaussian_basis_size(step: f64, stop: f64) -> i64 {
    (stop / step).ceil() as i64
}

/// Expands `(n, 1)` scalars into `(n, bins)` Gaussian responses centred on
/// `0, step, 2·step, ...` below `stop`, each with width `step`.
pub fn gaussian_expansion(values: &Tensor, step: f64, stop: f64) -> Tensor {
    let bins = gaussian_basis_size(step, stop);
    let mu = Tensor::arange(bins, (Kind::Float, values.device())) * step;
    let diff = values.view([-1, 1]) - mu.view([1, -1]);
    (-diff.square() / (2.0 * step * step)).exp()
}

/// `softplus(x) - ln 2`, zero at the origin.
pub fn shifted_softplus(x: &Tensor) -> Tensor {
    x.relu() + (-x.abs()).exp().log1p() - std::f64::consts::LN_2
}

/// Sums rows of `source` into `num_rows` buckets given by `index`.
pub fn scatter_sum(source: &Tensor, index: &Tensor, num_rows: i64) -> Tensor {
    let mut shape = source.size();
    shape[0] = num_rows;
    Tensor::zeros(shape.as_slice(), (source.kind(), source.device())).index_add(0, index, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn row(t: &Tensor, i: i64) -> Vec<f32> {
        Vec::<f32>::try_from(&t.get(i)).unwrap()
    }

    #[test]
    fn masked_entries_get_zero_probability() {
        let logits = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 0.5, -1.0, 2.0, 0.0]).view([2, 4]);
        let mask = Tensor::from_slice(&[1i64, 0, 1, 0, 0, 0, 1, 1]).view([2, 4]);
        let p = masked_softmax(&logits, &mask);
        for (i, valid) in [[true, false, true, false], [false, false, true, true]].iter().enumerate() {
            let r = row(&p, i as i64);
            let total: f32 = r.iter().sum();
            assert!((total - 1.0).abs() < 1e-6);
            for (k, &ok) in valid.iter().enumerate() {
                if !ok {
                    assert_eq!(r[k], 0.0);
                }
            }
        }
    }

    #[test]
    fn all_valid_mask_matches_softmax() {
        let logits = Tensor::from_slice(&[0.3f32, -0.2, 1.7]).view([1, 3]);
        let mask = Tensor::ones([1, 3], (Kind::Int, Device::Cpu));
        let p = masked_softmax(&logits, &mask);
        let reference = logits.softmax(-1, Kind::Float);
        assert!((p - reference).abs().max().double_value(&[]) < 1e-6);
    }

    #[test]
    fn single_valid_entry_gets_all_mass() {
        let logits = Tensor::from_slice(&[5.0f32, -3.0, 9.0]).view([1, 3]);
        let mask = Tensor::from_slice(&[false, true, false]).view([1, 3]);
        let p = masked_softmax(&logits, &mask);
        assert_eq!(row(&p, 0), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn large_masked_logit_does_not_starve_valid_entries() {
        let logits = Tensor::from_slice(&[0.0f32, 200.0, -50.0, 1e30]).view([2, 2]);
        let mask = Tensor::from_slice(&[1i64, 0, 1, 0]).view([2, 2]);
        let p = masked_softmax(&logits, &mask);
        assert_eq!(row(&p, 0), vec![1.0, 0.0]);
        assert_eq!(row(&p, 1), vec![1.0, 0.0]);
    }

    #[test]
    fn fully_masked_row_is_uniform() {
        let logits = Tensor::from_slice(&[3.0f32, -2.0]).view([1, 2]);
        let mask = Tensor::zeros([1, 2], (Kind::Int64, Device::Cpu));
        assert_eq!(row(&masked_softmax(&logits, &mask), 0), vec![0.5, 0.5]);
    }

    #[test]
    fn one_hot_encoding() {
        let idx = Tensor::from_slice(&[2i64, 0]).view([2, 1]);
        let oh = to_one_hot(&idx, 3);
        assert_eq!(oh.size(), vec![2, 3]);
        assert_eq!(row(&oh, 0), vec![0.0, 0.0, 1.0]);
        assert_eq!(row(&oh, 1), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn gaussian_expansion_peaks_at_matching_bin() {
        assert_eq!(gaussian_basis_size(0.1, 5.0), 50);
        let d = Tensor::from_slice(&[0.0f32, 1.0]).view([2, 1]);
        let e = gaussian_expansion(&d, 0.1, 5.0);
        assert_eq!(e.size(), vec![2, 50]);
        let r = row(&e, 1);
        assert!((r[10] - 1.0).abs() < 1e-5);
        let argmax = r
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(argmax, Some(10));
    }

    #[test]
    fn shifted_softplus_is_zero_at_origin() {
        let y = shifted_softplus(&Tensor::from_slice(&[0.0f32]));
        assert!(y.abs().sum(Kind::Float).double_value(&[]) < 1e-6);
    }

    #[test]
    fn scatter_sum_accumulates_rows() {
        let src = Tensor::from_slice(&[1.0f32, 2.0, 3.0]).view([3, 1]);
        let idx = Tensor::from_slice(&[0i64, 1, 0]);
        let out = scatter_sum(&src, &idx, 3);
        assert_eq!(Vec::<f32>::try_from(&out.view([-1])).unwrap(), vec![4.0, 2.0, 0.0]);
    }
}
