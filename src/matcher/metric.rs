use crate::hamming::hamming;

/// 描述子空间中的距离度量
///
/// `Dist` 是用于比较的内部距离，`report` 将其转换为写入结果的距离。
/// 两者必须单调一致，否则排序结果会和比较结果不一致。
pub trait Metric: Send + Sync {
    type Elem: Copy + Send + Sync;
    type Dist: Copy + PartialOrd + Send + Sync;

    fn distance(a: &[Self::Elem], b: &[Self::Elem]) -> Self::Dist;

    fn report(d: Self::Dist) -> f64;
}

/// 欧氏距离，比较时使用 f32 平方和，按维度顺序累加
pub struct L2;

impl L2 {
    #[inline(always)]
    pub fn axis_bound(q: f32, split: f32) -> f32 {
        let d = q - split;
        d * d
    }
}

impl Metric for L2 {
    type Elem = f32;
    type Dist = f32;

    #[inline(always)]
    fn distance(a: &[f32], b: &[f32]) -> f32 {
        let mut acc = 0f32;
        for (x, y) in a.iter().zip(b) {
            let d = x - y;
            acc += d * d;
        }
        acc
    }

    fn report(d: f32) -> f64 {
        f64::from(d.sqrt())
    }
}

/// 二进制描述子的汉明距离
pub struct Hamming;

impl Metric for Hamming {
    type Elem = u8;
    type Dist = u32;

    #[inline(always)]
    fn distance(a: &[u8], b: &[u8]) -> u32 {
        hamming(a, b)
    }

    fn report(d: u32) -> f64 {
        f64::from(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_symmetric() {
        let a = [0.1f32, 0.7, -3.3, 1e-3];
        let b = [0.3f32, -0.2, 2.9, 5.0];
        assert_eq!(L2::distance(&a, &b).to_bits(), L2::distance(&b, &a).to_bits());
        assert_eq!(L2::report(L2::distance(&[0., 0.], &[3., 4.])), 5.0);
    }

    #[test]
    fn test_l2_not_below_axis_bound() {
        let a = [1.5f32, -0.25, 9.0];
        let b = [0.5f32, 4.0, 8.0];
        let d = L2::distance(&a, &b);
        for k in 0..3 {
            assert!(d >= L2::axis_bound(a[k], b[k]));
        }
    }

    #[test]
    fn test_hamming_report() {
        assert_eq!(Hamming::report(Hamming::distance(&[0b1011], &[0])), 3.0);
    }
}
