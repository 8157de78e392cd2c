mod brute;
mod kdtree;
mod metric;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub use brute::{BruteForce, Neighbor, SearchIndex};
pub use kdtree::KdTree;
pub use metric::{Hamming, L2, Metric};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::{DescriptorKind, DescriptorSet, Descriptors};

/// 一对对应点，`query` 是第一组描述子中的索引，`train` 是第二组中的索引
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub query: usize,
    pub train: usize,
    /// 距离越小越相似
    pub distance: f64,
}

/// 一个图片对的匹配结果，按距离升序排列
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchList {
    matches: Vec<Match>,
}

impl MatchList {
    /// 按距离稳定排序后构造，相同距离保持传入顺序
    pub fn new(mut matches: Vec<Match>) -> Self {
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Self { matches }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Match> {
        self.matches.iter()
    }

    pub fn as_slice(&self) -> &[Match] {
        &self.matches
    }

    /// 是否按距离非降序排列
    pub fn is_sorted(&self) -> bool {
        self.matches.is_sorted_by(|a, b| a.distance.total_cmp(&b.distance).is_le())
    }

    /// 交换 query 和 train，用于把结果转换为另一个方向
    pub fn swapped(&self) -> Self {
        let matches = self
            .matches
            .iter()
            .map(|m| Match { query: m.train, train: m.query, distance: m.distance })
            .collect();
        Self::new(matches)
    }
}

impl<'a> IntoIterator for &'a MatchList {
    type Item = &'a Match;
    type IntoIter = std::slice::Iter<'a, Match>;

    fn into_iter(self) -> Self::IntoIter {
        self.matches.iter()
    }
}

/// 最近邻搜索方式，同时也是匹配结果目录的名称
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    /// 暴力搜索，支持所有描述子
    BruteForce,
    /// 精确 k-d 树，仅支持浮点描述子
    KdTree,
}

impl MatcherKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BruteForce => "BFMatcher",
            Self::KdTree => "KdTreeMatcher",
        }
    }

    pub fn supports(&self, kind: DescriptorKind) -> bool {
        match self {
            Self::BruteForce => true,
            Self::KdTree => kind == DescriptorKind::Float,
        }
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MatcherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bf" | "bfmatcher" | "brute-force" | "bruteforce" => Ok(Self::BruteForce),
            "kdtree" | "kd-tree" | "kdtreematcher" => Ok(Self::KdTree),
            "flann" | "flannbasedmatcher" => {
                Err(format!("{} 是近似最近邻匹配，不支持；需要加速请使用精确的 kdtree", s))
            }
            _ => Err(format!("未知的匹配器: {}，可选 BFMatcher、KdTreeMatcher", s)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("描述子类型不一致: {0} 和 {1}")]
    KindMismatch(DescriptorKind, DescriptorKind),
    #[error("描述子维度不一致: {0} 和 {1}")]
    DimMismatch(usize, usize),
    #[error("{matcher} 不支持 {kind} 描述子")]
    Unsupported { matcher: MatcherKind, kind: DescriptorKind },
}

/// 两组描述子之间的最近邻匹配
#[derive(Debug, Clone, Copy)]
pub struct PairwiseMatcher {
    kind: MatcherKind,
    cross_check: bool,
}

impl PairwiseMatcher {
    pub fn new(kind: MatcherKind, cross_check: bool) -> Self {
        Self { kind, cross_check }
    }

    pub fn brute_force(cross_check: bool) -> Self {
        Self::new(MatcherKind::BruteForce, cross_check)
    }

    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    pub fn cross_check(&self) -> bool {
        self.cross_check
    }

    /// 计算 a 到 b 的匹配
    ///
    /// 对 a 中每个描述子在 b 中找最近邻；开启交叉验证时只保留互为最近邻的匹配。
    /// 结果按距离升序排列，距离相同时保持 a 中的索引顺序。任意一侧为空时返回空结果。
    pub fn compute(&self, a: &DescriptorSet, b: &DescriptorSet) -> Result<MatchList, MatchError> {
        if a.kind() != b.kind() {
            return Err(MatchError::KindMismatch(a.kind(), b.kind()));
        }
        if !self.kind.supports(a.kind()) {
            return Err(MatchError::Unsupported { matcher: self.kind, kind: a.kind() });
        }
        if a.is_empty() || b.is_empty() {
            return Ok(MatchList::default());
        }
        if a.dim() != b.dim() {
            return Err(MatchError::DimMismatch(a.dim(), b.dim()));
        }

        let matches = match (a, b, self.kind) {
            (DescriptorSet::Float(a), DescriptorSet::Float(b), MatcherKind::BruteForce) => {
                match_with::<L2, BruteForce<L2>>(a, b, self.cross_check)
            }
            (DescriptorSet::Float(a), DescriptorSet::Float(b), MatcherKind::KdTree) => {
                match_with::<L2, KdTree>(a, b, self.cross_check)
            }
            (DescriptorSet::Binary(a), DescriptorSet::Binary(b), _) => {
                match_with::<Hamming, BruteForce<Hamming>>(a, b, self.cross_check)
            }
            // 类型不一致的情况已在上面处理
            _ => return Err(MatchError::KindMismatch(a.kind(), b.kind())),
        };
        Ok(MatchList::new(matches))
    }
}

fn match_with<'a, M, I>(
    a: &'a Descriptors<M::Elem>,
    b: &'a Descriptors<M::Elem>,
    cross_check: bool,
) -> Vec<Match>
where
    M: Metric,
    I: SearchIndex<'a, M>,
{
    let index_b = I::build(b);
    // collect 会保持 a 的索引顺序，与调度无关
    let forward: Vec<Option<Neighbor<M::Dist>>> =
        (0..a.len()).into_par_iter().map(|i| index_b.nearest(a.row(i))).collect();

    let backward: Option<HashMap<usize, Option<usize>>> = cross_check.then(|| {
        let index_a = I::build(a);
        let mut targets: Vec<usize> = forward.iter().flatten().map(|n| n.index).collect();
        targets.sort_unstable();
        targets.dedup();
        targets
            .into_par_iter()
            .map(|j| (j, index_a.nearest(b.row(j)).map(|n| n.index)))
            .collect()
    });

    forward
        .into_iter()
        .enumerate()
        .filter_map(|(i, nn)| {
            let nn = nn?;
            if let Some(backward) = &backward {
                if backward.get(&nn.index).copied().flatten() != Some(i) {
                    return None;
                }
            }
            Some(Match { query: i, train: nn.index, distance: M::report(nn.distance) })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::prelude::*;

    use super::*;

    fn float_set(rows: &[&[f32]]) -> DescriptorSet {
        Descriptors::from_rows(rows[0].len(), rows).unwrap().into()
    }

    fn random_float(rng: &mut StdRng, n: usize, dim: usize) -> DescriptorSet {
        let data = (0..n * dim).map(|_| rng.random_range(0..4u8) as f32).collect();
        Descriptors::from_vec(dim, data).unwrap().into()
    }

    fn random_binary(rng: &mut StdRng, n: usize) -> DescriptorSet {
        let mut data = vec![0u8; n * 32];
        rng.fill_bytes(&mut data);
        Descriptors::from_vec(32, data).unwrap().into()
    }

    fn pairs(list: &MatchList) -> HashSet<(usize, usize)> {
        list.iter().map(|m| (m.query, m.train)).collect()
    }

    #[test]
    fn test_basic_match() {
        let a = float_set(&[&[0., 0.], &[10., 10.], &[5., 5.]]);
        let b = float_set(&[&[10., 11.], &[0., 0.5]]);
        let list = PairwiseMatcher::brute_force(false).compute(&a, &b).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.as_slice()[0], Match { query: 0, train: 1, distance: 0.5 });
        assert_eq!(list.as_slice()[1], Match { query: 1, train: 0, distance: 1.0 });

        // 交叉验证后 a[2] 被去掉：它的最近邻 b[1] 更靠近 a[0]
        let list = PairwiseMatcher::brute_force(true).compute(&a, &b).unwrap();
        assert_eq!(pairs(&list), HashSet::from([(0, 1), (1, 0)]));
    }

    #[test]
    fn test_empty_sets() {
        let a = DescriptorSet::empty(DescriptorKind::Float, 128);
        let b = float_set(&[&[0.; 128]]);
        for cross_check in [true, false] {
            let m = PairwiseMatcher::brute_force(cross_check);
            assert!(m.compute(&a, &b).unwrap().is_empty());
            assert!(m.compute(&b, &a).unwrap().is_empty());
            assert!(m.compute(&a, &a).unwrap().is_empty());
        }
    }

    #[test]
    fn test_incompatible_sets() {
        let a = float_set(&[&[0., 0.]]);
        let b = float_set(&[&[0., 0., 0.]]);
        let m = PairwiseMatcher::brute_force(true);
        assert_eq!(m.compute(&a, &b), Err(MatchError::DimMismatch(2, 3)));

        let c: DescriptorSet = Descriptors::from_rows(2, &[[0u8, 0]]).unwrap().into();
        assert!(matches!(m.compute(&a, &c), Err(MatchError::KindMismatch(..))));

        let kd = PairwiseMatcher::new(MatcherKind::KdTree, true);
        assert!(matches!(kd.compute(&c, &c), Err(MatchError::Unsupported { .. })));
    }

    #[test]
    fn test_cross_check_is_subset() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let a = random_float(&mut rng, 40, 4);
            let b = random_float(&mut rng, 30, 4);
            let strict = PairwiseMatcher::brute_force(true).compute(&a, &b).unwrap();
            let loose = PairwiseMatcher::brute_force(false).compute(&a, &b).unwrap();
            assert_eq!(loose.len(), 40);
            assert!(pairs(&strict).is_subset(&pairs(&loose)));
        }
    }

    #[test]
    fn test_sorted_and_stable() {
        let mut rng = StdRng::seed_from_u64(2);
        let a = random_float(&mut rng, 100, 3);
        let b = random_float(&mut rng, 50, 3);
        let list = PairwiseMatcher::brute_force(false).compute(&a, &b).unwrap();
        assert!(list.is_sorted());
        for w in list.as_slice().windows(2) {
            if w[0].distance == w[1].distance {
                assert!(w[0].query < w[1].query);
            }
        }
    }

    #[test]
    fn test_cross_check_commutative() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10 {
            let a = random_float(&mut rng, 30, 2);
            let b = random_float(&mut rng, 25, 2);
            let m = PairwiseMatcher::brute_force(true);
            let ab = m.compute(&a, &b).unwrap();
            let ba = m.compute(&b, &a).unwrap();
            assert_eq!(pairs(&ab), pairs(&ba.swapped()));
        }
    }

    #[test]
    fn test_unambiguous_neighbors() {
        let a: Vec<Vec<f32>> = (0..5).map(|i| vec![i as f32 * 10., 0.]).collect();
        let mut b: Vec<Vec<f32>> =
            (0..5).map(|i| vec![i as f32 * 10. + 0.1 * i as f32, 1.]).collect();
        b.push(vec![100., 100.]);
        b.push(vec![-100., 50.]);
        let a: DescriptorSet = Descriptors::from_rows(2, &a).unwrap().into();
        let b: DescriptorSet = Descriptors::from_rows(2, &b).unwrap().into();

        let strict = PairwiseMatcher::brute_force(true).compute(&a, &b).unwrap();
        let loose = PairwiseMatcher::brute_force(false).compute(&a, &b).unwrap();
        assert_eq!(strict.len(), 5);
        assert_eq!(strict, loose);
        assert!(strict.iter().all(|m| m.query == m.train));
    }

    #[test]
    fn test_kdtree_equals_brute_force() {
        let mut rng = StdRng::seed_from_u64(4);
        for cross_check in [true, false] {
            let a = random_float(&mut rng, 300, 8);
            let b = random_float(&mut rng, 200, 8);
            let brute = PairwiseMatcher::brute_force(cross_check).compute(&a, &b).unwrap();
            let kd = PairwiseMatcher::new(MatcherKind::KdTree, cross_check);
            let kd = kd.compute(&a, &b).unwrap();
            assert_eq!(brute, kd);
        }
    }

    #[test]
    fn test_binary_match() {
        let mut rng = StdRng::seed_from_u64(5);
        let a = random_binary(&mut rng, 50);
        let list = PairwiseMatcher::brute_force(true).compute(&a, &a).unwrap();
        assert_eq!(list.len(), 50);
        assert!(list.iter().all(|m| m.query == m.train && m.distance == 0.));
    }

    #[test]
    fn test_deterministic() {
        let mut rng = StdRng::seed_from_u64(6);
        let a = random_float(&mut rng, 200, 4);
        let b = random_float(&mut rng, 200, 4);
        let m = PairwiseMatcher::brute_force(true);
        let first = bincode::serialize(&m.compute(&a, &b).unwrap()).unwrap();
        let second = bincode::serialize(&m.compute(&a, &b).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_matcher_kind() {
        assert_eq!("BFMatcher".parse::<MatcherKind>(), Ok(MatcherKind::BruteForce));
        assert_eq!("kdtree".parse::<MatcherKind>(), Ok(MatcherKind::KdTree));
        assert!("FlannBasedMatcher".parse::<MatcherKind>().is_err());
        assert!("foo".parse::<MatcherKind>().is_err());
    }
}
