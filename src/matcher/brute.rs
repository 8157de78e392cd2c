use std::marker::PhantomData;

use super::metric::Metric;
use crate::descriptor::Descriptors;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor<D> {
    pub index: usize,
    pub distance: D,
}

impl<D: PartialOrd> Neighbor<D> {
    /// 距离更小，或距离相同但索引更小时才算更近
    #[inline(always)]
    pub fn is_closer(&self, distance: &D, index: usize) -> bool {
        *distance < self.distance || (*distance == self.distance && index < self.index)
    }
}

/// 在一组描述子上做精确最近邻查询
pub trait SearchIndex<'a, M: Metric>: Sync + Sized {
    fn build(points: &'a Descriptors<M::Elem>) -> Self;

    /// 返回最近的点；距离相同时返回索引最小的点，距离无法比较（NaN）的点会被忽略
    fn nearest(&self, query: &[M::Elem]) -> Option<Neighbor<M::Dist>>;
}

/// 暴力搜索，逐个比较所有点
pub struct BruteForce<'a, M: Metric> {
    points: &'a Descriptors<M::Elem>,
    _metric: PhantomData<M>,
}

impl<'a, M: Metric> SearchIndex<'a, M> for BruteForce<'a, M> {
    fn build(points: &'a Descriptors<M::Elem>) -> Self {
        Self { points, _metric: PhantomData }
    }

    fn nearest(&self, query: &[M::Elem]) -> Option<Neighbor<M::Dist>> {
        let mut best: Option<Neighbor<M::Dist>> = None;
        for (index, point) in self.points.rows().enumerate() {
            let distance = M::distance(query, point);
            if distance.partial_cmp(&distance).is_none() {
                continue;
            }
            // 按索引顺序遍历，严格小于即可保证相同距离时取最小索引
            if best.as_ref().is_none_or(|b| distance < b.distance) {
                best = Some(Neighbor { index, distance });
            }
        }
        best
    }
}
