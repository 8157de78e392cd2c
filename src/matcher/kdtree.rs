use super::brute::{Neighbor, SearchIndex};
use super::metric::{L2, Metric};
use crate::descriptor::Descriptors;

const LEAF_SIZE: usize = 8;

enum Node {
    Leaf { start: usize, end: usize },
    Split { axis: usize, value: f32, left: usize, right: usize },
}

/// 精确 k-d 树
///
/// 分割值取自中位数点本身的坐标，左子树坐标 <= value，右子树坐标 >= value。
/// 剪枝条件为 `axis_bound > best`（严格大于），距离相同的候选点不会被剪掉，
/// 因此结果与暴力搜索完全一致。
pub struct KdTree<'a> {
    points: &'a Descriptors<f32>,
    order: Vec<usize>,
    nodes: Vec<Node>,
}

impl<'a> KdTree<'a> {
    fn build_node(&mut self, start: usize, end: usize) -> usize {
        if end - start <= LEAF_SIZE {
            self.nodes.push(Node::Leaf { start, end });
            return self.nodes.len() - 1;
        }

        let axis = self.widest_axis(start, end);
        let points = self.points;
        let mid = start + (end - start) / 2;
        self.order[start..end].select_nth_unstable_by(mid - start, |&i, &j| {
            points.row(i)[axis].total_cmp(&points.row(j)[axis]).then(i.cmp(&j))
        });
        let value = points.row(self.order[mid])[axis];

        // 先占位，子节点建好后再回填
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { start, end });
        let left = self.build_node(start, mid);
        let right = self.build_node(mid, end);
        self.nodes[id] = Node::Split { axis, value, left, right };
        id
    }

    /// 选择跨度最大的维度作为分割轴
    fn widest_axis(&self, start: usize, end: usize) -> usize {
        let dim = self.points.dim();
        let mut lo = vec![f32::INFINITY; dim];
        let mut hi = vec![f32::NEG_INFINITY; dim];
        for &i in &self.order[start..end] {
            for (k, &v) in self.points.row(i).iter().enumerate() {
                lo[k] = lo[k].min(v);
                hi[k] = hi[k].max(v);
            }
        }
        let mut axis = 0;
        let mut widest = f32::NEG_INFINITY;
        for k in 0..dim {
            let spread = hi[k] - lo[k];
            if spread > widest {
                widest = spread;
                axis = k;
            }
        }
        axis
    }

    fn search(&self, node: usize, query: &[f32], best: &mut Option<Neighbor<f32>>) {
        match self.nodes[node] {
            Node::Leaf { start, end } => {
                for &index in &self.order[start..end] {
                    let distance = L2::distance(query, self.points.row(index));
                    if distance.is_nan() {
                        continue;
                    }
                    if best.as_ref().is_none_or(|b| b.is_closer(&distance, index)) {
                        *best = Some(Neighbor { index, distance });
                    }
                }
            }
            Node::Split { axis, value, left, right } => {
                let (near, far) = if query[axis] < value { (left, right) } else { (right, left) };
                self.search(near, query, best);
                let bound = L2::axis_bound(query[axis], value);
                if best.as_ref().is_none_or(|b| bound <= b.distance) {
                    self.search(far, query, best);
                }
            }
        }
    }
}

impl<'a> SearchIndex<'a, L2> for KdTree<'a> {
    fn build(points: &'a Descriptors<f32>) -> Self {
        let mut tree = Self { points, order: (0..points.len()).collect(), nodes: vec![] };
        if !points.is_empty() {
            tree.build_node(0, points.len());
        }
        tree
    }

    fn nearest(&self, query: &[f32]) -> Option<Neighbor<f32>> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best = None;
        self.search(0, query, &mut best);
        best
    }
}
