use std::fmt;

use ndarray::{Array2, ArrayView2};

use crate::error::{Error, Result};

/// 一张图片的全部描述子，按行存储，第 i 行对应第 i 个特征点
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptors<T> {
    dim: usize,
    data: Vec<T>,
}

impl<T: Copy> Descriptors<T> {
    /// 创建一个空集合，但仍然记录维度
    pub fn empty(dim: usize) -> Self {
        Self { dim, data: vec![] }
    }

    pub fn from_vec(dim: usize, data: Vec<T>) -> Result<Self> {
        if dim == 0 && !data.is_empty() {
            return Err(Error::decode("descriptors", "维度为 0 但数据不为空"));
        }
        if dim != 0 && data.len() % dim != 0 {
            return Err(Error::decode(
                "descriptors",
                format!("数据长度 {} 不是维度 {} 的整数倍", data.len(), dim),
            ));
        }
        Ok(Self { dim, data })
    }

    pub fn from_rows<R: AsRef<[T]>>(dim: usize, rows: &[R]) -> Result<Self> {
        let mut data = Vec::with_capacity(rows.len() * dim);
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != dim {
                return Err(Error::decode(
                    "descriptors",
                    format!("第 {} 行长度为 {}，应为 {}", i, row.len(), dim),
                ));
            }
            data.extend_from_slice(row);
        }
        Ok(Self { dim, data })
    }

    /// 从 ndarray 矩阵构造，任意内存布局均按逻辑上的行优先顺序复制
    pub fn from_array(array: &Array2<T>) -> Self {
        Self { dim: array.ncols(), data: array.iter().copied().collect() }
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        // 构造时已保证长度是 dim 的整数倍
        ArrayView2::from_shape((self.len(), self.dim), &self.data)
            .expect("descriptor length must be a multiple of dim")
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[T]> + '_ {
        // chunks_exact 不接受 0
        self.data.chunks_exact(self.dim.max(1))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

/// 描述子的元素类型决定了距离度量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// 浮点描述子，使用欧氏距离
    Float,
    /// 二进制描述子，使用汉明距离
    Binary,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float => write!(f, "f32"),
            Self::Binary => write!(f, "u8"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorSet {
    Float(Descriptors<f32>),
    Binary(Descriptors<u8>),
}

impl DescriptorSet {
    pub fn empty(kind: DescriptorKind, dim: usize) -> Self {
        match kind {
            DescriptorKind::Float => Self::Float(Descriptors::empty(dim)),
            DescriptorKind::Binary => Self::Binary(Descriptors::empty(dim)),
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::Float(_) => DescriptorKind::Float,
            Self::Binary(_) => DescriptorKind::Binary,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Float(d) => d.len(),
            Self::Binary(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        match self {
            Self::Float(d) => d.dim(),
            Self::Binary(d) => d.dim(),
        }
    }
}

impl From<Descriptors<f32>> for DescriptorSet {
    fn from(d: Descriptors<f32>) -> Self {
        Self::Float(d)
    }
}

impl From<Descriptors<u8>> for DescriptorSet {
    fn from(d: Descriptors<u8>) -> Self {
        Self::Binary(d)
    }
}
