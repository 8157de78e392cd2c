#[cfg(feature = "opencv")]
mod cv;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[cfg(feature = "opencv")]
pub use self::cv::{OpencvDetector, OpencvFactory};
use crate::descriptor::{DescriptorKind, DescriptorSet};
use crate::error::{Error, Result};
use crate::keypoint::Keypoint;

/// 一张图片的检测结果，特征点和描述子一一对应
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFeatures {
    keypoints: Vec<Keypoint>,
    descriptors: DescriptorSet,
}

impl ImageFeatures {
    pub fn new(keypoints: Vec<Keypoint>, descriptors: DescriptorSet) -> Result<Self> {
        if keypoints.len() != descriptors.len() {
            return Err(Error::decode(
                "features",
                format!("特征点数量 {} 与描述子数量 {} 不一致", keypoints.len(), descriptors.len()),
            ));
        }
        Ok(Self { keypoints, descriptors })
    }

    pub fn empty(kind: DescriptorKind, dim: usize) -> Self {
        Self { keypoints: vec![], descriptors: DescriptorSet::empty(kind, dim) }
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// 特征点检测器，负责读取、解码图片并计算描述子
pub trait Detector {
    fn detect_file(&mut self, path: &Path) -> anyhow::Result<ImageFeatures>;
}

/// 为每个工作线程创建独立的检测器
pub trait DetectorFactory: Sync {
    type Detector: Detector;

    /// 特征算法名称，同时是特征目录名
    fn name(&self) -> &str;

    fn descriptor_kind(&self) -> DescriptorKind;

    fn create(&self) -> anyhow::Result<Self::Detector>;
}

/// 支持的特征算法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    /// 128 维浮点描述子
    Sift,
    /// 256 位二进制描述子
    Orb,
}

impl Extractor {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sift => "SIFT",
            Self::Orb => "ORB",
        }
    }

    pub fn descriptor_kind(&self) -> DescriptorKind {
        match self {
            Self::Sift => DescriptorKind::Float,
            Self::Orb => DescriptorKind::Binary,
        }
    }

    /// 描述子维度，对二进制描述子是字节数
    pub fn descriptor_dim(&self) -> usize {
        match self {
            Self::Sift => 128,
            Self::Orb => 32,
        }
    }
}

impl fmt::Display for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Extractor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SIFT" => Ok(Self::Sift),
            "ORB" => Ok(Self::Orb),
            // 不会悄悄换成 SIFT，避免特征目录名与实际算法不符
            "SURF" => Err("SURF 不可用，请显式指定 SIFT".to_owned()),
            _ => Err(format!("未知的特征算法: {}，可选 SIFT、ORB", s)),
        }
    }
}

/// 创建默认的检测器工厂
#[cfg(feature = "opencv")]
pub fn detector_factory(extractor: Extractor, nfeatures: u32) -> anyhow::Result<OpencvFactory> {
    Ok(OpencvFactory::new(extractor, nfeatures))
}

#[cfg(not(feature = "opencv"))]
pub fn detector_factory(extractor: Extractor, _nfeatures: u32) -> anyhow::Result<Unavailable> {
    Err(anyhow::anyhow!("{} 检测器需要启用 opencv 特性重新编译", extractor))
}

/// 未启用任何检测后端时的占位类型
#[cfg(not(feature = "opencv"))]
pub enum Unavailable {}

#[cfg(not(feature = "opencv"))]
impl Detector for Unavailable {
    fn detect_file(&mut self, _path: &Path) -> anyhow::Result<ImageFeatures> {
        match *self {}
    }
}

#[cfg(not(feature = "opencv"))]
impl DetectorFactory for Unavailable {
    type Detector = Unavailable;

    fn name(&self) -> &str {
        match *self {}
    }

    fn descriptor_kind(&self) -> DescriptorKind {
        match *self {}
    }

    fn create(&self) -> anyhow::Result<Self::Detector> {
        match *self {}
    }
}
