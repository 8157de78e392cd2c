use std::path::Path;

use anyhow::{Result, anyhow, bail};
use opencv::core::{KeyPoint, Mat, Ptr, Vector};
use opencv::features2d::{ORB, SIFT};
use opencv::imgcodecs;
use opencv::prelude::*;

use super::{Detector, DetectorFactory, Extractor, ImageFeatures};
use crate::descriptor::{DescriptorKind, DescriptorSet, Descriptors};
use crate::keypoint::Keypoint;

enum Inner {
    Sift(Ptr<SIFT>),
    Orb(Ptr<ORB>),
}

/// 基于 OpenCV features2d 的检测器
pub struct OpencvDetector {
    extractor: Extractor,
    inner: Inner,
}

impl OpencvDetector {
    pub fn create(extractor: Extractor, nfeatures: u32) -> Result<Self> {
        let inner = match extractor {
            Extractor::Sift => Inner::Sift(SIFT::create_def()?),
            Extractor::Orb => {
                let mut orb = ORB::create_def()?;
                orb.set_max_features(i32::try_from(nfeatures)?)?;
                Inner::Orb(orb)
            }
        };
        Ok(Self { extractor, inner })
    }

    pub fn detect_image(&mut self, image: &Mat) -> Result<ImageFeatures> {
        let mask = Mat::default();
        let mut kps = Vector::<KeyPoint>::new();
        let mut des = Mat::default();
        match &mut self.inner {
            Inner::Sift(sift) => sift.detect_and_compute(image, &mask, &mut kps, &mut des, false)?,
            Inner::Orb(orb) => orb.detect_and_compute(image, &mask, &mut kps, &mut des, false)?,
        }

        let keypoints = kps
            .iter()
            .map(|kp| {
                let pt = kp.pt();
                Keypoint {
                    x: f64::from(pt.x),
                    y: f64::from(pt.y),
                    scale: f64::from(kp.size()),
                    // OpenCV 的角度单位是度
                    orientation: f64::from(kp.angle()).to_radians(),
                    response: f64::from(kp.response()),
                    octave: kp.octave(),
                    class_id: kp.class_id(),
                }
            })
            .collect::<Vec<_>>();

        let dim = self.extractor.descriptor_dim();
        let descriptors = if des.rows() == 0 {
            DescriptorSet::empty(self.extractor.descriptor_kind(), dim)
        } else {
            if des.cols() as usize != dim {
                bail!("描述子维度为 {}，应为 {}", des.cols(), dim);
            }
            match self.extractor.descriptor_kind() {
                DescriptorKind::Float => {
                    Descriptors::from_vec(dim, des.data_typed::<f32>()?.to_vec())?.into()
                }
                DescriptorKind::Binary => {
                    Descriptors::from_vec(dim, des.data_typed::<u8>()?.to_vec())?.into()
                }
            }
        };

        Ok(ImageFeatures::new(keypoints, descriptors)?)
    }
}

impl Detector for OpencvDetector {
    fn detect_file(&mut self, path: &Path) -> Result<ImageFeatures> {
        let filename = path.to_str().ok_or_else(|| anyhow!("路径不是有效的 UTF-8"))?;
        let image = imgcodecs::imread(filename, imgcodecs::IMREAD_GRAYSCALE)?;
        if image.empty() {
            bail!("无法读取图片");
        }
        self.detect_image(&image)
    }
}

#[derive(Debug, Clone)]
pub struct OpencvFactory {
    extractor: Extractor,
    nfeatures: u32,
}

impl OpencvFactory {
    pub fn new(extractor: Extractor, nfeatures: u32) -> Self {
        Self { extractor, nfeatures }
    }
}

impl DetectorFactory for OpencvFactory {
    type Detector = OpencvDetector;

    fn name(&self) -> &str {
        self.extractor.name()
    }

    fn descriptor_kind(&self) -> DescriptorKind {
        self.extractor.descriptor_kind()
    }

    fn create(&self) -> Result<OpencvDetector> {
        OpencvDetector::create(self.extractor, self.nfeatures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nfeatures_out_of_range() {
        assert!(OpencvDetector::create(Extractor::Orb, u32::MAX).is_err());
        assert!(OpencvDetector::create(Extractor::Orb, 500).is_ok());
    }
}
