use std::collections::HashMap;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::debug;
use ndarray::Array2;
use ndarray_npy::{ReadNpyError, read_npy, write_npy};

use super::{check_id, ensure_dir, write_atomic};
use crate::descriptor::{DescriptorSet, Descriptors};
use crate::detector::ImageFeatures;
use crate::error::{Error, Result};
use crate::keypoint::{self, Keypoint};

/// 每张图片的特征点和描述子存储
pub trait FeatureStore: Send + Sync {
    fn save_keypoints(&self, id: &str, keypoints: &[Keypoint]) -> Result<()>;

    fn load_keypoints(&self, id: &str) -> Result<Vec<Keypoint>>;

    fn save_descriptors(&self, id: &str, descriptors: &DescriptorSet) -> Result<()>;

    /// 不存在时返回 NotFound；空集合是合法的，与不存在不同
    fn load_descriptors(&self, id: &str) -> Result<DescriptorSet>;

    /// 特征点和描述子是否都已保存
    fn contains(&self, id: &str) -> bool;

    /// 已保存的图片标识，按字典序排列
    fn ids(&self) -> Result<Vec<String>>;

    fn save(&self, id: &str, features: &ImageFeatures) -> Result<()> {
        self.save_keypoints(id, features.keypoints())?;
        self.save_descriptors(id, features.descriptors())
    }

    fn load(&self, id: &str) -> Result<ImageFeatures> {
        let keypoints = self.load_keypoints(id)?;
        let descriptors = self.load_descriptors(id)?;
        ImageFeatures::new(keypoints, descriptors)
    }
}

impl<T: FeatureStore + ?Sized> FeatureStore for &T {
    fn save_keypoints(&self, id: &str, keypoints: &[Keypoint]) -> Result<()> {
        (**self).save_keypoints(id, keypoints)
    }

    fn load_keypoints(&self, id: &str) -> Result<Vec<Keypoint>> {
        (**self).load_keypoints(id)
    }

    fn save_descriptors(&self, id: &str, descriptors: &DescriptorSet) -> Result<()> {
        (**self).save_descriptors(id, descriptors)
    }

    fn load_descriptors(&self, id: &str) -> Result<DescriptorSet> {
        (**self).load_descriptors(id)
    }

    fn contains(&self, id: &str) -> bool {
        (**self).contains(id)
    }

    fn ids(&self) -> Result<Vec<String>> {
        (**self).ids()
    }
}

/// 文件系统存储，目录结构为 `<root>/kp_<id>.bin` 和 `<root>/desc_<id>.npy`
#[derive(Debug, Clone)]
pub struct FsFeatureStore {
    root: PathBuf,
}

impl FsFeatureStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keypoints_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("kp_{}.bin", id))
    }

    pub fn descriptors_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("desc_{}.npy", id))
    }
}

impl FeatureStore for FsFeatureStore {
    fn save_keypoints(&self, id: &str, keypoints: &[Keypoint]) -> Result<()> {
        check_id(id)?;
        let path = self.keypoints_path(id);
        write_atomic(&path, |tmp| {
            let file = fs::File::create(tmp).map_err(|e| Error::io(tmp, e))?;
            let mut writer = BufWriter::new(file);
            keypoint::encode_all(&mut writer, keypoints).map_err(|e| Error::io(tmp, e))?;
            writer.into_inner().map_err(|e| Error::io(tmp, e.into_error()))?;
            Ok(())
        })
    }

    fn load_keypoints(&self, id: &str) -> Result<Vec<Keypoint>> {
        check_id(id)?;
        let path = self.keypoints_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(Error::io(path, e)),
        };
        keypoint::decode_all(&bytes).map_err(|e| match e {
            Error::Decode { reason, .. } => Error::decode(path.display().to_string(), reason),
            e => e,
        })
    }

    fn save_descriptors(&self, id: &str, descriptors: &DescriptorSet) -> Result<()> {
        check_id(id)?;
        let path = self.descriptors_path(id);
        write_atomic(&path, |tmp| {
            let result = match descriptors {
                DescriptorSet::Float(d) => write_npy(tmp, &d.view()),
                DescriptorSet::Binary(d) => write_npy(tmp, &d.view()),
            };
            result.map_err(|source| Error::WriteNpy { path: tmp.to_path_buf(), source })
        })
    }

    fn load_descriptors(&self, id: &str) -> Result<DescriptorSet> {
        check_id(id)?;
        let path = self.descriptors_path(id);
        if !path.exists() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let what = path.display().to_string();
        // 文件本身不记录是哪种描述子，先按 f32 读取，类型不符再按 u8 读取
        match read_npy::<_, Array2<f32>>(&path) {
            Ok(array) => Ok(Descriptors::from_array(&array).into()),
            Err(ReadNpyError::WrongDescriptor(_)) => {
                debug!("{} 不是 f32 矩阵，尝试按 u8 读取", what);
                let array: Array2<u8> = read_npy(&path).map_err(|e| Error::decode(&what, e))?;
                Ok(Descriptors::from_array(&array).into())
            }
            Err(e) => Err(Error::decode(what, e)),
        }
    }

    fn contains(&self, id: &str) -> bool {
        check_id(id).is_ok()
            && self.keypoints_path(id).is_file()
            && self.descriptors_path(id).is_file()
    }

    fn ids(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| Error::io(&self.root, e))?;
        let mut ids = vec![];
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.root, e))?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|s| s.strip_prefix("desc_")?.strip_suffix(".npy"))
            else {
                continue;
            };
            if self.contains(id) {
                ids.push(id.to_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// 内存存储，主要用于测试
#[derive(Debug, Default)]
pub struct MemoryFeatureStore {
    keypoints: RwLock<HashMap<String, Vec<Keypoint>>>,
    descriptors: RwLock<HashMap<String, DescriptorSet>>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn save_keypoints(&self, id: &str, keypoints: &[Keypoint]) -> Result<()> {
        check_id(id)?;
        self.keypoints
            .write()
            .expect("failed to acquire rw lock")
            .insert(id.to_owned(), keypoints.to_vec());
        Ok(())
    }

    fn load_keypoints(&self, id: &str) -> Result<Vec<Keypoint>> {
        self.keypoints
            .read()
            .expect("failed to acquire rw lock")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} 的特征点", id)))
    }

    fn save_descriptors(&self, id: &str, descriptors: &DescriptorSet) -> Result<()> {
        check_id(id)?;
        self.descriptors
            .write()
            .expect("failed to acquire rw lock")
            .insert(id.to_owned(), descriptors.clone());
        Ok(())
    }

    fn load_descriptors(&self, id: &str) -> Result<DescriptorSet> {
        self.descriptors
            .read()
            .expect("failed to acquire rw lock")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} 的描述子", id)))
    }

    fn contains(&self, id: &str) -> bool {
        self.keypoints.read().expect("failed to acquire rw lock").contains_key(id)
            && self.descriptors.read().expect("failed to acquire rw lock").contains_key(id)
    }

    fn ids(&self) -> Result<Vec<String>> {
        let keypoints = self.keypoints.read().expect("failed to acquire rw lock");
        let descriptors = self.descriptors.read().expect("failed to acquire rw lock");
        let mut ids: Vec<String> =
            descriptors.keys().filter(|id| keypoints.contains_key(*id)).cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use tempfile::TempDir;

    use super::*;
    use crate::descriptor::DescriptorKind;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    fn sample_sets() -> Vec<DescriptorSet> {
        vec![
            Descriptors::from_rows(3, &[[0.5f32, -1.0, 3.25], [7.0, 8.0, f32::MAX]]).unwrap().into(),
            Descriptors::from_rows(4, &[[0u8, 1, 2, 255], [9, 9, 9, 9], [1, 1, 1, 1]])
                .unwrap()
                .into(),
            DescriptorSet::empty(DescriptorKind::Float, 128),
            DescriptorSet::empty(DescriptorKind::Binary, 32),
        ]
    }

    #[rstest]
    fn test_fs_descriptors_roundtrip(temp_dir: TempDir) {
        let store = FsFeatureStore::open(temp_dir.path().join("features/SIFT")).unwrap();
        for (i, set) in sample_sets().into_iter().enumerate() {
            let id = format!("img{}", i);
            store.save_descriptors(&id, &set).unwrap();
            assert_eq!(store.load_descriptors(&id).unwrap(), set);
        }
    }

    #[rstest]
    fn test_fs_missing_is_not_found(temp_dir: TempDir) {
        let store = FsFeatureStore::open(temp_dir.path()).unwrap();
        assert!(matches!(store.load_descriptors("nope"), Err(Error::NotFound(_))));
        assert!(matches!(store.load_keypoints("nope"), Err(Error::NotFound(_))));
        assert!(!store.contains("nope"));
    }

    #[rstest]
    fn test_fs_ids(temp_dir: TempDir) {
        let store = FsFeatureStore::open(temp_dir.path()).unwrap();
        let features = ImageFeatures::new(
            vec![Keypoint::new(1., 2., 3., 0.5, 0.1)],
            Descriptors::from_rows(2, &[[1f32, 2.]]).unwrap().into(),
        )
        .unwrap();
        store.save("b", &features).unwrap();
        store.save("a", &features).unwrap();
        // 只有描述子没有特征点的不算
        store.save_descriptors("c", features.descriptors()).unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(store.ids().unwrap(), vec!["a", "b"]);
        assert_eq!(store.load("a").unwrap(), features);
    }

    #[rstest]
    fn test_fs_corrupted_descriptors(temp_dir: TempDir) {
        let store = FsFeatureStore::open(temp_dir.path()).unwrap();
        fs::write(store.descriptors_path("bad"), b"not a npy file").unwrap();
        assert!(matches!(store.load_descriptors("bad"), Err(Error::Decode { .. })));
    }

    #[rstest]
    fn test_fs_corrupted_keypoints(temp_dir: TempDir) {
        let store = FsFeatureStore::open(temp_dir.path()).unwrap();
        fs::write(store.keypoints_path("bad"), b"FMKP\x01").unwrap();
        let err = store.load_keypoints("bad").unwrap_err();
        let Error::Decode { what, .. } = &err else { panic!("expected decode error: {}", err) };
        assert!(what.ends_with("kp_bad.bin"));
        assert_eq!(err.to_string().matches("无法解析").count(), 1);
    }

    #[test]
    fn test_memory_roundtrip() {
        let store = MemoryFeatureStore::new();
        for (i, set) in sample_sets().into_iter().enumerate() {
            let id = format!("img{}", i);
            store.save_keypoints(&id, &[]).unwrap();
            store.save_descriptors(&id, &set).unwrap();
            assert_eq!(store.load_descriptors(&id).unwrap(), set);
        }
        assert_eq!(store.ids().unwrap().len(), 4);
        assert!(matches!(store.load_descriptors("x"), Err(Error::NotFound(_))));
    }
}
