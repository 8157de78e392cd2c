use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::{PairKey, ensure_dir, write_atomic};
use crate::error::{Error, Result};
use crate::matcher::MatchList;

const VERSION: u32 = 1;

/// 每个无序图片对的匹配结果存储
pub trait MatchStore: Send + Sync {
    fn save(&self, key: &PairKey, matches: &MatchList) -> Result<()>;

    /// 不存在时返回 NotFound
    fn load(&self, key: &PairKey) -> Result<MatchList>;

    fn contains(&self, key: &PairKey) -> bool;
}

impl<T: MatchStore + ?Sized> MatchStore for &T {
    fn save(&self, key: &PairKey, matches: &MatchList) -> Result<()> {
        (**self).save(key, matches)
    }

    fn load(&self, key: &PairKey) -> Result<MatchList> {
        (**self).load(key)
    }

    fn contains(&self, key: &PairKey) -> bool {
        (**self).contains(key)
    }
}

#[derive(Serialize)]
struct MatchFileRef<'a> {
    version: u32,
    pair: &'a PairKey,
    matches: &'a MatchList,
}

#[derive(Deserialize)]
struct MatchFile {
    version: u32,
    pair: PairKey,
    matches: MatchList,
}

/// 将匹配结果编码为字节，结果只取决于输入，可以逐字节比较
pub fn encode_matches(key: &PairKey, matches: &MatchList) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&MatchFileRef { version: VERSION, pair: key, matches })?)
}

pub fn decode_matches(key: &PairKey, bytes: &[u8]) -> Result<MatchList> {
    let file: MatchFile =
        bincode::deserialize(bytes).map_err(|e| Error::decode(key.to_string(), e))?;
    if file.version != VERSION {
        return Err(Error::decode(key.to_string(), format!("不支持的版本 {}", file.version)));
    }
    if &file.pair != key {
        return Err(Error::decode(key.to_string(), format!("文件中记录的图片对为 {}", file.pair)));
    }
    Ok(file.matches)
}

/// 文件系统存储，目录结构为 `<root>/match_<first>_<second>.bin`
///
/// 标识中的 `%` 和 `_` 会被转义为 `%25` 和 `%5F`，保证不同的图片对不会落到同一个文件
#[derive(Debug, Clone)]
pub struct FsMatchStore {
    root: PathBuf,
}

impl FsMatchStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &PairKey) -> PathBuf {
        let (first, second) = (escape_id(key.first()), escape_id(key.second()));
        self.root.join(format!("match_{}_{}.bin", first, second))
    }
}

fn escape_id(id: &str) -> Cow<'_, str> {
    if !id.contains(['%', '_']) {
        return Cow::Borrowed(id);
    }
    let mut escaped = String::with_capacity(id.len() + 4);
    for c in id.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '_' => escaped.push_str("%5F"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

impl MatchStore for FsMatchStore {
    fn save(&self, key: &PairKey, matches: &MatchList) -> Result<()> {
        let bytes = encode_matches(key, matches)?;
        write_atomic(&self.path(key), |tmp| fs::write(tmp, &bytes).map_err(|e| Error::io(tmp, e)))
    }

    fn load(&self, key: &PairKey) -> Result<MatchList> {
        let path = self.path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(Error::io(path, e)),
        };
        decode_matches(key, &bytes)
    }

    fn contains(&self, key: &PairKey) -> bool {
        self.path(key).is_file()
    }
}

/// 内存存储，保存编码后的字节以便测试可以比较序列化结果
#[derive(Debug, Default)]
pub struct MemoryMatchStore {
    inner: RwLock<HashMap<PairKey, Vec<u8>>>,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("failed to acquire rw lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<PairKey> {
        let mut keys: Vec<_> =
            self.inner.read().expect("failed to acquire rw lock").keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn raw(&self, key: &PairKey) -> Option<Vec<u8>> {
        self.inner.read().expect("failed to acquire rw lock").get(key).cloned()
    }
}

impl MatchStore for MemoryMatchStore {
    fn save(&self, key: &PairKey, matches: &MatchList) -> Result<()> {
        let bytes = encode_matches(key, matches)?;
        self.inner.write().expect("failed to acquire rw lock").insert(key.clone(), bytes);
        Ok(())
    }

    fn load(&self, key: &PairKey) -> Result<MatchList> {
        let bytes = self.raw(key).ok_or_else(|| Error::NotFound(key.to_string()))?;
        decode_matches(key, &bytes)
    }

    fn contains(&self, key: &PairKey) -> bool {
        self.inner.read().expect("failed to acquire rw lock").contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::matcher::Match;

    fn sample() -> MatchList {
        MatchList::new(vec![
            Match { query: 3, train: 0, distance: 12.5 },
            Match { query: 0, train: 7, distance: 0.25 },
            Match { query: 1, train: 2, distance: 12.5 },
        ])
    }

    #[test]
    fn test_fs_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FsMatchStore::open(dir.path().join("matches/BFMatcher")).unwrap();
        let key = PairKey::new("img2", "img1").unwrap();

        assert!(!store.contains(&key));
        store.save(&key, &sample()).unwrap();
        assert!(store.contains(&key));
        assert!(store.path(&key).ends_with("match_img1_img2.bin"));

        let loaded = store.load(&PairKey::new("img1", "img2").unwrap()).unwrap();
        assert_eq!(loaded, sample());
        assert_eq!(loaded.as_slice()[1].query, 3);
    }

    #[test]
    fn test_underscore_ids_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = FsMatchStore::open(dir.path()).unwrap();
        let k1 = PairKey::new("a_b", "c").unwrap();
        let k2 = PairKey::new("a", "b_c").unwrap();
        let k3 = PairKey::new("a%5Fb", "c").unwrap();
        assert_ne!(store.path(&k1), store.path(&k2));
        assert_ne!(store.path(&k1), store.path(&k3));

        let other = MatchList::new(vec![Match { query: 0, train: 0, distance: 1.0 }]);
        store.save(&k1, &sample()).unwrap();
        store.save(&k2, &other).unwrap();
        assert!(!store.contains(&k3));
        assert_eq!(store.load(&k1).unwrap(), sample());
        assert_eq!(store.load(&k2).unwrap(), other);
        assert!(store.path(&k1).ends_with("match_a%5Fb_c.bin"));
    }

    #[test]
    fn test_fs_missing() {
        let dir = TempDir::new().unwrap();
        let store = FsMatchStore::open(dir.path()).unwrap();
        let key = PairKey::new("a", "b").unwrap();
        assert!(matches!(store.load(&key), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_wrong_pair_in_file() {
        let key = PairKey::new("a", "b").unwrap();
        let other = PairKey::new("a", "c").unwrap();
        let bytes = encode_matches(&other, &sample()).unwrap();
        assert!(matches!(decode_matches(&key, &bytes), Err(Error::Decode { .. })));
        assert!(matches!(decode_matches(&key, &bytes[..10]), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_empty_list() {
        let store = MemoryMatchStore::new();
        let key = PairKey::new("a", "b").unwrap();
        store.save(&key, &MatchList::default()).unwrap();
        assert!(store.load(&key).unwrap().is_empty());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let key = PairKey::new("a", "b").unwrap();
        assert_eq!(encode_matches(&key, &sample()).unwrap(), encode_matches(&key, &sample()).unwrap());
    }
}
