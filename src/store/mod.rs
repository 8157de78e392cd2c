mod features;
mod matches;

use std::fmt;
use std::fs;
use std::path::Path;

pub use features::*;
pub use matches::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 无序图片对的规范化键，`first` 的字典序总是小于 `second`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    first: String,
    second: String,
}

impl PairKey {
    /// 以任意顺序传入两张图片的标识，同一张图片返回 ConfigError
    pub fn new(a: &str, b: &str) -> Result<Self> {
        check_id(a)?;
        check_id(b)?;
        match a.cmp(b) {
            std::cmp::Ordering::Less => Ok(Self { first: a.to_owned(), second: b.to_owned() }),
            std::cmp::Ordering::Greater => Ok(Self { first: b.to_owned(), second: a.to_owned() }),
            std::cmp::Ordering::Equal => {
                Err(Error::Config(format!("图片对的两端不能相同: {}", a)))
            }
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }

    /// 传入顺序 (a, b) 是否与规范顺序相反
    pub fn is_swapped(&self, a: &str) -> bool {
        a != self.first
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.first, self.second)
    }
}

/// 图片标识会直接出现在文件名中
pub fn check_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Config("图片标识不能为空".to_owned()));
    }
    if id.contains(['/', '\\']) || id == "." || id == ".." {
        return Err(Error::Config(format!("图片标识不能包含路径: {}", id)));
    }
    Ok(())
}

/// 先写入临时文件再重命名，中断时不会留下写了一半的文件
fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    write(tmp)?;
    fs::rename(tmp, path).map_err(|e| Error::io(path, e))
}

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_canonical() {
        let ab = PairKey::new("a", "b").unwrap();
        let ba = PairKey::new("b", "a").unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.first(), "a");
        assert!(!ab.is_swapped("a"));
        assert!(ba.is_swapped("b"));
    }

    #[test]
    fn test_pair_key_invalid() {
        assert!(matches!(PairKey::new("a", "a"), Err(Error::Config(_))));
        assert!(matches!(PairKey::new("", "a"), Err(Error::Config(_))));
        assert!(matches!(PairKey::new("../x", "a"), Err(Error::Config(_))));
    }
}
