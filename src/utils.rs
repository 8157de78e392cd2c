use std::path::{Path, PathBuf};

use indicatif::ProgressStyle;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::store::check_id;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .expect("failed to build progress style")
        .progress_chars("#>-")
}

/// 解析逗号分隔的后缀名列表，忽略前导的 `.` 和空项
pub fn parse_extensions(s: &str) -> Vec<String> {
    s.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_owned())
        .filter(|ext| !ext.is_empty())
        .collect()
}

fn suffix_regex(extensions: &[String]) -> Result<Regex> {
    let alternatives = extensions.iter().map(|ext| regex::escape(ext)).collect::<Vec<_>>();
    Regex::new(&format!("(?i)^({})$", alternatives.join("|")))
        .map_err(|e| Error::Config(format!("无效的后缀名: {}", e)))
}

/// 扫描目录下（不递归）后缀名符合条件的文件，按路径排序
pub fn scan_images(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::Config(format!("图片目录不存在: {}", dir.display())));
    }
    if extensions.is_empty() {
        return Err(Error::Config("至少需要一个后缀名".to_owned()));
    }
    let re_suf = suffix_regex(extensions)?;

    let mut paths = vec![];
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            Error::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matched = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| re_suf.is_match(ext));
        if matched {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// 图片标识为去掉后缀的文件名
pub fn image_id(path: &Path) -> Result<String> {
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Config(format!("无法从 {} 得到图片标识", path.display())))?;
    check_id(id)?;
    Ok(id.to_owned())
}
