mod extract;
mod r#match;
mod run;
mod show;

use std::path::{Path, PathBuf};

pub use extract::*;
pub use r#match::*;
pub use run::*;
pub use show::*;

use crate::config::Opts;
use crate::error::{Error, Result};
use crate::pipeline::ImageSource;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 单个目录按后缀名扫描，否则视为图片文件列表
fn image_source(paths: &[PathBuf], extensions: Vec<String>) -> Result<ImageSource> {
    match paths {
        [dir] if dir.is_dir() => Ok(ImageSource::Directory { path: dir.clone(), extensions }),
        _ => {
            if let Some(dir) = paths.iter().find(|p| p.is_dir()) {
                return Err(Error::Config(format!(
                    "只能指定一个图片目录，或者多个图片文件: {}",
                    dir.display()
                )));
            }
            Ok(ImageSource::Files(paths.to_vec()))
        }
    }
}

/// 只读打开已有的结果目录
fn existing_dir(path: &Path) -> Result<&Path> {
    if path.is_dir() { Ok(path) } else { Err(Error::NotFound(path.display().to_string())) }
}
