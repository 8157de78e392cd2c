use std::path::PathBuf;

use thiserror::Error;

/// 特征提取与匹配过程中的错误
#[derive(Debug, Error)]
pub enum Error {
    /// 输入或配置无效，在开始任何工作之前就会中止
    #[error("配置错误: {0}")]
    Config(String),
    /// 持久化的记录格式不正确
    #[error("无法解析 {what}: {reason}")]
    Decode { what: String, reason: String },
    /// 读取时找不到对应的文件
    #[error("找不到 {0}")]
    NotFound(String),
    /// 单张图片的特征提取失败，可以跳过
    #[error("图片 {image} 特征提取失败: {reason}")]
    Extraction { image: String, reason: String },
    /// 单个图片对的匹配失败，可以跳过
    #[error("图片对 {pair} 匹配失败: {reason}")]
    MatchCompute { pair: String, reason: String },
    #[error("读写 {path} 失败: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("写入 {path} 失败: {source}")]
    WriteNpy { path: PathBuf, source: ndarray_npy::WriteNpyError },
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn decode(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode { what: what.into(), reason: reason.to_string() }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// 是否是单个条目的错误，出现时跳过该条目并继续
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Extraction { .. } | Self::MatchCompute { .. })
    }
}
