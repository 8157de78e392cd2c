use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{ArgAction, Parser, Subcommand};

use crate::cli::*;
use crate::detector::Extractor;
use crate::matcher::MatcherKind;
use crate::pipeline::PipelineConfig;
use crate::utils::parse_extensions;

#[derive(Parser, Debug, Clone)]
pub struct ExtractOptions {
    /// 特征算法，可选 SIFT、ORB
    #[arg(short, long, value_name = "NAME", default_value = "SIFT", value_parser = parse_extractor)]
    pub extractor: Extractor,
    /// ORB 特征点最大保留数量
    #[arg(short = 'n', long, value_name = "N", default_value_t = 500)]
    pub nfeatures: u32,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png")]
    pub suffix: String,
}

impl ExtractOptions {
    pub fn extensions(&self) -> Vec<String> {
        parse_extensions(&self.suffix)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct MatchOptions {
    /// 匹配器，可选 BFMatcher、KdTreeMatcher
    #[arg(short, long, value_name = "NAME", default_value = "BFMatcher", value_parser = parse_matcher)]
    pub matcher: MatcherKind,
    /// 是否只保留互为最近邻的匹配
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub cross_check: bool,
    /// 一次性加载所有描述子，而不是每个图片对单独读取
    #[arg(long)]
    pub preload: bool,
}

impl MatchOptions {
    pub fn apply(&self, config: PipelineConfig) -> PipelineConfig {
        PipelineConfig {
            matcher: self.matcher,
            cross_check: self.cross_check,
            preload: self.preload,
            ..config
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct RunOptions {
    /// 每完成多少张图片或图片对输出一次进度，0 表示不输出
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub print_every: usize,
    /// 跳过已经存在的特征和匹配结果
    #[arg(long)]
    pub resume: bool,
    /// 任意一张图片或图片对失败时立即退出
    #[arg(long)]
    pub fail_fast: bool,
    /// 不显示进度条
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "featmatch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 输出目录，特征和匹配结果会保存在其中的 features 和 matches 子目录
    #[arg(short, long, global = true, default_value = ".")]
    pub out_dir: OutDir,
    /// 工作线程数
    #[arg(short, long, global = true, default_value_t = num_cpus::get())]
    pub jobs: usize,
}

impl Opts {
    /// 根据命令行参数生成流程配置，匹配相关的选项使用默认值
    pub fn pipeline_config(&self, common: &RunOptions) -> PipelineConfig {
        PipelineConfig {
            print_every: common.print_every,
            jobs: self.jobs,
            resume: common.resume,
            fail_fast: common.fail_fast,
            show_progress: !common.no_progress,
            ..PipelineConfig::default()
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 提取特征并对所有图片对进行匹配
    Run(RunCommand),
    /// 只提取特征
    Extract(ExtractCommand),
    /// 对已提取特征的图片进行匹配
    Match(MatchCommand),
    /// 显示一个图片对的匹配结果
    Show(ShowCommand),
}

#[derive(Debug, Clone)]
pub struct OutDir {
    path: PathBuf,
}

impl OutDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回某种特征算法的特征目录
    pub fn features(&self, extractor: &str) -> PathBuf {
        self.path.join("features").join(extractor)
    }

    /// 返回某种匹配器的匹配结果目录
    pub fn matches(&self, matcher: &str) -> PathBuf {
        self.path.join("matches").join(matcher)
    }
}

impl FromStr for OutDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn parse_extractor(s: &str) -> Result<Extractor, String> {
    s.parse()
}

fn parse_matcher(s: &str) -> Result<MatcherKind, String> {
    s.parse()
}
