use anyhow::{Result, bail};
use clap::Parser;
use tokio::task::block_in_place;

use super::existing_dir;
use crate::cli::SubCommandExtend;
use crate::config::{MatchOptions, Opts, RunOptions};
use crate::detector::Extractor;
use crate::pipeline::MatchingPipeline;
use crate::store::{FsFeatureStore, FsMatchStore};

#[derive(Parser, Debug, Clone)]
pub struct MatchCommand {
    /// 特征目录对应的特征算法
    #[arg(short, long, value_name = "NAME", default_value = "SIFT")]
    pub extractor: Extractor,
    #[command(flatten)]
    pub matching: MatchOptions,
    #[command(flatten)]
    pub common: RunOptions,
}

impl SubCommandExtend for MatchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let kind = self.extractor.descriptor_kind();
        if !self.matching.matcher.supports(kind) {
            bail!("{} 不支持 {} 的 {} 描述子", self.matching.matcher, self.extractor, kind);
        }

        let root = opts.out_dir.features(self.extractor.name());
        let features = FsFeatureStore::open(existing_dir(&root)?)?;
        let matches = FsMatchStore::open(opts.out_dir.matches(self.matching.matcher.name()))?;
        let config = self.matching.apply(opts.pipeline_config(&self.common));
        let pipeline = MatchingPipeline::new(config, features, matches)?;

        let report = block_in_place(|| pipeline.match_stored())?;
        println!(
            "匹配 {} 个图片对，跳过 {}，失败 {}",
            report.matched.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(())
    }
}
