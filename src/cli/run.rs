use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::task::block_in_place;

use super::image_source;
use crate::cli::SubCommandExtend;
use crate::config::{ExtractOptions, MatchOptions, Opts, RunOptions};
use crate::detector::detector_factory;
use crate::pipeline::{MatchingPipeline, discover};
use crate::store::{FsFeatureStore, FsMatchStore};

#[derive(Parser, Debug, Clone)]
pub struct RunCommand {
    #[command(flatten)]
    pub extract: ExtractOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    #[command(flatten)]
    pub common: RunOptions,
    /// 图片所在目录，或者多个图片文件
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

impl SubCommandExtend for RunCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let source = image_source(&self.paths, self.extract.extensions())?;
        let images = discover(&source)?;
        info!("找到 {} 张图片", images.len());
        let factory = detector_factory(self.extract.extractor, self.extract.nfeatures)?;

        let features = FsFeatureStore::open(opts.out_dir.features(self.extract.extractor.name()))?;
        let matches = FsMatchStore::open(opts.out_dir.matches(self.matching.matcher.name()))?;
        let config = self.matching.apply(opts.pipeline_config(&self.common));
        let pipeline = MatchingPipeline::new(config, features, matches)?;

        let report = block_in_place(|| pipeline.run_images(&factory, &images))?;
        for (id, reason) in &report.extract.failed {
            warn!("已排除 {}: {}", id, reason);
        }
        println!(
            "提取 {} 张图片，匹配 {} 个图片对，失败 {} 个图片对",
            report.extract.extracted.len() + report.extract.skipped.len(),
            report.matches.matched.len() + report.matches.skipped.len(),
            report.matches.failed.len()
        );
        Ok(())
    }
}
