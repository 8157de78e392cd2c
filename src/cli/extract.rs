use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use super::image_source;
use crate::cli::SubCommandExtend;
use crate::config::{ExtractOptions, Opts, RunOptions};
use crate::detector::detector_factory;
use crate::pipeline::{MatchingPipeline, discover};
use crate::store::FsFeatureStore;

#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    #[command(flatten)]
    pub extract: ExtractOptions,
    #[command(flatten)]
    pub common: RunOptions,
    /// 图片所在目录，或者多个图片文件
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

impl SubCommandExtend for ExtractCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let source = image_source(&self.paths, self.extract.extensions())?;
        let images = discover(&source)?;
        info!("找到 {} 张图片", images.len());
        let factory = detector_factory(self.extract.extractor, self.extract.nfeatures)?;

        let root = opts.out_dir.features(self.extract.extractor.name());
        let features = FsFeatureStore::open(&root)?;
        let config = opts.pipeline_config(&self.common);
        let pipeline = MatchingPipeline::extract_only(config, features)?;

        let report = block_in_place(|| pipeline.extract(&factory, &images))?;
        println!(
            "提取 {} 张图片，跳过 {}，失败 {}，保存在 {}",
            report.extracted.len(),
            report.skipped.len(),
            report.failed.len(),
            root.display()
        );
        Ok(())
    }
}
