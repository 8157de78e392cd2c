use anyhow::Result;
use clap::{Parser, ValueEnum};

use super::existing_dir;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::matcher::{MatchList, MatcherKind};
use crate::store::{FsMatchStore, MatchStore, PairKey};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 第一张图片的标识，输出中的 query 对应这张图片
    pub a: String,
    /// 第二张图片的标识
    pub b: String,
    /// 匹配结果所用的匹配器
    #[arg(short, long, value_name = "NAME", default_value = "BFMatcher")]
    pub matcher: MatcherKind,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let root = opts.out_dir.matches(self.matcher.name());
        let store = FsMatchStore::open(existing_dir(&root)?)?;
        let key = PairKey::new(&self.a, &self.b)?;
        let mut matches = store.load(&key)?;
        if key.is_swapped(&self.a) {
            matches = matches.swapped();
        }
        print_result(&matches, self.output_format)
    }
}

fn print_result(matches: &MatchList, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(matches.as_slice())?)
        }
        OutputFormat::Table => {
            for m in matches {
                println!("{:.4}\t{}\t{}", m.distance, m.query, m.train);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
