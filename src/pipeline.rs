use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::descriptor::DescriptorSet;
use crate::detector::{Detector, DetectorFactory};
use crate::error::{Error, Result};
use crate::matcher::{MatchList, MatcherKind, PairwiseMatcher};
use crate::store::{FeatureStore, MatchStore, PairKey, check_id};
use crate::utils::{image_id, pb_style, scan_images};

/// 图片来源
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// 扫描目录（不递归），只保留后缀名在列表中的文件，大小写不敏感
    Directory { path: PathBuf, extensions: Vec<String> },
    /// 显式给出的图片文件
    Files(Vec<PathBuf>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub id: String,
    pub path: PathBuf,
}

/// 解析图片来源，结果按图片标识排序
pub fn discover(source: &ImageSource) -> Result<Vec<ImageEntry>> {
    let paths = match source {
        ImageSource::Directory { path, extensions } => scan_images(path, extensions)?,
        ImageSource::Files(files) => {
            if let Some(missing) = files.iter().find(|p| !p.is_file()) {
                return Err(Error::Config(format!("图片文件不存在: {}", missing.display())));
            }
            files.clone()
        }
    };
    if paths.is_empty() {
        return Err(Error::Config("没有找到任何图片".to_owned()));
    }

    let mut entries = paths
        .into_iter()
        .map(|path| Ok(ImageEntry { id: image_id(&path)?, path }))
        .collect::<Result<Vec<_>>>()?;
    entries.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.path.cmp(&b.path)));

    for w in entries.windows(2) {
        if w[0].id == w[1].id {
            return Err(Error::Config(format!(
                "图片标识重复: {} 和 {}",
                w[0].path.display(),
                w[1].path.display()
            )));
        }
    }
    Ok(entries)
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub matcher: MatcherKind,
    pub cross_check: bool,
    /// 每完成多少项输出一次进度，0 表示不输出
    pub print_every: usize,
    /// 工作线程数，0 表示使用所有 CPU
    pub jobs: usize,
    /// 跳过已存在的结果
    pub resume: bool,
    /// 任意一张图片或图片对失败时立即中止
    pub fail_fast: bool,
    /// 匹配前一次性加载所有描述子
    pub preload: bool,
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherKind::BruteForce,
            cross_check: true,
            print_every: 1,
            jobs: 0,
            resume: false,
            fail_fast: false,
            preload: false,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    /// 图片标识和特征点数量
    pub extracted: Vec<(String, usize)>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl ExtractReport {
    /// 可以参与匹配的图片，包括跳过的
    pub fn available(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .extracted
            .iter()
            .map(|(id, _)| id.clone())
            .chain(self.skipped.iter().cloned())
            .collect();
        ids.sort();
        ids
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    /// 图片对和匹配数量
    pub matched: Vec<(PairKey, usize)>,
    pub skipped: Vec<PairKey>,
    pub failed: Vec<(PairKey, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub extract: ExtractReport,
    pub matches: MatchReport,
}

enum Outcome {
    Done(usize),
    Skipped,
    Failed(Error),
    Cancelled,
}

/// 完整的特征提取与匹配流程
pub struct MatchingPipeline<F, M = ()> {
    config: PipelineConfig,
    features: F,
    matches: M,
    pool: ThreadPool,
    matcher: PairwiseMatcher,
}

impl<F: FeatureStore, M: Sync> MatchingPipeline<F, M> {
    pub fn new(config: PipelineConfig, features: F, matches: M) -> Result<Self> {
        let pool = ThreadPoolBuilder::new().num_threads(config.jobs).build()?;
        let matcher = PairwiseMatcher::new(config.matcher, config.cross_check);
        debug!("线程池大小: {}", pool.current_num_threads());
        Ok(Self { config, features, matches, pool, matcher })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn features(&self) -> &F {
        &self.features
    }

    pub fn matches(&self) -> &M {
        &self.matches
    }

    /// 提取并保存每张图片的特征，失败的图片会被排除
    pub fn extract<D: DetectorFactory>(
        &self,
        factory: &D,
        images: &[ImageEntry],
    ) -> Result<ExtractReport> {
        info!("使用 {} 提取 {} 张图片的特征", factory.name(), images.len());
        let progress = Progress::new(&self.config, images.len(), "张图片");
        let stop = AtomicBool::new(false);

        let outcomes: Vec<Outcome> = self.pool.install(|| {
            images
                .par_iter()
                .map_init(
                    || factory.create(),
                    |detector, entry| {
                        if stop.load(Ordering::Relaxed) {
                            return Outcome::Cancelled;
                        }
                        let outcome = self.extract_one(detector, entry);
                        if let Outcome::Failed(e) = &outcome {
                            warn!("{}", e);
                            if self.config.fail_fast || !e.is_recoverable() {
                                stop.store(true, Ordering::Relaxed);
                            }
                        }
                        progress.inc();
                        outcome
                    },
                )
                .collect()
        });
        progress.finish();

        let mut report = ExtractReport::default();
        let mut abort = None;
        for (entry, outcome) in images.iter().zip(outcomes) {
            match outcome {
                Outcome::Done(n) => report.extracted.push((entry.id.clone(), n)),
                Outcome::Skipped => report.skipped.push(entry.id.clone()),
                Outcome::Failed(e) => {
                    report.failed.push((entry.id.clone(), e.to_string()));
                    if abort.is_none() && (self.config.fail_fast || !e.is_recoverable()) {
                        abort = Some(e);
                    }
                }
                Outcome::Cancelled => {}
            }
        }
        if let Some(e) = abort {
            return Err(e);
        }

        info!(
            "特征提取完成: 成功 {}，跳过 {}，失败 {}",
            report.extracted.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn extract_one<T: Detector>(
        &self,
        detector: &mut anyhow::Result<T>,
        entry: &ImageEntry,
    ) -> Outcome {
        if self.config.resume && self.features.contains(&entry.id) {
            debug!("跳过已提取的图片: {}", entry.id);
            return Outcome::Skipped;
        }
        let detected = match detector {
            Ok(detector) => detector.detect_file(&entry.path),
            Err(e) => Err(anyhow::anyhow!("无法创建检测器: {}", e)),
        };
        let features = match detected {
            Ok(features) => features,
            Err(e) => {
                return Outcome::Failed(Error::Extraction {
                    image: entry.id.clone(),
                    reason: format!("{:#}", e),
                });
            }
        };
        debug!("{}: {} 个特征点", entry.id, features.len());
        match self.features.save(&entry.id, &features) {
            Ok(()) => Outcome::Done(features.len()),
            Err(e) => Outcome::Failed(e),
        }
    }
}

impl<F: FeatureStore> MatchingPipeline<F> {
    /// 只提取特征，不保存匹配结果
    pub fn extract_only(config: PipelineConfig, features: F) -> Result<Self> {
        Self::new(config, features, ())
    }
}

impl<F: FeatureStore, M: MatchStore> MatchingPipeline<F, M> {
    /// 解析图片、提取特征并对所有图片对进行匹配
    pub fn run<D: DetectorFactory>(&self, factory: &D, source: &ImageSource) -> Result<RunReport> {
        let images = discover(source)?;
        info!("找到 {} 张图片", images.len());
        self.run_images(factory, &images)
    }

    /// 对已经解析好的图片提取特征并进行匹配
    pub fn run_images<D: DetectorFactory>(
        &self,
        factory: &D,
        images: &[ImageEntry],
    ) -> Result<RunReport> {
        let kind = factory.descriptor_kind();
        if !self.config.matcher.supports(kind) {
            return Err(Error::Config(format!(
                "{} 不支持 {} 的 {} 描述子",
                self.config.matcher,
                factory.name(),
                kind
            )));
        }

        let extract = self.extract(factory, images)?;
        let matches = self.match_all(&extract.available())?;
        Ok(RunReport { extract, matches })
    }

    /// 对特征存储中已有的所有图片进行匹配
    pub fn match_stored(&self) -> Result<MatchReport> {
        let ids = self.features.ids()?;
        self.match_all(&ids)
    }

    /// 对给定图片两两匹配并保存结果，失败的图片对会被跳过
    pub fn match_all(&self, ids: &[String]) -> Result<MatchReport> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        for id in &ids {
            check_id(id)?;
        }

        let n = ids.len();
        let pairs: Vec<(usize, usize)> =
            (0..n).flat_map(|i| (i + 1..n).map(move |j| (i, j))).collect();
        info!("使用 {} 匹配 {} 张图片，共 {} 对", self.config.matcher, n, pairs.len());

        let preloaded = if self.config.preload {
            debug!("预加载 {} 组描述子", n);
            let sets: Vec<Result<DescriptorSet>> = self
                .pool
                .install(|| ids.par_iter().map(|id| self.features.load_descriptors(id)).collect());
            Some(sets.into_iter().map(|r| r.map_err(|e| e.to_string())).collect::<Vec<_>>())
        } else {
            None
        };

        let progress = Progress::new(&self.config, pairs.len(), "对图片");
        let stop = AtomicBool::new(false);

        let outcomes: Vec<Outcome> = self.pool.install(|| {
            pairs
                .par_iter()
                .map(|&(i, j)| {
                    if stop.load(Ordering::Relaxed) {
                        return Outcome::Cancelled;
                    }
                    let outcome = self.match_one(&ids, i, j, preloaded.as_deref());
                    if let Outcome::Failed(e) = &outcome {
                        warn!("{}", e);
                        if self.config.fail_fast || !e.is_recoverable() {
                            stop.store(true, Ordering::Relaxed);
                        }
                    }
                    progress.inc();
                    outcome
                })
                .collect()
        });
        progress.finish();

        let mut report = MatchReport::default();
        let mut abort = None;
        for (&(i, j), outcome) in pairs.iter().zip(outcomes) {
            let key = PairKey::new(&ids[i], &ids[j])?;
            match outcome {
                Outcome::Done(n) => report.matched.push((key, n)),
                Outcome::Skipped => report.skipped.push(key),
                Outcome::Failed(e) => {
                    report.failed.push((key, e.to_string()));
                    if abort.is_none() && (self.config.fail_fast || !e.is_recoverable()) {
                        abort = Some(e);
                    }
                }
                Outcome::Cancelled => {}
            }
        }
        if let Some(e) = abort {
            return Err(e);
        }

        info!(
            "匹配完成: 成功 {}，跳过 {}，失败 {}",
            report.matched.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn match_one(
        &self,
        ids: &[String],
        i: usize,
        j: usize,
        preloaded: Option<&[std::result::Result<DescriptorSet, String>]>,
    ) -> Outcome {
        let key = match PairKey::new(&ids[i], &ids[j]) {
            Ok(key) => key,
            Err(e) => return Outcome::Failed(e),
        };
        if self.config.resume && self.matches.contains(&key) {
            debug!("跳过已匹配的图片对: {}", key);
            return Outcome::Skipped;
        }

        let computed = self.load_set(ids, i, preloaded).and_then(|a| {
            let b = self.load_set(ids, j, preloaded)?;
            self.matcher.compute(&a, &b).map_err(|e| e.to_string())
        });
        let list = match computed {
            Ok(list) => list,
            Err(reason) => {
                return Outcome::Failed(Error::MatchCompute { pair: key.to_string(), reason });
            }
        };
        match self.matches.save(&key, &list) {
            Ok(()) => Outcome::Done(list.len()),
            Err(e) => Outcome::Failed(e),
        }
    }

    fn load_set<'p>(
        &self,
        ids: &[String],
        idx: usize,
        preloaded: Option<&'p [std::result::Result<DescriptorSet, String>]>,
    ) -> std::result::Result<Cow<'p, DescriptorSet>, String> {
        match preloaded {
            Some(sets) => sets[idx].as_ref().map(Cow::Borrowed).map_err(Clone::clone),
            None => {
                self.features.load_descriptors(&ids[idx]).map(Cow::Owned).map_err(|e| e.to_string())
            }
        }
    }

    /// 匹配单个图片对并保存，返回的结果中 `query` 对应字典序较小的图片
    pub fn match_pair(&self, a: &str, b: &str) -> Result<MatchList> {
        let key = PairKey::new(a, b)?;
        let to_failure = |reason: String| Error::MatchCompute { pair: key.to_string(), reason };

        let first =
            self.features.load_descriptors(key.first()).map_err(|e| to_failure(e.to_string()))?;
        let second =
            self.features.load_descriptors(key.second()).map_err(|e| to_failure(e.to_string()))?;
        let list = self
            .pool
            .install(|| self.matcher.compute(&first, &second))
            .map_err(|e| to_failure(e.to_string()))?;
        self.matches.save(&key, &list)?;
        Ok(list)
    }
}

/// 进度条和周期性的日志输出
struct Progress {
    pb: ProgressBar,
    done: AtomicUsize,
    total: usize,
    print_every: usize,
    unit: &'static str,
}

impl Progress {
    fn new(config: &PipelineConfig, total: usize, unit: &'static str) -> Self {
        let pb = if config.show_progress {
            ProgressBar::new(total as u64).with_style(pb_style())
        } else {
            ProgressBar::hidden()
        };
        Self { pb, done: AtomicUsize::new(0), total, print_every: config.print_every, unit }
    }

    fn inc(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.pb.inc(1);
        if self.print_every > 0 && done % self.print_every == 0 {
            let message = format!("已完成 {}/{} {}", done, self.total, self.unit);
            if self.pb.is_hidden() {
                info!("{}", message);
            } else {
                self.pb.set_message(message);
            }
        }
    }

    fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), b"").unwrap();
        }
    }

    #[test]
    fn test_discover_sorted_by_id() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &["c.jpg", "a.PNG", "b.jpg", "notes.txt"]);
        let source = ImageSource::Directory {
            path: dir.path().to_path_buf(),
            extensions: vec!["jpg".to_owned(), "png".to_owned()],
        };
        let ids: Vec<_> = discover(&source).unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_discover_duplicate_id() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &["a.jpg", "a.png"]);
        let source = ImageSource::Directory {
            path: dir.path().to_path_buf(),
            extensions: vec!["jpg".to_owned(), "png".to_owned()],
        };
        assert!(matches!(discover(&source), Err(Error::Config(_))));
    }

    #[test]
    fn test_discover_empty() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &["a.txt"]);
        let source = ImageSource::Directory {
            path: dir.path().to_path_buf(),
            extensions: vec!["jpg".to_owned()],
        };
        assert!(matches!(discover(&source), Err(Error::Config(_))));
        assert!(matches!(discover(&ImageSource::Files(vec![])), Err(Error::Config(_))));
    }

    #[test]
    fn test_discover_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &["y.bmp", "x.jpg"]);
        let files = vec![dir.path().join("y.bmp"), dir.path().join("x.jpg")];
        let entries = discover(&ImageSource::Files(files)).unwrap();
        assert_eq!(entries[0].id, "x");
        assert_eq!(entries[1].path, dir.path().join("y.bmp"));

        let missing = ImageSource::Files(vec![dir.path().join("z.jpg")]);
        assert!(matches!(discover(&missing), Err(Error::Config(_))));
    }

    #[test]
    fn test_report_available() {
        let report = ExtractReport {
            extracted: vec![("c".to_owned(), 3), ("a".to_owned(), 0)],
            skipped: vec!["b".to_owned()],
            failed: vec![("d".to_owned(), "broken".to_owned())],
        };
        assert_eq!(report.available(), vec!["a", "b", "c"]);
    }
}
