//! Assembles the default module set for a crawl.

use std::sync::Arc;

use strider_core::traits::{Analyzer, Downloader, Pipeline};
use strider_core::{CrawlConfig, CrawlerError, Mid, ModuleSet, ModuleType, SnGenerator};

use crate::analyzer::LinkAnalyzer;
use crate::downloader::ReqwestDownloader;
use crate::pipeline::{ItemProcessor, ProcessorPipeline};

/// Builds `config.downloaders` downloaders, `config.analyzers` analyzers and
/// `config.pipelines` pipelines, numbering their MIDs from one shared serial
/// generator. Every pipeline runs the same `processors`.
pub fn default_module_set(
    config: &CrawlConfig,
    processors: Vec<ItemProcessor>,
) -> Result<ModuleSet, CrawlerError> {
    config.check()?;
    let serials = SnGenerator::default();
    let next_mid = |module_type: ModuleType| Mid::generate(module_type, serials.get(), None);

    let mut modules = ModuleSet {
        downloaders: Vec::with_capacity(config.downloaders),
        analyzers: Vec::with_capacity(config.analyzers),
        pipelines: Vec::with_capacity(config.pipelines),
    };
    for _ in 0..config.downloaders {
        let downloader =
            ReqwestDownloader::with_settings(next_mid(ModuleType::Downloader), &config.fetch)?;
        modules
            .downloaders
            .push(Arc::new(downloader) as Arc<dyn Downloader>);
    }
    for _ in 0..config.analyzers {
        let analyzer = LinkAnalyzer::new(next_mid(ModuleType::Analyzer))?;
        modules.analyzers.push(Arc::new(analyzer) as Arc<dyn Analyzer>);
    }
    for _ in 0..config.pipelines {
        let pipeline = ProcessorPipeline::new(next_mid(ModuleType::Pipeline), processors.clone())?;
        modules.pipelines.push(Arc::new(pipeline) as Arc<dyn Pipeline>);
    }

    tracing::debug!(modules = ?modules, "Default modules built");
    Ok(modules)
}
