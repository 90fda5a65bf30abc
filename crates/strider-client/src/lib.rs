pub mod analyzer;
pub mod downloader;
pub mod modules;
pub mod pipeline;
pub mod throttle;

pub use analyzer::LinkAnalyzer;
pub use downloader::ReqwestDownloader;
pub use modules::default_module_set;
pub use pipeline::{ItemProcessor, ProcessorPipeline};
pub use throttle::{HostThrottle, ThrottleConfig};
