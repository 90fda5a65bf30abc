use std::net::IpAddr;

use crate::error::CrawlerError;

/// Maps a host name to the primary domain used for admission.
pub trait DomainResolver: Send + Sync {
    fn primary_domain(&self, host: &str) -> Result<String, CrawlerError>;
}

/// Second-level suffixes under which registrations happen one label deeper.
const SECOND_LEVEL_SUFFIXES: &[&str] = &[
    "ac.uk", "co.uk", "gov.uk", "org.uk", "ltd.uk", "me.uk", "net.uk", "com.au", "net.au",
    "org.au", "edu.au", "gov.au", "co.nz", "org.nz", "co.jp", "ne.jp", "or.jp", "co.kr", "or.kr",
    "com.br", "net.br", "org.br", "com.cn", "net.cn", "org.cn", "gov.cn", "edu.cn", "com.hk",
    "com.tw", "com.sg", "com.mx", "com.ar", "com.tr", "co.in", "co.za", "co.il",
];

/// Primary domain = IP literal as-is, otherwise the registrable part of
/// the host: last two labels, or last three under a known second-level
/// suffix such as `co.uk`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDomainResolver;

impl DomainResolver for DefaultDomainResolver {
    fn primary_domain(&self, host: &str) -> Result<String, CrawlerError> {
        let host = host.trim().trim_end_matches('.');
        if host.is_empty() {
            return Err(CrawlerError::illegal_parameter("empty host"));
        }
        let bare = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if bare.parse::<IpAddr>().is_ok() {
            return Ok(bare.to_string());
        }

        let host = host.to_ascii_lowercase();
        let labels: Vec<&str> = host.split('.').collect();
        if labels.iter().any(|label| label.is_empty()) {
            return Err(CrawlerError::illegal_parameter(format!(
                "illegal host: {host}"
            )));
        }
        if labels.len() <= 2 {
            return Ok(host);
        }
        let last_two = labels[labels.len() - 2..].join(".");
        let keep = if SECOND_LEVEL_SUFFIXES.contains(&last_two.as_str()) {
            3
        } else {
            2
        };
        Ok(labels[labels.len() - keep..].join("."))
    }
}
