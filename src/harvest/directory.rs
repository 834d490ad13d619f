//! Endpoint directory: discovers which provider sources to scan.

use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::harvest::traits::DiscoveryError;
use crate::model::SourceId;
use crate::traits::Transport;

/// Anchors on the portal root that link to a jurisdiction's inspection site.
const SOURCE_LINK_SELECTOR: &str = "div.jurisdiction-section a.search-button";

/// Path markers of non-production jurisdictions.
const EXCLUDED_MARKERS: [&str; 2] = ["test", "staging"];

pub struct EndpointDirectory<T: Transport> {
    transport: Arc<T>,
    root_url: String,
    fallback: BTreeSet<SourceId>,
}

impl<T: Transport> EndpointDirectory<T> {
    pub fn new(transport: Arc<T>, root_url: impl Into<String>, fallback: &[String]) -> Self {
        Self {
            transport,
            root_url: root_url.into(),
            fallback: fallback.iter().map(|s| SourceId::new(s.as_str())).collect(),
        }
    }

    /// Returns the set of sources to scan this run.
    ///
    /// Never fails: any problem with the directory page yields the fallback set.
    pub async fn discover(&self) -> BTreeSet<SourceId> {
        info!(url = %self.root_url, "Discovering provider sources");

        match self.try_discover().await {
            Ok(sources) => {
                info!(count = sources.len(), "Discovered sources to harvest");
                sources
            }
            Err(e) => {
                warn!(error = %e, fallback = self.fallback.len(), "Source discovery failed, using fallback list");
                self.fallback.clone()
            }
        }
    }

    async fn try_discover(&self) -> Result<BTreeSet<SourceId>, DiscoveryError> {
        let html = self.transport.get_text(&self.root_url).await?;
        parse_source_links(&html)
    }
}

/// Extracts source identifiers from the directory page HTML.
pub fn parse_source_links(html: &str) -> Result<BTreeSet<SourceId>, DiscoveryError> {
    let selector = Selector::parse(SOURCE_LINK_SELECTOR)
        .map_err(|e| DiscoveryError::InvalidSelector(e.to_string()))?;
    let document = Html::parse_document(html);

    let sources: BTreeSet<SourceId> = document
        .select(&selector)
        .filter_map(|link| link.value().attr("href"))
        .filter(|href| href.starts_with('/'))
        .map(|href| href.trim_matches('/'))
        .filter(|path| !path.is_empty())
        .filter(|path| {
            let lowered = path.to_ascii_lowercase();
            !EXCLUDED_MARKERS.iter().any(|marker| lowered.contains(marker))
        })
        .map(SourceId::from)
        .collect();

    if sources.is_empty() {
        return Err(DiscoveryError::NoLinks);
    }
    Ok(sources)
}
