use std::path::Path;

use opml::{Outline, OPML};

use crate::error::Result;
use crate::models::NewFeed;

/// Reads every feed outline (those with an `xmlUrl`) from an OPML file,
/// including ones nested in folders.
pub fn parse_opml_file(path: &Path) -> Result<Vec<NewFeed>> {
    let content = std::fs::read_to_string(path)?;
    parse_opml(&content)
}

pub fn parse_opml(content: &str) -> Result<Vec<NewFeed>> {
    let document = OPML::from_str(content)?;
    let mut feeds = Vec::new();
    collect_feeds(&document.body.outlines, &mut feeds);
    Ok(feeds)
}

fn collect_feeds(outlines: &[Outline], feeds: &mut Vec<NewFeed>) {
    for outline in outlines {
        if let Some(url) = outline.xml_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            let title = outline
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| outline.text.clone());
            feeds.push(NewFeed {
                title,
                url: url.to_string(),
            });
        }
        collect_feeds(&outline.outlines, feeds);
    }
}
