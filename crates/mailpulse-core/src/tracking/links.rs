//! Tracking link instrumentation
//!
//! Rewrites absolute links to pass through the click redirector and adds the
//! open pixel. Both carry the campaign recipient id, never the bare recipient.

use super::TrackingError;
use mailpulse_common::types::CampaignRecipientId;
use regex::{Captures, Regex};
use reqwest::Url;
use std::sync::OnceLock;

fn href_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)(\bhref\s*=\s*)(?:"(https?://[^"]*)"|'(https?://[^']*)')"#)
            .expect("href pattern is valid")
    })
}

/// Builds tracking URLs under the public base URL
#[derive(Debug, Clone)]
pub struct TrackingLinks {
    base: String,
    click_endpoint: Url,
}

impl TrackingLinks {
    pub fn new(public_base_url: &str) -> Result<Self, TrackingError> {
        let base = public_base_url.trim().trim_end_matches('/').to_string();
        let parsed = Url::parse(&base)
            .map_err(|e| TrackingError::InvalidBaseUrl(format!("{}: {}", base, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TrackingError::InvalidBaseUrl(format!(
                "{}: scheme must be http or https",
                base
            )));
        }

        let click_endpoint = Url::parse(&format!("{}/track/click", base))
            .map_err(|e| TrackingError::InvalidBaseUrl(format!("{}: {}", base, e)))?;

        Ok(Self {
            base,
            click_endpoint,
        })
    }

    /// Pixel URL for one campaign recipient
    pub fn open_url(&self, id: CampaignRecipientId) -> String {
        format!("{}/track/open/{}", self.base, id)
    }

    /// Redirector URL for one destination
    pub fn click_url(&self, destination: &str, id: CampaignRecipientId) -> String {
        let mut url = self.click_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("u", destination)
            .append_pair("id", &id.to_string());
        url.to_string()
    }

    fn is_tracking_link(&self, url: &str) -> bool {
        url.starts_with(self.click_endpoint.as_str())
    }

    /// Rewrite `http(s)` hrefs and add the open pixel
    pub fn instrument(&self, html: &str, id: CampaignRecipientId) -> String {
        let rewritten = href_pattern().replace_all(html, |caps: &Captures| {
            let Some(destination) = caps.get(2).or_else(|| caps.get(3)) else {
                return caps[0].to_string();
            };
            let destination = destination.as_str().replace("&amp;", "&");
            if self.is_tracking_link(&destination) {
                return caps[0].to_string();
            }
            format!(
                "{}\"{}\"",
                &caps[1],
                self.click_url(&destination, id).replace('&', "&amp;")
            )
        });

        let pixel = format!(
            r#"<img src="{}" width="1" height="1" alt="" style="display:none" />"#,
            self.open_url(id)
        );

        match rewritten.to_ascii_lowercase().rfind("</body>") {
            Some(pos) => {
                let mut out = String::with_capacity(rewritten.len() + pixel.len());
                out.push_str(&rewritten[..pos]);
                out.push_str(&pixel);
                out.push_str(&rewritten[pos..]);
                out
            }
            None => format!("{}{}", rewritten, pixel),
        }
    }
}

/// Validate a click destination. Only absolute http(s) URLs are followed.
pub fn redirect_target(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}
