use std::sync::LazyLock;

use regex::Regex;

use crate::extract::detail::DetailInfo;

static DOLLAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$([\d,]+)").unwrap());

/// Path segment shared by every product-detail URL on the source site.
pub const PRODUCT_PATH: &str = "/product/";

/// One discovered product. `link` is the identity used for dedup; everything
/// else is best effort and may stay empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductListing {
    pub name: String,
    pub description: String,
    /// Non-negative number kept as its decimal string, `"0"` when unknown.
    pub revenue: String,
    pub link: String,
    pub thumbnail_url: String,
    pub first_feed_post: String,
    pub website_url: String,
    pub is_verified: bool,
}

impl ProductListing {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            name: "Unknown".to_string(),
            description: String::new(),
            revenue: "0".to_string(),
            link: link.into(),
            thumbnail_url: String::new(),
            first_feed_post: String::new(),
            website_url: String::new(),
            is_verified: false,
        }
    }

    pub fn revenue_value(&self) -> f64 {
        self.revenue.parse().unwrap_or(0.0)
    }

    /// Product slug: the path segment right after `/product/`.
    pub fn slug(&self) -> Option<&str> {
        let rest = self.link.split(PRODUCT_PATH).nth(1)?;
        let slug = rest.split(['/', '?', '#']).next()?;
        (!slug.is_empty()).then_some(slug)
    }

    /// Merge detail-page values over listing-page values.
    pub fn apply_details(&mut self, details: DetailInfo) {
        if let Some(revenue) = details.revenue {
            self.revenue = revenue;
        }
        if let Some(thumbnail) = details.thumbnail_url {
            self.thumbnail_url = thumbnail;
        }
        if let Some(post) = details.first_feed_post {
            self.first_feed_post = post;
        }
        if let Some(website) = details.website_url {
            self.website_url = website;
        }
        self.is_verified = details.is_verified || self.is_verified;
    }

    /// Fill a missing thumbnail from the site's avatar URL scheme.
    pub fn ensure_thumbnail(&mut self) {
        if !self.thumbnail_url.is_empty() {
            return;
        }
        if let Some(slug) = self.slug() {
            self.thumbnail_url = avatar_url(slug);
        }
    }

    pub fn has_http_thumbnail(&self) -> bool {
        let t = self.thumbnail_url.trim();
        !t.is_empty() && t.starts_with("http")
    }
}

pub fn avatar_url(slug: &str) -> String {
    format!(
        "https://storage.googleapis.com/indie-hackers.appspot.com/product-avatars/{slug}/128x128_{slug}.webp"
    )
}

/// First `$1,234`-style figure in `text`, commas stripped, `"0"` when absent.
pub fn parse_revenue(text: &str) -> String {
    let value = DOLLAR_RE
        .captures(text)
        .and_then(|c| c[1].replace(',', "").parse::<f64>().ok())
        .unwrap_or(0.0);
    format!("{}", value)
}
