//! Page loading through a real Chromium instance.
//!
//! The source site sits behind a bot check, so pages are loaded in a headful
//! browser by default with a desktop user agent and the usual automation
//! markers hidden. Every load returns a [`PageSnapshot`]; extraction happens
//! later, off the browser.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::extract::{Layout, PageSnapshot, BADGE_SELECTOR};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--disable-web-security",
    "--disable-features=IsolateOrigins,site-per-process",
    "--window-size=1920,1080",
];

const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => false });
window.chrome = { runtime: {} };
const originalQuery = window.navigator.permissions.query;
window.navigator.permissions.query = (parameters) =>
  parameters.name === 'notifications'
    ? Promise.resolve({ state: Notification.permission })
    : originalQuery(parameters);
"#;

/// No new resource requests for this long counts as network idle.
const IDLE_WINDOW: Duration = Duration::from_millis(500);

/// How long and how patiently a page is loaded.
#[derive(Debug, Clone)]
pub struct LoadProfile {
    pub timeout: Duration,
    /// Fixed waits after navigation, for challenge pages and late rendering.
    pub settle: &'static [Duration],
    pub retry: Option<Retry>,
    /// Scroll to the bottom once if no link containing this text is present.
    pub expect_link: Option<&'static str>,
    pub scroll_wait: Duration,
}

/// A single second attempt after a failed navigation.
#[derive(Debug, Clone)]
pub struct Retry {
    pub backoff: Duration,
    pub settle: Duration,
}

impl LoadProfile {
    pub const LISTING: LoadProfile = LoadProfile {
        timeout: Duration::from_secs(120),
        settle: &[Duration::from_secs(15), Duration::from_secs(5)],
        retry: Some(Retry {
            backoff: Duration::from_secs(5),
            settle: Duration::from_secs(15),
        }),
        expect_link: Some("/product/"),
        scroll_wait: Duration::from_secs(3),
    };

    pub const DETAIL: LoadProfile = LoadProfile {
        timeout: Duration::from_secs(20),
        settle: &[Duration::from_secs(3)],
        retry: None,
        expect_link: None,
        scroll_wait: Duration::ZERO,
    };

    pub const WEBSITE: LoadProfile = LoadProfile {
        timeout: Duration::from_secs(15),
        settle: &[Duration::from_secs(2)],
        retry: None,
        expect_link: None,
        scroll_wait: Duration::ZERO,
    };
}

/// Anything that can render a URL into a snapshot.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn load(&self, url: &Url, profile: &LoadProfile) -> Result<PageSnapshot>;
}

#[derive(Debug, Clone, Default)]
pub struct BrowserSettings {
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
}

/// One Chromium process; each load gets its own tab.
pub struct ChromiumSource {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumSource {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let mut builder = BrowserConfig::builder().args(LAUNCH_ARGS.iter().copied());
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler: {e}");
                }
            }
        });

        info!(headless = settings.headless, "browser launched");
        Ok(Self { browser, handler })
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.browser.close().await {
            warn!("browser close failed: {e}");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
        Ok(())
    }
}

#[async_trait]
impl PageSource for ChromiumSource {
    async fn load(&self, url: &Url, profile: &LoadProfile) -> Result<PageSnapshot> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;
        visit(&page, url, profile).await
    }
}

// ── Tab operations ──

/// The handful of operations a load performs on one open tab.
#[async_trait]
pub(crate) trait Tab: Send + Sync {
    /// Apply the desktop fingerprint before any navigation.
    async fn prepare(&self) -> Result<()>;
    async fn open(&self, url: &Url, timeout: Duration) -> Result<()>;
    async fn link_count(&self, needle: &str) -> Result<u64>;
    async fn scroll_to_bottom(&self) -> Result<()>;
    async fn snapshot(&self, requested: &Url) -> Result<PageSnapshot>;
    async fn close(&self) -> Result<()>;
}

/// Prepare, load and capture, closing the tab on every exit path.
pub(crate) async fn visit<T: Tab + ?Sized>(
    tab: &T,
    url: &Url,
    profile: &LoadProfile,
) -> Result<PageSnapshot> {
    let result = match tab.prepare().await {
        Ok(()) => load_with(tab, url, profile).await,
        Err(e) => Err(e.context("failed to prepare tab")),
    };
    if let Err(e) = tab.close().await {
        debug!(url = %url, "page close failed: {e}");
    }
    result
}

/// Navigate with staged settles, one retry, and a scroll when the list is empty.
async fn load_with<T: Tab + ?Sized>(tab: &T, url: &Url, profile: &LoadProfile) -> Result<PageSnapshot> {
    match tab.open(url, profile.timeout).await {
        Ok(()) => {
            for wait in profile.settle {
                tokio::time::sleep(*wait).await;
            }
        }
        Err(e) => {
            let Some(retry) = &profile.retry else {
                return Err(e);
            };
            warn!(url = %url, "first load failed, retrying: {e:#}");
            tokio::time::sleep(retry.backoff).await;
            tab.open(url, profile.timeout).await?;
            tokio::time::sleep(retry.settle).await;
        }
    }

    if let Some(needle) = profile.expect_link {
        let links = tab.link_count(needle).await?;
        debug!(url = %url, links, "links after settle");
        if links == 0 {
            warn!(url = %url, "no matching links yet, scrolling to load more");
            tab.scroll_to_bottom().await?;
            tokio::time::sleep(profile.scroll_wait).await;
            let after = tab.link_count(needle).await?;
            debug!(links = after, "links after scroll");
        }
    }

    tab.snapshot(url).await
}

#[async_trait]
impl Tab for Page {
    async fn prepare(&self) -> Result<()> {
        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(USER_AGENT)
            .accept_language(ACCEPT_LANGUAGE)
            .build()
            .map_err(|e| anyhow!("invalid user agent override: {e}"))?;
        self.execute(user_agent).await?;

        let headers = Headers::new(serde_json::json!({
            "Accept-Language": ACCEPT_LANGUAGE,
            "Accept": ACCEPT,
        }));
        self.execute(SetExtraHttpHeadersParams::new(headers)).await?;
        self.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await?;
        Ok(())
    }

    async fn open(&self, url: &Url, timeout: Duration) -> Result<()> {
        navigate(self, url, timeout).await
    }

    async fn link_count(&self, needle: &str) -> Result<u64> {
        count_links(self, needle).await
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .context("scroll failed")?;
        Ok(())
    }

    async fn snapshot(&self, requested: &Url) -> Result<PageSnapshot> {
        capture(self, requested).await
    }

    async fn close(&self) -> Result<()> {
        Page::close(self.clone()).await?;
        Ok(())
    }
}

/// Go to `url`, then wait for the network to go quiet, all within `timeout`.
async fn navigate(page: &Page, url: &Url, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    match tokio::time::timeout(timeout, page.goto(url.as_str())).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => bail!("navigation to {url} failed: {e}"),
        Err(_) => bail!("navigation to {url} timed out after {}s", timeout.as_secs()),
    }

    let remaining = timeout.saturating_sub(start.elapsed());
    if tokio::time::timeout(remaining, wait_for_network_idle(page))
        .await
        .is_err()
    {
        bail!("{url} never went network idle within {}s", timeout.as_secs());
    }
    Ok(())
}

/// Poll the resource timeline until it stops growing.
async fn wait_for_network_idle(page: &Page) {
    let mut last = None;
    loop {
        let count = page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .ok()
            .and_then(|r| r.into_value::<u64>().ok());
        if count.is_some() && count == last {
            return;
        }
        last = count;
        tokio::time::sleep(IDLE_WINDOW).await;
    }
}

async fn count_links(page: &Page, needle: &str) -> Result<u64> {
    let script = format!(
        "Array.from(document.querySelectorAll('a')).filter((a) => a.href && a.href.includes({})).length",
        serde_json::to_string(needle)?
    );
    page.evaluate(script)
        .await
        .context("link probe failed")?
        .into_value()
        .map_err(|e| anyhow!("failed to read link count: {e:?}"))
}

fn layout_probe() -> String {
    format!(
        r#"(() => {{
  const rect = (el) => {{ const r = el.getBoundingClientRect(); return {{ top: r.top, left: r.left }}; }};
  return {{
    anchors: Array.from(document.querySelectorAll('a')).map(rect),
    badges: Array.from(document.querySelectorAll('{BADGE_SELECTOR}')).map(rect),
    currentSources: Array.from(document.querySelectorAll('img')).map((img) => img.currentSrc || null),
  }};
}})()"#
    )
}

async fn capture(page: &Page, requested: &Url) -> Result<PageSnapshot> {
    let html: String = page
        .evaluate("document.documentElement.outerHTML")
        .await
        .context("failed to get HTML")?
        .into_value()
        .map_err(|e| anyhow!("failed to convert HTML result: {e:?}"))?;

    let layout: Layout = page
        .evaluate(layout_probe())
        .await
        .context("layout probe failed")?
        .into_value()
        .map_err(|e| anyhow!("failed to convert layout probe: {e:?}"))?;

    let url = page
        .url()
        .await
        .ok()
        .flatten()
        .and_then(|u| Url::parse(&u).ok())
        .unwrap_or_else(|| requested.clone());

    Ok(PageSnapshot::new(url, html).with_layout(layout))
}
