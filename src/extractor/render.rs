//! Headless rendering for pages that only show their article after
//! JavaScript runs or a consent dialog is dismissed.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Button labels clicked, in order, to get past consent dialogs.
pub const CONSENT_BUTTON_LABELS: &[&str] = &[
    "reject all",
    "reject",
    "rechazar todo",
    "aceptar todo",
    "accept all",
    "manage privacy settings",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("browser unavailable: {0}")]
    Unavailable(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("render timed out")]
    Timeout,
}

/// Loads a URL in a browser and returns the rendered DOM.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url) -> Result<String, RenderError>;
}

/// Script run after load; clicks the first visible button whose label matches.
pub fn consent_click_script() -> String {
    let labels = CONSENT_BUTTON_LABELS
        .iter()
        .map(|l| format!("\"{l}\""))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        r#"(() => {{
  const labels = [{labels}];
  const nodes = Array.from(document.querySelectorAll('button, [role="button"], a'));
  for (const label of labels) {{
    const hit = nodes.find(n => {{
      const text = (n.innerText || n.getAttribute('aria-label') || '').trim().toLowerCase();
      return text === label && n.offsetParent !== null;
    }});
    if (hit) {{ hit.click(); return label; }}
  }}
  return null;
}})()"#
    )
}

#[cfg(feature = "chromium")]
pub use chromium::ChromiumRenderer;

#[cfg(feature = "chromium")]
mod chromium {
    use super::{PageRenderer, RenderError, consent_click_script};
    use async_trait::async_trait;
    use chromiumoxide::{Browser, BrowserConfig};
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::sync::OnceCell;
    use tracing::{debug, warn};
    use url::Url;

    use crate::fetcher::random_user_agent;

    const SETTLE_AFTER_CLICK: Duration = Duration::from_millis(500);
    const SETTLE_BEFORE_CAPTURE: Duration = Duration::from_millis(800);

    /// Chromium-backed renderer. The browser is launched on first use and
    /// shared by every render.
    pub struct ChromiumRenderer {
        browser: OnceCell<Browser>,
        navigation_timeout: Duration,
    }

    impl ChromiumRenderer {
        pub fn new(navigation_timeout: Duration) -> Self {
            Self {
                browser: OnceCell::new(),
                navigation_timeout,
            }
        }

        async fn browser(&self) -> Result<&Browser, RenderError> {
            self.browser
                .get_or_try_init(|| async {
                    let config = BrowserConfig::builder()
                        .no_sandbox()
                        .arg("--disable-gpu")
                        .build()
                        .map_err(RenderError::Unavailable)?;
                    let (browser, mut handler) = Browser::launch(config)
                        .await
                        .map_err(|e| RenderError::Unavailable(e.to_string()))?;
                    tokio::spawn(async move {
                        while let Some(event) = handler.next().await {
                            if event.is_err() {
                                break;
                            }
                        }
                    });
                    Ok(browser)
                })
                .await
        }
    }

    #[async_trait]
    impl PageRenderer for ChromiumRenderer {
        async fn render(&self, url: &Url) -> Result<String, RenderError> {
            let browser = self.browser().await?;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| RenderError::Unavailable(e.to_string()))?;

            let result = async {
                if let Err(e) = page.set_user_agent(random_user_agent()).await {
                    debug!(error = %e, "could not set user agent");
                }
                tokio::time::timeout(self.navigation_timeout, page.goto(url.as_str()))
                    .await
                    .map_err(|_| RenderError::Timeout)?
                    .map_err(|e| RenderError::Navigation(e.to_string()))?;

                // Consent dismissal is best effort
                match page.evaluate(consent_click_script()).await {
                    Ok(clicked) => {
                        if let Ok(Some(label)) = clicked.into_value::<Option<String>>() {
                            debug!(label, "dismissed consent dialog");
                            tokio::time::sleep(SETTLE_AFTER_CLICK).await;
                        }
                    }
                    Err(e) => debug!(error = %e, "consent click script failed"),
                }

                tokio::time::sleep(SETTLE_BEFORE_CAPTURE).await;
                page.content()
                    .await
                    .map_err(|e| RenderError::Navigation(e.to_string()))
            }
            .await;

            if let Err(e) = page.close().await {
                warn!(url = %url, error = %e, "failed to close page");
            }
            result
        }
    }
}
