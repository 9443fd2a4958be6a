use crate::cdp::{CdpClient, LaunchOptions};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite, TimeSinceEpoch};
use reprise_engine::backend::{NavigationResult, PageError, PageHandle};
use reprise_engine::protocol::{Cookie, DetectionSignal};
use tracing::{debug, info};

/// Looks for challenge widgets and block pages. Returns `{kind, detail}` or null.
const DETECTION_CHECK_JS: &str = r#"(() => {
  const frames = Array.from(document.querySelectorAll('iframe')).map(f => f.src || '');
  const challenge = frames.find(src => /recaptcha|hcaptcha|challenges\.cloudflare\.com/.test(src));
  if (challenge) { return { kind: 'captcha', detail: challenge }; }
  if (document.querySelector('.g-recaptcha, .h-captcha, .cf-turnstile')) {
    return { kind: 'captcha', detail: 'challenge widget on page' };
  }
  const title = document.title || '';
  if (/access denied|attention required|request blocked/i.test(title)) {
    return { kind: 'blocked', detail: title };
  }
  return null;
})()"#;

/// A Chromium tab driven over the DevTools protocol.
pub struct CdpPage {
    client: Option<CdpClient>,
    options: LaunchOptions,
}

impl CdpPage {
    pub fn new(options: LaunchOptions) -> Self {
        Self {
            client: None,
            options,
        }
    }

    /// Construct and launch in one step.
    pub async fn launch(options: LaunchOptions) -> Result<Self, PageError> {
        let mut page = Self::new(options);
        page.start().await?;
        Ok(page)
    }

    pub async fn start(&mut self) -> Result<(), PageError> {
        info!("Launching Chromium page...");
        let client = CdpClient::launch(&self.options)
            .await
            .map_err(|e| PageError::Other(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    pub fn client(&self) -> Option<&CdpClient> {
        self.client.as_ref()
    }

    fn ready(&self) -> Result<&CdpClient, PageError> {
        self.client.as_ref().ok_or(PageError::NotReady)
    }

    async fn navigation_result(
        page: &chromiumoxide::Page,
    ) -> Result<NavigationResult, PageError> {
        let title = page
            .get_title()
            .await
            .unwrap_or_default()
            .unwrap_or_default();
        let url = page
            .url()
            .await
            .map_err(|e| PageError::Navigation(e.to_string()))?
            .unwrap_or_default();
        Ok(NavigationResult { url, title })
    }
}

fn same_site_name(value: &CookieSameSite) -> &'static str {
    match value {
        CookieSameSite::Strict => "Strict",
        CookieSameSite::Lax => "Lax",
        CookieSameSite::None => "None",
    }
}

fn same_site_from(name: &str) -> Option<CookieSameSite> {
    match name.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" => Some(CookieSameSite::None),
        _ => None,
    }
}

fn cookie_param(cookie: &Cookie) -> CookieParam {
    let mut param = CookieParam::new(cookie.name.clone(), cookie.value.clone());
    param.domain = Some(cookie.domain.clone());
    param.path = Some(cookie.path.clone());
    param.secure = Some(cookie.secure);
    param.http_only = Some(cookie.http_only);
    param.same_site = cookie.same_site.as_deref().and_then(same_site_from);
    // Session cookies report a negative expiry.
    param.expires = cookie
        .expires
        .filter(|e| *e > 0.0)
        .map(TimeSinceEpoch::new);
    param
}

#[async_trait]
impl PageHandle for CdpPage {
    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, PageError> {
        let client = self.ready()?;

        info!("Navigating to: {}", url);
        client
            .page
            .goto(url)
            .await
            .map_err(|e| PageError::Navigation(e.to_string()))?;

        Self::navigation_result(&client.page).await
    }

    async fn click(&mut self, selector: &str) -> Result<(), PageError> {
        let client = self.ready()?;
        let element = client
            .page
            .find_element(selector)
            .await
            .map_err(|_| PageError::ElementNotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| PageError::Other(format!("click {} failed: {}", selector, e)))?;
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), PageError> {
        let client = self.ready()?;
        let element = client
            .page
            .find_element(selector)
            .await
            .map_err(|_| PageError::ElementNotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| PageError::Other(format!("focus {} failed: {}", selector, e)))?;
        element
            .type_str(text)
            .await
            .map_err(|e| PageError::Other(format!("typing into {} failed: {}", selector, e)))?;
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, PageError> {
        let client = self.ready()?;
        client
            .evaluate(script)
            .await
            .map_err(|e| PageError::Script(e.to_string()))
    }

    async fn get_cookies(&mut self) -> Result<Vec<Cookie>, PageError> {
        let client = self.ready()?;
        let cookies = client
            .page
            .get_cookies()
            .await
            .map_err(|e| PageError::Other(format!("Get cookies failed: {}", e)))?;

        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: (c.expires > 0.0).then_some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.as_ref().map(|s| same_site_name(s).to_string()),
            })
            .collect())
    }

    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), PageError> {
        let client = self.ready()?;
        let params: Vec<CookieParam> = cookies.iter().map(cookie_param).collect();
        client
            .page
            .set_cookies(params)
            .await
            .map_err(|e| PageError::Other(format!("Set cookies failed: {}", e)))?;
        debug!("Set {} cookies", cookies.len());
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, PageError> {
        let client = self.ready()?;
        client
            .page
            .screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
            .await
            .map_err(|e| PageError::Other(format!("Screenshot failed: {}", e)))
    }

    async fn current_url(&mut self) -> Result<String, PageError> {
        let client = self.ready()?;
        Ok(client
            .page
            .url()
            .await
            .map_err(|e| PageError::Other(e.to_string()))?
            .unwrap_or_default())
    }

    async fn title(&mut self) -> Result<String, PageError> {
        let client = self.ready()?;
        Ok(client
            .page
            .get_title()
            .await
            .map_err(|e| PageError::Other(e.to_string()))?
            .unwrap_or_default())
    }

    async fn poll_detection(&mut self) -> Result<Option<DetectionSignal>, PageError> {
        let value = self.evaluate(DETECTION_CHECK_JS).await?;
        if value.is_null() {
            return Ok(None);
        }
        let signal: DetectionSignal = serde_json::from_value(value)?;
        info!("Detection check fired: {}", signal);
        Ok(Some(signal))
    }

    async fn close(&mut self) -> Result<(), PageError> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| PageError::Other(e.to_string()))?;
        }
        Ok(())
    }
}
