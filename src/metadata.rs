//! Best-effort product metadata from a shop page.
//!
//! Callers treat `warning` as informational and `success == false` as a
//! recoverable failure shown to the user.

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    pub title: String,
    pub image: String,
    pub price: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Metadata {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Never fails: transport problems come back as `success == false`.
    async fn fetch(&self, url: &str) -> Metadata;
}

const USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) \
AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";

pub struct HttpMetadataSource {
    client: reqwest::Client,
}

impl HttpMetadataSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<(String, String)> {
        let response = self
            .client
            .get(url)
            .header("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8")
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Http(format!("upstream returned {}", response.status())));
        }
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok((final_url, body))
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self, url: &str) -> Metadata {
        match self.get(url).await {
            Ok((final_url, html)) => {
                debug!("Fetched {} ({} bytes)", final_url, html.len());
                extract(&html, &final_url)
            }
            Err(e) => {
                warn!("Metadata fetch for {} failed: {}", url, e);
                Metadata::failed(e.to_string())
            }
        }
    }
}

fn meta_content(html: &str, prop: &str) -> Option<String> {
    let prop = regex::escape(prop);
    let patterns = [
        format!(r#"(?i)<meta[^>]+(?:property|name)=["']{prop}["'][^>]+content=["']([^"']+)["']"#),
        format!(r#"(?i)<meta[^>]+content=["']([^"']+)["'][^>]+(?:property|name)=["']{prop}["']"#),
    ];
    patterns.iter().find_map(|p| {
        Regex::new(p)
            .ok()?
            .captures(html)
            .map(|c| c[1].trim().to_string())
    })
}

fn first_capture(html: &str, pattern: &str) -> Option<String> {
    Regex::new(pattern)
        .ok()?
        .captures(html)
        .map(|c| c[1].trim().to_string())
}

fn is_login_wall(html: &str) -> bool {
    ["login.taobao.com", "login.m.taobao.com", "验证码", "滑块验证"]
        .iter()
        .any(|marker| html.contains(marker))
}

/// Pulls title, image and price out of a page.
pub fn extract(html: &str, final_url: &str) -> Metadata {
    if is_login_wall(html) {
        let id = reqwest::Url::parse(final_url)
            .ok()
            .and_then(|u| u.query_pairs().find(|(k, _)| k == "id").map(|(_, v)| v.into_owned()))
            .unwrap_or_default();
        return Metadata {
            title: format!("淘宝商品 (需手动填写) {}", id).trim().to_string(),
            success: true,
            warning: Some("由于淘宝安全限制，自动抓取受到限制，请手动补充信息".to_string()),
            ..Metadata::default()
        };
    }

    let title = meta_content(html, "og:title")
        .or_else(|| first_capture(html, r"(?i)<title>([^<]+)</title>"))
        .unwrap_or_default();
    let title = Regex::new(r"-淘宝网|-tmall\.com天猫| - 详情")
        .map(|re| re.replace_all(&title, "").trim().to_string())
        .unwrap_or(title);

    let image = meta_content(html, "og:image")
        .or_else(|| meta_content(html, "twitter:image"))
        .or_else(|| {
            first_capture(
                html,
                r#"(?i)<img[^>]+src=["'](https?://[^"']+\.(?:jpg|jpeg|png|webp))["']"#,
            )
        })
        .unwrap_or_default();

    let price = first_capture(html, r"(?i)(?:price|售价|价格|¥|￥)\s*[:：]?\s*(\d+(?:\.\d{2})?)")
        .unwrap_or_default();

    Metadata {
        title,
        image,
        price,
        success: true,
        warning: None,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_open_graph_tags() {
        let html = r#"<html><head>
            <meta property="og:title" content="Linen Shirt-淘宝网">
            <meta content="https://img.example.com/a.jpg" property="og:image">
            </head><body>价格：129.00</body></html>"#;

        let m = extract(html, "https://item.example.com/1");

        assert!(m.success);
        assert_eq!(m.title, "Linen Shirt");
        assert_eq!(m.image, "https://img.example.com/a.jpg");
        assert_eq!(m.price, "129.00");
        assert_eq!(m.warning, None);
    }

    #[test]
    fn falls_back_to_title_and_img() {
        let html = r#"<title> Wool Coat </title><img class="x" src="https://cdn.example.com/c.png">"#;

        let m = extract(html, "https://example.com");

        assert_eq!(m.title, "Wool Coat");
        assert_eq!(m.image, "https://cdn.example.com/c.png");
        assert_eq!(m.price, "");
    }

    #[test]
    fn login_wall_is_a_warning() {
        let html = r#"<script>location="https://login.taobao.com/x"</script>"#;

        let m = extract(html, "https://item.taobao.com/item.htm?id=42");

        assert!(m.success);
        assert!(m.warning.is_some());
        assert!(m.title.ends_with("42"));
    }
}
