use crate::app::ports::{HttpClientPort, HttpGetResult};
use async_trait::async_trait;

pub struct ReqwestHttp;

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str) -> Result<HttpGetResult, String> {
        let client = reqwest::Client::new();
        tracing::debug!("HTTP GET request to: {}", url);
        let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| e.to_string())?;
        tracing::debug!("HTTP response: status={}, size={} bytes", status, body.len());
        Ok(HttpGetResult { status, body })
    }
}
