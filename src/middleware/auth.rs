//! 部署接口认证
//!
//! 触发和取消部署需要携带 API key（`x-api-key` 或 `Authorization: Bearer`）。
//! 未配置 INFRAFLOW_API_KEY 时全部放行，便于本地开发。

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{
        header::{HeaderMap, AUTHORIZATION},
        request::Parts,
    },
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

/// 写操作认证 extractor，放在 handler 参数首位
#[derive(Debug, Clone)]
pub struct RequireApiKey;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        verify_api_key(&parts.headers, state.config.api_key.as_deref())
    }
}

/// 从请求头取出调用方提供的 key，`x-api-key` 优先
fn provided_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key);
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// 校验 API key；`expected_key` 为 None 表示未启用认证
pub fn verify_api_key(
    headers: &HeaderMap,
    expected_key: Option<&str>,
) -> Result<RequireApiKey, ApiError> {
    let Some(expected_key) = expected_key else {
        return Ok(RequireApiKey);
    };

    match provided_key(headers) {
        Some(key) if key == expected_key => Ok(RequireApiKey),
        Some(_) => {
            tracing::warn!("Rejected request with wrong API key");
            Err(ApiError::unauthorized())
        }
        None => {
            tracing::warn!("Rejected request without API key");
            Err(ApiError::unauthorized())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_header_key_accepted() {
        let h = headers("x-api-key", "secret");
        assert!(verify_api_key(&h, Some("secret")).is_ok());
    }

    #[test]
    fn test_bearer_key_accepted() {
        let h = headers("authorization", "Bearer secret");
        assert!(verify_api_key(&h, Some("secret")).is_ok());
    }

    #[test]
    fn test_wrong_or_missing_key_rejected() {
        let h = headers("x-api-key", "nope");
        assert!(matches!(
            verify_api_key(&h, Some("secret")),
            Err(ApiError::Unauthorized)
        ));
        assert!(verify_api_key(&HeaderMap::new(), Some("secret")).is_err());

        // 非 Bearer 方案不算提供了 key
        let h = headers("authorization", "Basic c2VjcmV0");
        assert!(verify_api_key(&h, Some("secret")).is_err());
    }

    #[test]
    fn test_auth_disabled_allows_all() {
        assert!(verify_api_key(&HeaderMap::new(), None).is_ok());
    }
}
