use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// 请求层统一响应信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success(data)
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    /// 由错误类型构造响应和状态码
    pub fn from_error(err: &OrchestratorError) -> (u16, Self) {
        (err.status_code(), Self::error(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let resp = ApiResponse::success_with_message(42, "ok");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 42);
        assert_eq!(json["message"], "ok");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_envelope() {
        let (code, resp) = ApiResponse::from_error(&OrchestratorError::TaskNotFound {
            id: "t1".to_string(),
        });
        assert_eq!(code, 404);
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("任务未找到: t1"));
    }
}
