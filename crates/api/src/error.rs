use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scheduler_core::SchedulerError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Scheduler(SchedulerError::MissingTaskId) => {
                (StatusCode::BAD_REQUEST, "MISSING_TASK_ID")
            }
            ApiError::Scheduler(SchedulerError::NoFactoryRegistered { .. }) => {
                (StatusCode::NOT_FOUND, "NO_FACTORY_REGISTERED")
            }
            ApiError::Scheduler(e) if e.is_configuration_error() => {
                (StatusCode::UNPROCESSABLE_ENTITY, "CONFIGURATION_ERROR")
            }
            ApiError::Scheduler(SchedulerError::NoMasterNode) => {
                (StatusCode::SERVICE_UNAVAILABLE, "NO_MASTER_NODE")
            }
            ApiError::Scheduler(SchedulerError::EngineStopped) => {
                (StatusCode::SERVICE_UNAVAILABLE, "ENGINE_STOPPED")
            }
            ApiError::Scheduler(e) if e.is_transport_error() => {
                (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR")
            }
            ApiError::Scheduler(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_client_errors() {
        let error = ApiError::from(SchedulerError::NoFactoryRegistered {
            job: "report".to_string(),
        });
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);

        let error = ApiError::from(SchedulerError::InvalidCron {
            expr: "bad".to_string(),
            message: "parse".to_string(),
        });
        assert_eq!(
            error.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_transport_errors_map_to_gateway_statuses() {
        let error = ApiError::from(SchedulerError::NoMasterNode);
        assert_eq!(
            error.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let error = ApiError::from(SchedulerError::Delivery("closed".to_string()));
        assert_eq!(error.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_internal_error() {
        let error = ApiError::from(SchedulerError::Internal("boom".to_string()));
        let display = error.to_string();
        assert!(display.contains("boom"));
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
