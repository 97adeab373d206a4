//! JSON body and query-string extractors
//!
//! Wrap axum's `Json` and `Query` so a malformed body, a missing content
//! type or an unparsable query string comes back as the usual error
//! envelope (400 `INVALID_REQUEST`) instead of axum's plain-text rejection.

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Query, Request,
    },
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

/// JSON request body
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

/// Query-string parameters
#[derive(Debug, Clone)]
pub struct ApiQuery<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(status = %rejection.status(), "Rejected request body: {}", rejection.body_text());
        ApiError::bad_request(INVALID_REQUEST, rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::debug!("Rejected query string: {}", rejection.body_text());
        ApiError::bad_request(INVALID_REQUEST, rejection.body_text())
    }
}

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{self, StatusCode};
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use serde::Deserialize;
    use serde_json::Value;

    #[derive(Debug, Deserialize)]
    struct Page {
        page: i64,
    }

    async fn envelope(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_content_type_is_enveloped() {
        let req = http::Request::builder().method("POST").uri("/").body(Body::from("{}")).unwrap();
        let err = ApiJson::<Value>::from_request(req, &()).await.unwrap_err();

        let (status, body) = envelope(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["resp"], "ERROR");
        assert_eq!(body["resp_message"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_json_is_enveloped() {
        let req = http::Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from("{\"name\":"))
            .unwrap();
        let err = ApiJson::<Value>::from_request(req, &()).await.unwrap_err();
        let (status, body) = envelope(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["resp_message"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_query_parse() {
        let req = http::Request::builder().uri("/?page=2").body(Body::empty()).unwrap();
        let (mut parts, _) = req.into_parts();
        let ApiQuery(page) = ApiQuery::<Page>::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(page.page, 2);

        let req = http::Request::builder().uri("/?page=two").body(Body::empty()).unwrap();
        let (mut parts, _) = req.into_parts();
        let err = ApiQuery::<Page>::from_request_parts(&mut parts, &()).await.unwrap_err();
        let (status, _) = envelope(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
