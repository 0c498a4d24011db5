use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DeployResult;

pub const ESZIP_CONTENT_TYPE: &str = "application/vnd.denoland.eszip";

/// Raw status and body of a management API call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Function payload returned by the management API. Only the id is read.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
}

/// Query parameters for creating a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateFunctionParams {
    pub slug: String,
    pub name: String,
    pub verify_jwt: bool,
    pub import_map_path: String,
    pub entrypoint_path: String,
}

/// Query parameters for updating a function's body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateFunctionParams {
    pub verify_jwt: bool,
    pub import_map_path: String,
    pub entrypoint_path: String,
}

/// Management API endpoints used for deploys.
///
/// Implementations return `Err` only for transport failures; any HTTP
/// status, including errors, comes back as an [`ApiResponse`].
#[async_trait]
pub trait FunctionsApi: Send + Sync {
    async fn get_function(&self, project_ref: &str, slug: &str) -> DeployResult<ApiResponse>;

    async fn create_function(
        &self,
        project_ref: &str,
        params: &CreateFunctionParams,
        body: Vec<u8>,
    ) -> DeployResult<ApiResponse>;

    async fn update_function(
        &self,
        project_ref: &str,
        slug: &str,
        params: &UpdateFunctionParams,
        body: Vec<u8>,
    ) -> DeployResult<ApiResponse>;
}

/// reqwest-backed management API client.
pub struct HttpFunctionsApi {
    client: reqwest::Client,
    host: String,
    token: String,
}

impl HttpFunctionsApi {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), host, token)
    }

    pub fn with_client(
        client: reqwest::Client,
        host: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    async fn into_api_response(response: reqwest::Response) -> DeployResult<ApiResponse> {
        let status = response.status();
        let body = response.text().await?;
        debug!(%status, bytes = body.len(), "management API response");
        Ok(ApiResponse { status, body })
    }
}

#[async_trait]
impl FunctionsApi for HttpFunctionsApi {
    async fn get_function(&self, project_ref: &str, slug: &str) -> DeployResult<ApiResponse> {
        let url = self.url(&format!("/v1/projects/{}/functions/{}", project_ref, slug));
        debug!(%url, "GET function");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", "supafn-cli")
            .send()
            .await?;
        Self::into_api_response(response).await
    }

    async fn create_function(
        &self,
        project_ref: &str,
        params: &CreateFunctionParams,
        body: Vec<u8>,
    ) -> DeployResult<ApiResponse> {
        let url = self.url(&format!("/v1/projects/{}/functions", project_ref));
        debug!(%url, slug = %params.slug, "POST function");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", "supafn-cli")
            .header("Content-Type", ESZIP_CONTENT_TYPE)
            .query(params)
            .body(body)
            .send()
            .await?;
        Self::into_api_response(response).await
    }

    async fn update_function(
        &self,
        project_ref: &str,
        slug: &str,
        params: &UpdateFunctionParams,
        body: Vec<u8>,
    ) -> DeployResult<ApiResponse> {
        let url = self.url(&format!("/v1/projects/{}/functions/{}", project_ref, slug));
        debug!(%url, "PATCH function");
        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", "supafn-cli")
            .header("Content-Type", ESZIP_CONTENT_TYPE)
            .query(params)
            .body(body)
            .send()
            .await?;
        Self::into_api_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_function_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/abcdefghij/functions/hello"))
            .and(header("Authorization", "Bearer sbp_token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":"1"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpFunctionsApi::new(server.uri(), "sbp_token");
        let resp = api.get_function("abcdefghij", "hello").await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body, r#"{"id":"1"}"#);
    }

    #[tokio::test]
    async fn create_function_carries_params_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/abcdefghij/functions"))
            .and(query_param("slug", "hello"))
            .and(query_param("name", "hello"))
            .and(query_param("verify_jwt", "false"))
            .and(query_param("import_map_path", "file:///p/import_map.json"))
            .and(query_param("entrypoint_path", "file:///p/hello/index.ts"))
            .and(header("Content-Type", ESZIP_CONTENT_TYPE))
            .and(body_bytes(b"eszip".to_vec()))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"id":"1"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpFunctionsApi::new(format!("{}/", server.uri()), "sbp_token");
        let params = CreateFunctionParams {
            slug: "hello".into(),
            name: "hello".into(),
            verify_jwt: false,
            import_map_path: "file:///p/import_map.json".into(),
            entrypoint_path: "file:///p/hello/index.ts".into(),
        };
        let resp = api
            .create_function("abcdefghij", &params, b"eszip".to_vec())
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn error_statuses_are_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/projects/abcdefghij/functions/hello"))
            .and(query_param("verify_jwt", "true"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let api = HttpFunctionsApi::new(server.uri(), "sbp_token");
        let params = UpdateFunctionParams {
            verify_jwt: true,
            import_map_path: "file:///p/import_map.json".into(),
            entrypoint_path: "file:///p/hello/index.ts".into(),
        };
        let resp = api
            .update_function("abcdefghij", "hello", &params, Vec::new())
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.body, "unavailable");
    }

    #[tokio::test]
    async fn connection_failure_is_transport_error() {
        // Nothing listens on the discard port.
        let api = HttpFunctionsApi::new("http://127.0.0.1:9", "sbp_token");
        let err = api.get_function("abcdefghij", "hello").await.unwrap_err();
        assert!(err.is_transport());
    }
}
