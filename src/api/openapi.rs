//! OpenAPI document for the gateway API, generated at compile time with utoipa.

use utoipa::OpenApi;

/// OpenAPI documentation for the job gateway
///
/// Served at `/api/openapi.json` and rendered by Swagger UI at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "job-gateway API",
        version = "0.1.0",
        description = "Submit long-running jobs to a queue-backed worker and poll for their artifacts",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8090", description = "Local development server")
    ),
    paths(
        crate::api::routes::send_message,
        crate::api::routes::get_image,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        crate::api::routes::SendMessageResponse,
        crate::api::routes::HealthResponse,
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "jobs", description = "Job submission and result polling"),
        (name = "system", description = "Health check and OpenAPI document"),
    ),
    modifiers(&TokenAddon)
)]
pub struct ApiDoc;

/// Documents the `Authorization` header that `send_message` forwards to the worker
struct TokenAddon;

impl utoipa::Modify for TokenAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "job_token",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("Authorization"),
                    ),
                ),
            );
        }
    }
}
