use actix_web::{get, post, web, HttpRequest, HttpResponse};
use subtle::ConstantTimeEq;
use x402_a2a::extension::{extensions_header_value, parse_extensions_header};
use x402_a2a::{TaskRequest, EXTENSIONS_HEADER};

use crate::metrics::{PAYMENTS, REQUESTS, TASKS};
use crate::state::AppState;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Run one task turn. Extensions requested in the `X-A2A-Extensions` header
/// are merged into the body's list; activated ones are echoed back.
#[post("/tasks")]
pub async fn tasks(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TaskRequest>,
) -> HttpResponse {
    let mut request = body.into_inner();
    if let Some(header) = req
        .headers()
        .get(EXTENSIONS_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        for uri in parse_extensions_header(header) {
            if !request.extensions.contains(&uri) {
                request.extensions.push(uri);
            }
        }
    }

    let response = state.negotiator.handle(request).await;

    TASKS.with_label_values(&[response.state.as_str()]).inc();
    if let Some(status) = response.payment_status {
        PAYMENTS.with_label_values(&[status.as_str()]).inc();
    }
    REQUESTS.with_label_values(&["/tasks", "200"]).inc();

    let mut builder = HttpResponse::Ok();
    if !response.activated_extensions.is_empty() {
        builder.insert_header((
            EXTENSIONS_HEADER,
            extensions_header_value(&response.activated_extensions),
        ));
    }
    builder.json(response)
}

#[get("/.well-known/agent.json")]
pub async fn agent_card(state: web::Data<AppState>) -> HttpResponse {
    REQUESTS
        .with_label_values(&["/.well-known/agent.json", "200"])
        .inc();
    HttpResponse::Ok().json(&state.card)
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "x402-merchant",
        "activeTasks": state.negotiator.store().active_count(),
    }))
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match &state.metrics_token {
        Some(expected) => {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|token| constant_time_eq(token.as_bytes(), expected.as_bytes()))
                .unwrap_or(false);

            if !authorized {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None => {
            if !state.public_metrics {
                return HttpResponse::Forbidden().json(serde_json::json!({
                    "error": "forbidden",
                    "message": "Set METRICS_TOKEN or X402_PUBLIC_METRICS=true to access /metrics"
                }));
            }
        }
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(crate::metrics::metrics_output())
}
