use crate::data::{OptimizeRequest, OptimizeResponse};
use crate::solver;
use axum::http::StatusCode;
use axum::{Json, Router, routing::post};

async fn optimize_handler(
    Json(request): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, (StatusCode, String)> {
    if let Err(e) = request.validate() {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, e));
    }
    match solver::optimize(&request) {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

pub async fn run_server() {
    let app = Router::new().route("/api/v1/optimize", post(optimize_handler));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080")
        .await
        .unwrap();

    println!("Server running at http://{}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
