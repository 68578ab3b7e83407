//! HTTP surface: `POST /api/process-speech`.

use actix_cors::Cors;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::{middleware, post, web, App, HttpResponse, HttpServer, ResponseError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::error::FlowSpeakError;
use crate::speech::{self, MaskFiller, SpeechRequest, SpeechSuggestions};

/// Shared, read-only state handed to every worker.
pub struct AppState {
    filler: Arc<dyn MaskFiller>,
    top_k: usize,
}

impl AppState {
    pub fn new(filler: Arc<dyn MaskFiller>, top_k: usize) -> Self {
        Self { filler, top_k }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl ResponseError for FlowSpeakError {
    fn status_code(&self) -> StatusCode {
        match self {
            FlowSpeakError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FlowSpeakError::ModelUnavailable(_) | FlowSpeakError::ModelConfig(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        })
    }
}

/// HTTP POST endpoint `/api/process-speech`
///
/// Returns the best next words for `speech` and, for each of them, the best
/// word after that.
#[post("/api/process-speech")]
async fn process_speech(
    state: web::Data<AppState>,
    request: web::Json<SpeechRequest>,
) -> Result<web::Json<SpeechSuggestions>, FlowSpeakError> {
    let SpeechRequest { speech } = request.into_inner();
    let state = state.into_inner();
    let started = Instant::now();

    // Inference is CPU bound; keep it off the async workers.
    let suggestions =
        web::block(move || speech::suggest(state.filler.as_ref(), &speech, state.top_k))
            .await
            .map_err(|e| FlowSpeakError::Inference(e.to_string()))?
            .inspect_err(|e| tracing::warn!(error = %e, "suggestion request failed"))?;

    tracing::info!(
        words = suggestions.top1_words.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "processed speech"
    );
    Ok(web::Json(suggestions))
}

/// Registers the routes and the JSON extractor settings on an app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default()
        .error_handler(|err, _req| FlowSpeakError::InvalidInput(err.to_string()).into());
    cfg.app_data(json_config).service(process_speech);
}

/// The full application: routes, shared state, any-origin CORS and request
/// logging.
pub fn app(
    state: web::Data<AppState>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .wrap(Cors::permissive())
        .wrap(middleware::Logger::default())
        .app_data(state)
        .configure(configure)
}

/// Binds the listener and serves until the process is interrupted.
pub async fn run(config: &ServerConfig, state: AppState) -> std::io::Result<()> {
    let state = web::Data::new(state);

    tracing::info!(host = %config.host, port = config.port, "listening");
    let mut server = HttpServer::new(move || app(state.clone()));
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server
        .bind((config.host.as_str(), config.port))?
        .run()
        .await
}
