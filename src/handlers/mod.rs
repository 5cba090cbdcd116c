// Audio API HTTP handlers
//
// This module contains the HTTP handlers for the audio API and the function
// registering them on an actix-web application.

pub mod form;
pub mod routes;
pub mod speech;

#[cfg(test)]
mod tests;

use actix_web::http::Method;
use actix_web::{middleware, web};

// Re-export handlers for easier access
pub use self::routes::{
    api_status, metrics_handler, preflight, speech_get, speech_post, transcribe, use_post,
    ServiceInfo, SPEECH_PATH, TRANSCRIPTIONS_PATH,
};

/// Register every route of the API
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource(TRANSCRIPTIONS_PATH)
            .route(web::post().to(transcribe))
            .route(web::method(Method::OPTIONS).to(preflight))
            .default_service(web::to(use_post)),
    )
    .service(
        web::resource(SPEECH_PATH)
            .route(web::post().to(speech_post))
            .route(web::get().to(speech_get))
            .route(web::method(Method::OPTIONS).to(preflight)),
    )
    .service(api_status)
    .service(web::resource("/metrics").route(web::get().to(metrics_handler)));
}

/// Headers added to every response (permissive CORS)
pub fn default_headers() -> middleware::DefaultHeaders {
    middleware::DefaultHeaders::new().add(("Access-Control-Allow-Origin", "*"))
}
