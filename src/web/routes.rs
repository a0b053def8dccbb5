use actix_web::web;
use crate::web::handlers;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::index))
        .route("/chat", web::post().to(handlers::chat))
        .route("/upload_pdf", web::post().to(handlers::upload_pdf))
        .service(
            web::resource("/healthz")
                .route(web::get().to(handlers::healthz))
                .route(web::post().to(handlers::healthz)),
        );
}
