use std::sync::Arc;

use actix_web::{web, App, HttpServer};

use crate::jobs::JobManager;

pub mod handlers;

pub struct AppState {
    pub manager: Arc<JobManager>,
}

impl AppState {
    pub fn new(manager: Arc<JobManager>) -> web::Data<Self> {
        web::Data::new(Self { manager })
    }
}

/// Register every route on an actix `App`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(handlers::index))
            .route(web::post().to(handlers::submit)),
    )
    .service(web::resource("/health").route(web::get().to(handlers::health)))
    .service(web::resource("/download/{filename}").route(web::get().to(handlers::download)))
    .service(web::resource("/delete/{filename:.*}").route(web::post().to(handlers::delete)));
}

/// Serve until the process is stopped.
pub async fn run(listen_addr: &str, manager: Arc<JobManager>) -> std::io::Result<()> {
    let state = AppState::new(manager);

    tracing::info!("Listening on http://{}", listen_addr);
    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind(listen_addr)?
    .run()
    .await
}
