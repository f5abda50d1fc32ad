mod audio_file;
mod config;
mod error;
mod models;
mod routes;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use config::AppConfig;
use models::Capabilities;
use routes::configure_routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let config = AppConfig::from_env();
    let device = models::probe_device();

    // All models load once here and are shared read-only across requests.
    let capabilities = Capabilities::load(&config, device).map_err(|e| {
        log::error!("Failed to load models at startup: {}", e);
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("model loading failed: {}", e),
        )
    })?;

    let bind_address = config.bind_address.clone();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(capabilities.clone()))
            .app_data(web::Data::new(config.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
