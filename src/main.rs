use actix_files as fs;
use actix_web::{middleware::Logger, web::Data, App, HttpServer};
use dotenv::dotenv;
use log::{error, info};

use gemini_relay::config::RelayConfig;
use gemini_relay::web::routes;
use gemini_relay::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting chat relay ({:?})", config.mode);

    let (host, port, workers) = (config.host.clone(), config.port, config.workers);
    let static_dir = config.static_dir.clone();

    let app_state = match AppState::new(config) {
        Ok(state) => Data::new(state),
        Err(e) => {
            error!("Failed to initialize relay: {}", e);
            std::process::exit(1);
        }
    };

    info!("Listening on {}:{}", host, port);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(app_state.clone())
            .configure(routes::configure)
            .service(fs::Files::new("/static", static_dir.clone()))
    });
    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    server.bind((host.as_str(), port))?.run().await
}
