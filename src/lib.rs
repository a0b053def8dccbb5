pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod web;

use std::sync::Arc;

use tera::Tera;

use config::RelayConfig;
use model::Backend;

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

// App state structure
pub struct AppState {
    pub tera: Tera,
    pub backend: Backend,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> anyhow::Result<Self> {
        let backend = Backend::from_config(&config)?;
        Ok(Self::with_backend(config, backend)?)
    }

    /// State around an already built backend.
    pub fn with_backend(config: RelayConfig, backend: Backend) -> tera::Result<Self> {
        Ok(Self {
            tera: templates()?,
            backend,
            config: Arc::new(config),
        })
    }
}

/// The UI templates, compiled into the binary.
pub fn templates() -> tera::Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_template("index.html", INDEX_TEMPLATE)?;
    tera.autoescape_on(vec![".html"]);
    Ok(tera)
}
