// Módulos de la aplicación
mod alias;
mod api;
mod app_state;
mod assembler;
mod coerce;
mod config;
mod delivery;
mod doctypes;
mod error;
mod excel;
mod flatten;
mod mapping;
mod storage;
mod word;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::delivery::N8nDelivery;
use crate::mapping::MappingCache;
use crate::storage::SupabaseStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env()?;

    // 3. Cliente de almacenamiento y entrega
    let storage = SupabaseStorage::new(&cfg)?;
    let delivery = match cfg.n8n_webhook_url.as_deref() {
        Some(url) => Some(Arc::new(N8nDelivery::new(url)?)),
        None => {
            warn!("N8N_WEBHOOK_URL no configurado, la entrega saliente queda desactivada");
            None
        }
    };

    // 4. Estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        storage: Arc::new(storage),
        mapping_cache: Arc::new(MappingCache::new()),
        delivery,
    };

    // 5. Router de la API con CORS abierto (consumido por N8N y herramientas internas)
    let app = Router::new()
        .nest("/", api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 6. Iniciar el servidor con apagado ordenado
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr).await?;
    info!("🚀 Constructor de documentos escuchando en http://{}", server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
