use pmocache::StreamCacheExt;
use pmoserver::{ConfigExt, ServerBuilder};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ========== PHASE 1 : Infrastructure HTTP ==========

    let mut server = ServerBuilder::new_configured().build();

    // Logs SSE et niveau ajustable à chaud
    server.init_logging().await;

    // Routes personnalisées de l'application
    server
        .add_route("/info", || async {
            serde_json::json!({"version": env!("CARGO_PKG_VERSION")})
        })
        .await;

    // API REST de configuration
    info!("📡 Initializing configuration API...");
    server
        .init_config_api()
        .await
        .expect("Failed to initialize configuration API");

    // ========== PHASE 2 : Cache de transcodage ==========

    info!("🎵 Initializing transcoding cache...");
    let cache = server.init_stream_cache_configured().await?;

    info!(
        "✅ Transcoding cache ready in {}",
        cache.cache_dir().display()
    );
    info!(
        "🎶 Serving music library from {}",
        cache.library_root().display()
    );

    // ========== PHASE 3 : Démarrage du serveur ==========

    info!("🌐 Starting HTTP server...");
    server.start().await;

    info!("✅ PMOStream is ready!");
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    Ok(())
}
