//! Extension du serveur pour l'API de configuration
//!
//! Le trait [`ConfigExt`] monte l'API REST de pmoconfig sur le serveur,
//! avec sa documentation Swagger.

use crate::Server;
use anyhow::Result;
use pmoconfig::{ApiDoc, api, get_config};
use utoipa::OpenApi;

/// Ajoute l'API de configuration au serveur
pub trait ConfigExt {
    /// Enregistre les routes HTTP de consultation et de modification
    ///
    /// # Routes enregistrées
    ///
    /// - `GET /api/config` - Récupérer toute la configuration
    /// - `GET /api/config/{path}` - Récupérer une valeur spécifique (ex: host.http_port)
    /// - `POST /api/config` - Mettre à jour une valeur
    /// - `GET /swagger-ui/config` - Documentation interactive Swagger
    ///
    /// # Exemple
    ///
    /// ```rust,ignore
    /// use pmoserver::{ConfigExt, ServerBuilder};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let mut server = ServerBuilder::new_configured().build();
    ///     server.init_config_api().await?;
    ///     server.start().await;
    ///     Ok(())
    /// }
    /// ```
    async fn init_config_api(&mut self) -> Result<()>;
}

impl ConfigExt for Server {
    async fn init_config_api(&mut self) -> Result<()> {
        let config = get_config();

        let api_router = api::create_router(config);
        self.add_openapi(api_router, ApiDoc::openapi(), "config")
            .await;

        Ok(())
    }
}
