//! Extension pmoserver pour servir les produits transcodés via HTTP
//!
//! Ce module monte la surface de streaming et les API de gestion sur un
//! serveur pmoserver :
//!
//! - `GET /stream/{*path}` - produit transcodé, complet ou progressif
//! - `HEAD /stream/{*path}` - taille annoncée sans lancer de transcodage
//! - `/api/cache/...` - gestion du cache (liste, stats, maintenance, purges)
//! - `/api/library/...` - parcours de la bibliothèque musicale
//!
//! ## Streaming progressif
//!
//! Un produit en cours d'encodage est servi au fur et à mesure : la
//! réponse suit la ligne de flottaison du fichier cache et ne se termine
//! qu'avec le produit. Les requêtes `Range` lisent en position, en
//! bloquant jusqu'à la disponibilité des octets demandés.
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmocache::{CacheParams, StreamCacheExt};
//! use pmoserver::Server;
//!
//! # async fn example(server: &mut Server) -> anyhow::Result<()> {
//! let cache = server.init_stream_cache(CacheParams::default()).await?;
//! # Ok(())
//! # }
//! ```

use crate::api::{self, resolve_library_path, ErrorResponse};
use crate::buffer::CloseFlags;
use crate::cache::{Cache, CacheParams};
use crate::openapi::{CacheApiDoc, LibraryApiDoc};
use crate::transcode::Transcoder;
use anyhow::Result;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use pmoaudio::TargetFormat;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use utoipa::OpenApi;

#[cfg(feature = "pmoconfig")]
use crate::config_ext::TranscodeConfigExt;

/// Taille des blocs envoyés au client
const STREAM_CHUNK: usize = 64 * 1024;

fn not_found(path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "NOT_FOUND".to_string(),
            message: format!("No such file: {}", path),
        }),
    )
        .into_response()
}

fn not_audio(path: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "INVALID_REQUEST".to_string(),
            message: format!("Not an audio file: {}", path),
        }),
    )
        .into_response()
}

fn transcode_error(path: &str, err: anyhow::Error) -> Response {
    if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
        if io_err.kind() == std::io::ErrorKind::NotFound {
            return not_found(path);
        }
    }
    tracing::error!("Transcoding request failed for {}: {:#}", path, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "TRANSCODE_FAILED".to_string(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

/// Sert un fichier de la bibliothèque transcodé au format cible
///
/// Lance ou rejoint le transcodage si le produit n'est pas en cache. La
/// chaîne de requête éventuelle (casse-cache des lecteurs) est ignorée.
pub async fn stream_get(
    State(cache): State<Arc<Cache>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let relative = path.trim_matches('/').to_string();
    let Some(source) = resolve_library_path(cache.library_root(), &relative) else {
        return not_found(&relative);
    };
    if !source.is_file() {
        return not_found(&relative);
    }
    if !pmoaudio::is_audio_file(&source) {
        return not_audio(&relative);
    }

    let target = cache.params().target_format;
    let transcoder = match Transcoder::new(cache.clone(), &relative, target, true).await {
        Ok(t) => t,
        Err(err) => return transcode_error(&relative, err),
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range);

    match range {
        Some((start, end)) => serve_range(transcoder, target, start, end).await,
        None if transcoder.is_finished() => serve_finished(transcoder, target).await,
        None => serve_progressive(transcoder, target),
    }
}

/// Annonce la taille d'un produit sans le transcoder
///
/// `Content-Length` vaut la taille prédite tant que le produit n'est pas
/// encodé, la taille réelle ensuite. Aucun job n'est lancé.
pub async fn stream_head(State(cache): State<Arc<Cache>>, Path(path): Path<String>) -> Response {
    let relative = path.trim_matches('/').to_string();
    let Some(source) = resolve_library_path(cache.library_root(), &relative) else {
        return not_found(&relative);
    };
    if !source.is_file() {
        return not_found(&relative);
    }
    if !pmoaudio::is_audio_file(&source) {
        return not_audio(&relative);
    }

    let target = cache.params().target_format;
    let transcoder = match Transcoder::new(cache.clone(), &relative, target, false).await {
        Ok(t) => t,
        Err(err) => return transcode_error(&relative, err),
    };

    let size = transcoder.size();
    let _ = transcoder.close(CloseFlags::Keep).await;

    (
        StatusCode::OK,
        [
            ("content-type", target.mime_type().to_string()),
            ("content-length", size.to_string()),
            ("accept-ranges", "bytes".to_string()),
        ],
    )
        .into_response()
}

/// Sert un produit complet depuis le fichier cache
async fn serve_finished(transcoder: Transcoder, target: TargetFormat) -> Response {
    let path = transcoder.entry().buffer().path().to_path_buf();
    let size = transcoder.size();

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            let key = transcoder.entry().key().clone();
            let _ = transcoder.close(CloseFlags::Keep).await;
            tracing::error!("Cannot open cache file for {}: {}", key, err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "INTERNAL_ERROR".to_string(),
                    message: err.to_string(),
                }),
            )
                .into_response();
        }
    };

    // Le descripteur ouvert survit à une purge éventuelle du produit
    let body = Body::from_stream(ReaderStream::new(file));
    let _ = transcoder.close(CloseFlags::Keep).await;

    (
        StatusCode::OK,
        [
            ("content-type", target.mime_type().to_string()),
            ("content-length", size.to_string()),
            ("accept-ranges", "bytes".to_string()),
        ],
        body,
    )
        .into_response()
}

/// Sert un produit en cours d'encodage en suivant la ligne de flottaison
fn serve_progressive(transcoder: Transcoder, target: TargetFormat) -> Response {
    let stream = async_stream::stream! {
        let mut offset: u64 = 0;
        let mut buf = vec![0u8; STREAM_CHUNK];
        loop {
            match transcoder.read(offset, &mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    offset += n as u64;
                    yield Ok::<Bytes, anyhow::Error>(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(err) => {
                    tracing::error!(
                        "Streaming aborted for {}: {:#}",
                        transcoder.entry().key(),
                        err
                    );
                    yield Err(err);
                    break;
                }
            }
        }
        let _ = transcoder.close(CloseFlags::Keep).await;
    };

    (
        StatusCode::OK,
        [
            ("content-type", target.mime_type().to_string()),
            ("accept-ranges", "bytes".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Sert un intervalle d'octets en lecture positionnelle bloquante
///
/// La réponse est un 206 dont le total vaut `*` tant que la taille du
/// produit n'est qu'une prédiction. Les octets délivrés sont exactement
/// ceux que le produit contient, une fin de flux anticipée raccourcit la
/// réponse.
async fn serve_range(
    transcoder: Transcoder,
    target: TargetFormat,
    start: u64,
    end: Option<u64>,
) -> Response {
    let finished = transcoder.is_finished();
    let size = transcoder.size();

    if finished && start >= size {
        let content_range = format!("bytes */{}", size);
        let _ = transcoder.close(CloseFlags::Keep).await;
        return (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [("content-range", content_range)],
        )
            .into_response();
    }

    // Borne exclusive demandée ; None lit jusqu'à la fin du flux
    let limit = end.map(|e| e + 1);
    let header_end = match (limit, finished) {
        (Some(l), true) => l.min(size).saturating_sub(1),
        (Some(l), false) => l.saturating_sub(1),
        (None, _) => size.saturating_sub(1),
    };
    let content_range = if finished {
        format!("bytes {}-{}/{}", start, header_end, size)
    } else {
        format!("bytes {}-{}/*", start, header_end)
    };

    let stream = async_stream::stream! {
        let mut offset = start;
        let mut buf = vec![0u8; STREAM_CHUNK];
        loop {
            let want = match limit {
                Some(l) if offset >= l => break,
                Some(l) => (l - offset).min(buf.len() as u64) as usize,
                None => buf.len(),
            };
            match transcoder.read(offset, &mut buf[..want]).await {
                Ok(0) => break,
                Ok(n) => {
                    offset += n as u64;
                    yield Ok::<Bytes, anyhow::Error>(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(err) => {
                    tracing::error!(
                        "Range streaming aborted for {}: {:#}",
                        transcoder.entry().key(),
                        err
                    );
                    yield Err(err);
                    break;
                }
            }
        }
        let _ = transcoder.close(CloseFlags::Keep).await;
    };
    let body = Body::from_stream(stream);

    if finished {
        let content_length = (header_end - start + 1).to_string();
        (
            StatusCode::PARTIAL_CONTENT,
            [
                ("content-type", target.mime_type().to_string()),
                ("content-range", content_range),
                ("content-length", content_length),
                ("accept-ranges", "bytes".to_string()),
            ],
            body,
        )
            .into_response()
    } else {
        (
            StatusCode::PARTIAL_CONTENT,
            [
                ("content-type", target.mime_type().to_string()),
                ("content-range", content_range),
                ("accept-ranges", "bytes".to_string()),
            ],
            body,
        )
            .into_response()
    }
}

/// Analyse un en-tête `Range: bytes=a-b`
///
/// Un seul intervalle est géré. Retourne `None` pour tout en-tête
/// inexploitable, que l'appelant traite comme une requête complète.
fn parse_range(header: &str) -> Option<(u64, Option<u64>)> {
    let spec = header.strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end = end.trim();
    if end.is_empty() {
        Some((start, None))
    } else {
        let end: u64 = end.parse().ok()?;
        if end < start {
            return None;
        }
        Some((start, Some(end)))
    }
}

/// Router de la surface de streaming
///
/// `HEAD` a son propre handler : la réponse automatique d'axum passerait
/// par le handler `GET` et lancerait un transcodage.
pub fn create_stream_router(cache: Arc<Cache>) -> Router {
    Router::new()
        .route("/stream/{*path}", get(stream_get).head(stream_head))
        .with_state(cache)
}

/// Router de l'API de gestion du cache, à monter sous `/api/cache`
pub fn create_cache_api_router(cache: Arc<Cache>) -> Router {
    Router::new()
        .route("/", get(api::list_entries).delete(api::clear_cache))
        .route("/stats", get(api::get_stats))
        .route("/maintenance", post(api::run_maintenance))
        .route("/{desttype}/{*path}", delete(api::delete_entry))
        .with_state(cache)
}

/// Router du parcours de bibliothèque, à monter sous `/api/library`
pub fn create_library_router(cache: Arc<Cache>) -> Router {
    Router::new()
        .route("/", get(api::library_root_listing))
        .route("/{*path}", get(api::library_listing))
        .with_state(cache)
}

/// Trait d'extension pour initialiser le cache de transcodage sur un
/// serveur pmoserver
pub trait StreamCacheExt {
    /// Crée le cache, monte les routes et planifie la maintenance
    ///
    /// Monte la surface de streaming à la racine, l'API de gestion sous
    /// `/api/cache` et le parcours de bibliothèque sous `/api/library`,
    /// avec leur documentation Swagger.
    fn init_stream_cache(
        &mut self,
        params: CacheParams,
    ) -> impl std::future::Future<Output = Result<Arc<Cache>>> + Send;

    /// Variante lisant les paramètres depuis pmoconfig
    #[cfg(feature = "pmoconfig")]
    fn init_stream_cache_configured(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Arc<Cache>>> + Send;
}

impl StreamCacheExt for pmoserver::Server {
    async fn init_stream_cache(&mut self, params: CacheParams) -> Result<Arc<Cache>> {
        let cache = Cache::new(params).await?;

        let stream_router = create_stream_router(cache.clone());
        self.add_router("/", stream_router).await;

        let api_router = create_cache_api_router(cache.clone());
        self.add_openapi(api_router, CacheApiDoc::openapi(), "cache")
            .await;

        let library_router = create_library_router(cache.clone());
        self.add_openapi(library_router, LibraryApiDoc::openapi(), "library")
            .await;

        cache.start_maintenance();

        Ok(cache)
    }

    #[cfg(feature = "pmoconfig")]
    async fn init_stream_cache_configured(&mut self) -> Result<Arc<Cache>> {
        let params = pmoconfig::get_config().cache_params()?;
        self.init_stream_cache(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_borne() {
        assert_eq!(parse_range("bytes=0-499"), Some((0, Some(499))));
        assert_eq!(parse_range("bytes=500-999"), Some((500, Some(999))));
        assert_eq!(parse_range("bytes=0-0"), Some((0, Some(0))));
    }

    #[test]
    fn test_parse_range_ouvert() {
        assert_eq!(parse_range("bytes=1000-"), Some((1000, None)));
    }

    #[test]
    fn test_parse_range_inexploitable() {
        // Incompris : servi comme une requête complète
        assert_eq!(parse_range("bytes=-500"), None);
        assert_eq!(parse_range("bytes=0-499,600-999"), None);
        assert_eq!(parse_range("items=0-10"), None);
        assert_eq!(parse_range("bytes=500-100"), None);
        assert_eq!(parse_range("bytes=abc-def"), None);
    }
}
