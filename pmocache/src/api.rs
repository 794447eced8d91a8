//! API REST de gestion du cache et de parcours de la bibliothèque
//!
//! Ce module expose une API documentée avec OpenAPI/Swagger pour :
//! - Lister les produits transcodés et leurs statistiques
//! - Déclencher une passe de maintenance
//! - Vider le cache ou supprimer un produit précis
//! - Parcourir la bibliothèque musicale répertoire par répertoire

use crate::cache::{free_disk_space, Cache, MaintenanceReport};
use crate::db::CacheInfo;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pmoaudio::TargetFormat;
use serde::Serialize;
use std::io;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use utoipa::ToSchema;

/// Réponse d'erreur de l'API
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Code d'erreur
    #[schema(example = "NOT_FOUND")]
    pub error: String,
    /// Message détaillé
    #[schema(example = "No cache entry for albums/track.flac (wav)")]
    pub message: String,
}

/// Statistiques du cache
#[derive(Debug, Serialize, ToSchema)]
pub struct CacheStats {
    /// Nombre de produits indexés
    #[schema(example = 128)]
    pub entries: usize,
    /// Taille totale des produits encodés en octets
    #[schema(example = 4294967296u64)]
    pub total_encoded_size: u64,
    /// Entrées actuellement tenues par des requêtes ou des jobs
    #[schema(example = 2)]
    pub live_entries: usize,
    /// Répertoire du cache
    #[schema(example = "/var/cache/pmostream")]
    pub cache_dir: String,
    /// Espace libre du volume portant le cache, en octets
    #[schema(example = 107374182400u64)]
    pub free_disk_space: u64,
}

/// Réponse à une purge complète
#[derive(Debug, Serialize, ToSchema)]
pub struct ClearResponse {
    /// Nombre de produits supprimés
    #[schema(example = 42)]
    pub removed: usize,
    /// Message de confirmation
    pub message: String,
}

/// Réponse à une suppression ciblée
#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteEntryResponse {
    /// Message de confirmation
    pub message: String,
}

/// Élément d'un répertoire de la bibliothèque
#[derive(Debug, Serialize, ToSchema)]
pub struct LibraryEntry {
    /// Nom de l'élément
    #[schema(example = "track01.flac")]
    pub name: String,
    /// Chemin relatif à la racine de la bibliothèque
    #[schema(example = "albums/wall/track01.flac")]
    pub path: String,
    /// `"directory"` ou `"file"`
    #[schema(example = "file")]
    pub kind: String,
    /// Taille en octets, absente pour les répertoires
    pub size: Option<u64>,
}

/// Contenu d'un répertoire de la bibliothèque
#[derive(Debug, Serialize, ToSchema)]
pub struct LibraryListing {
    /// Chemin du répertoire listé, vide pour la racine
    #[schema(example = "albums/wall")]
    pub path: String,
    /// Chemin du répertoire parent, absent à la racine
    #[schema(example = "albums")]
    pub parent: Option<String>,
    /// Sous-répertoires puis fichiers audio, triés par nom
    pub entries: Vec<LibraryEntry>,
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "INTERNAL_ERROR".to_string(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

/// Liste les produits en cache
#[utoipa::path(
    get,
    path = "/api/cache",
    tag = "cache",
    responses(
        (status = 200, description = "Liste des produits transcodés", body = Vec<CacheInfo>),
        (status = 500, description = "Erreur interne", body = ErrorResponse)
    )
)]
pub async fn list_entries(State(cache): State<Arc<Cache>>) -> impl IntoResponse {
    match cache.db.get_all() {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(err) => internal_error(err),
    }
}

/// Statistiques du cache
#[utoipa::path(
    get,
    path = "/api/cache/stats",
    tag = "cache",
    responses(
        (status = 200, description = "Statistiques du cache", body = CacheStats),
        (status = 500, description = "Erreur interne", body = ErrorResponse)
    )
)]
pub async fn get_stats(State(cache): State<Arc<Cache>>) -> impl IntoResponse {
    match cache_stats(&cache).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn cache_stats(cache: &Arc<Cache>) -> anyhow::Result<CacheStats> {
    Ok(CacheStats {
        entries: cache.db.count()?,
        total_encoded_size: cache.db.total_encoded_size()?,
        live_entries: cache.live_count().await,
        cache_dir: cache.cache_dir().display().to_string(),
        free_disk_space: free_disk_space(cache.cache_dir()),
    })
}

/// Déclenche une passe de maintenance
#[utoipa::path(
    post,
    path = "/api/cache/maintenance",
    tag = "cache",
    responses(
        (status = 200, description = "Bilan de la maintenance", body = MaintenanceReport)
    )
)]
pub async fn run_maintenance(State(cache): State<Arc<Cache>>) -> impl IntoResponse {
    let report = cache.maintenance(0).await;
    (StatusCode::OK, Json(report)).into_response()
}

/// Vide le cache
///
/// Les entrées tenues par une requête ou un job en cours sont épargnées.
#[utoipa::path(
    delete,
    path = "/api/cache",
    tag = "cache",
    responses(
        (status = 200, description = "Cache vidé", body = ClearResponse),
        (status = 500, description = "Erreur interne", body = ErrorResponse)
    )
)]
pub async fn clear_cache(State(cache): State<Arc<Cache>>) -> impl IntoResponse {
    match cache.clear().await {
        Ok(removed) => (
            StatusCode::OK,
            Json(ClearResponse {
                removed,
                message: format!("{} cache entries removed", removed),
            }),
        )
            .into_response(),
        Err(err) => internal_error(err),
    }
}

/// Supprime un produit du cache
#[utoipa::path(
    delete,
    path = "/api/cache/{desttype}/{path}",
    tag = "cache",
    params(
        ("desttype" = String, Path, description = "Format de destination du produit"),
        ("path" = String, Path, description = "Chemin source relatif à la bibliothèque")
    ),
    responses(
        (status = 200, description = "Produit supprimé", body = DeleteEntryResponse),
        (status = 400, description = "Format de destination inconnu", body = ErrorResponse),
        (status = 404, description = "Produit inconnu", body = ErrorResponse),
        (status = 409, description = "Produit en cours d'utilisation", body = ErrorResponse)
    )
)]
pub async fn delete_entry(
    State(cache): State<Arc<Cache>>,
    Path((desttype, path)): Path<(String, String)>,
) -> impl IntoResponse {
    if TargetFormat::from_desttype(&desttype).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "INVALID_REQUEST".to_string(),
                message: format!("Unknown destination format: {}", desttype),
            }),
        )
            .into_response();
    }

    match cache.remove_cachefile(&path, &desttype).await {
        Ok(true) => (
            StatusCode::OK,
            Json(DeleteEntryResponse {
                message: format!("Cache entry removed: {} ({})", path, desttype),
            }),
        )
            .into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "NOT_FOUND".to_string(),
                message: format!("No cache entry for {} ({})", path, desttype),
            }),
        )
            .into_response(),
        Err(err) => {
            let message = err.to_string();
            if message.contains("in use") {
                (
                    StatusCode::CONFLICT,
                    Json(ErrorResponse {
                        error: "BUSY".to_string(),
                        message,
                    }),
                )
                    .into_response()
            } else {
                internal_error(message)
            }
        }
    }
}

/// Liste la racine de la bibliothèque
#[utoipa::path(
    get,
    path = "/api/library",
    tag = "library",
    responses(
        (status = 200, description = "Contenu de la racine", body = LibraryListing),
        (status = 404, description = "Répertoire introuvable", body = ErrorResponse)
    )
)]
pub async fn library_root_listing(State(cache): State<Arc<Cache>>) -> impl IntoResponse {
    serve_library_listing(&cache, "")
}

/// Liste un répertoire de la bibliothèque
///
/// Un seul niveau : les sous-répertoires sont listés mais pas parcourus.
#[utoipa::path(
    get,
    path = "/api/library/{path}",
    tag = "library",
    params(
        ("path" = String, Path, description = "Répertoire relatif à la racine de la bibliothèque")
    ),
    responses(
        (status = 200, description = "Contenu du répertoire", body = LibraryListing),
        (status = 404, description = "Répertoire introuvable", body = ErrorResponse)
    )
)]
pub async fn library_listing(
    State(cache): State<Arc<Cache>>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    serve_library_listing(&cache, &path)
}

fn serve_library_listing(cache: &Arc<Cache>, relative: &str) -> Response {
    let relative = relative.trim_matches('/');
    let dir = match resolve_library_path(cache.library_root(), relative) {
        Some(dir) => dir,
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "NOT_FOUND".to_string(),
                    message: format!("No such directory: {}", relative),
                }),
            )
                .into_response()
        }
    };

    match list_directory(&dir, relative) {
        Ok(listing) => (StatusCode::OK, Json(listing)).into_response(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "NOT_FOUND".to_string(),
                message: format!("No such directory: {}", relative),
            }),
        )
            .into_response(),
        Err(err) => internal_error(err),
    }
}

/// Résout un chemin relatif dans la bibliothèque
///
/// Refuse les chemins absolus et toute remontée hors de la racine.
pub(crate) fn resolve_library_path(root: &std::path::Path, relative: &str) -> Option<PathBuf> {
    let rel = std::path::Path::new(relative);
    if rel.is_absolute() {
        return None;
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return None,
        }
    }
    Some(root.join(rel))
}

fn list_directory(dir: &std::path::Path, relative: &str) -> io::Result<LibraryListing> {
    let mut dirs: Vec<LibraryEntry> = Vec::new();
    let mut files: Vec<LibraryEntry> = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let meta = entry.metadata()?;
        let child_path = if relative.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", relative, name)
        };

        if meta.is_dir() {
            dirs.push(LibraryEntry {
                name,
                path: child_path,
                kind: "directory".to_string(),
                size: None,
            });
        } else if pmoaudio::is_audio_file(&entry.path()) {
            files.push(LibraryEntry {
                name,
                path: child_path,
                kind: "file".to_string(),
                size: Some(meta.len()),
            });
        }
    }

    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));

    let mut entries = dirs;
    entries.extend(files);

    let parent = if relative.is_empty() {
        None
    } else {
        match relative.rfind('/') {
            Some(idx) => Some(relative[..idx].to_string()),
            None => Some(String::new()),
        }
    };

    Ok(LibraryListing {
        path: relative.to_string(),
        parent,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_chemins_surs() {
        let root = std::path::Path::new("/music");
        assert_eq!(
            resolve_library_path(root, "album/track.flac"),
            Some(PathBuf::from("/music/album/track.flac"))
        );
        assert_eq!(resolve_library_path(root, ""), Some(PathBuf::from("/music")));
        assert_eq!(
            resolve_library_path(root, "./album"),
            Some(PathBuf::from("/music/album"))
        );
    }

    #[test]
    fn test_resolution_rejette_traversee() {
        let root = std::path::Path::new("/music");
        assert_eq!(resolve_library_path(root, "../etc/passwd"), None);
        assert_eq!(resolve_library_path(root, "album/../../etc"), None);
        assert_eq!(resolve_library_path(root, "/etc/passwd"), None);
    }

    #[test]
    fn test_listing_un_seul_niveau() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp.path().join("album")).unwrap();
        std::fs::create_dir(temp.path().join("album/cd1")).unwrap();
        std::fs::write(temp.path().join("track.flac"), b"x").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(temp.path().join("album/cd1/deep.flac"), b"x").unwrap();

        let listing = list_directory(temp.path(), "").unwrap();
        assert_eq!(listing.path, "");
        assert!(listing.parent.is_none());

        // Le répertoire d'abord, puis le fichier audio ; le .txt est ignoré
        // et le contenu de album/ n'est pas parcouru
        let names: Vec<&str> = listing.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["album", "track.flac"]);
        assert_eq!(listing.entries[0].kind, "directory");
        assert_eq!(listing.entries[1].kind, "file");
        assert_eq!(listing.entries[1].size, Some(1));
    }

    #[test]
    fn test_listing_parent() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("a/b")).unwrap();

        let listing = list_directory(&temp.path().join("a/b"), "a/b").unwrap();
        assert_eq!(listing.parent.as_deref(), Some("a"));

        let listing = list_directory(&temp.path().join("a"), "a").unwrap();
        assert_eq!(listing.parent.as_deref(), Some(""));
    }
}
