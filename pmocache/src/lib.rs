//! # pmocache - Cache de transcodage audio pour PMOStream
//!
//! Cette crate fournit un cache persistant de produits transcodés : chaque
//! fichier de la bibliothèque musicale est converti une seule fois vers le
//! format de destination, puis resservi depuis le disque. Les produits en
//! cours d'encodage sont lisibles immédiatement, la lecture suit la
//! progression de l'encodeur.
//!
//! ## Vue d'ensemble
//!
//! `pmocache` fournit les composants pour :
//! - Indexer les produits transcodés dans une base SQLite
//! - Transcoder à la demande via `pmoaudio` (FLAC, WAV, AIFF)
//! - Servir un produit pendant son encodage (lecture sous la ligne de
//!   flottaison, attente bloquante au-delà)
//! - Suspendre puis abandonner les encodages que plus personne ne lit
//! - Purger le cache (expiration, taille maximale, espace disque)
//!
//! ## Architecture
//!
//! ```text
//! pmocache
//!     ├── db.rs        - Index SQLite des produits
//!     ├── buffer.rs    - Fichier cache et ligne de flottaison
//!     ├── entry.rs     - Entrée comptée, partagée entre lecteurs
//!     ├── cache.rs     - Table des entrées vivantes et politiques de purge
//!     └── transcode.rs - Jobs de transcodage et lecture positionnelle
//! ```
//!
//! ## Utilisation
//!
//! ### Transcoder et lire une piste
//!
//! ```rust,no_run
//! use pmoaudio::TargetFormat;
//! use pmocache::{Cache, CacheParams, CloseFlags, Transcoder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let params = CacheParams {
//!         cache_dir: "./cache".into(),
//!         library_root: "/music".into(),
//!         target_format: TargetFormat::Flac,
//!         ..CacheParams::default()
//!     };
//!     let cache = Cache::new(params).await?;
//!
//!     // Lance l'encodage et lit le début du produit sans attendre la fin
//!     let transcoder =
//!         Transcoder::new(cache.clone(), "album/track.wav", TargetFormat::Flac, true).await?;
//!     let mut buf = vec![0u8; 64 * 1024];
//!     let n = transcoder.read(0, &mut buf).await?;
//!     println!("{} octets lus sur {} prévus", n, transcoder.size());
//!     transcoder.close(CloseFlags::Keep).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Maintenance du cache
//!
//! ```rust,no_run
//! use pmocache::{Cache, CacheParams};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = Cache::new(CacheParams::default()).await?;
//!
//!     // Une passe immédiate, puis la maintenance périodique
//!     let report = cache.maintenance(0).await;
//!     println!("{} entrées expirées supprimées", report.expired_removed);
//!     cache.start_maintenance();
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Structure des fichiers
//!
//! Les produits reproduisent l'arborescence de la bibliothèque sous le
//! répertoire du cache :
//!
//! ```text
//! cache/
//! ├── cache.sqlite                     # Base de données SQLite
//! └── album/
//!     ├── track1.wav.cache.flac        # Produit transcodé
//!     └── track2.wav.cache.flac
//! ```
//!
//! ## Schéma de base de données
//!
//! ```sql
//! CREATE TABLE cache_entry (
//!     filename TEXT NOT NULL,            -- Chemin relatif dans la bibliothèque
//!     desttype TEXT NOT NULL,            -- Format de destination
//!     audiobitrate INTEGER,              -- Débit de la source
//!     audiosamplerate INTEGER,           -- Fréquence d'échantillonnage
//!     channels INTEGER,                  -- Nombre de canaux
//!     bits_per_sample INTEGER,           -- Résolution du produit
//!     predicted_filesize INTEGER,        -- Taille prédite du produit
//!     encoded_filesize INTEGER,          -- Taille réelle une fois encodé
//!     result INTEGER,                    -- État du transcodage
//!     error INTEGER,                     -- Dernier encodage en échec
//!     errno INTEGER,                     -- Code d'erreur POSIX
//!     creation_time INTEGER,             -- Création (epoch, secondes)
//!     access_time INTEGER,               -- Dernier accès (epoch, secondes)
//!     file_time INTEGER,                 -- mtime de la source
//!     file_size INTEGER,                 -- Taille de la source
//!     PRIMARY KEY (filename, desttype)
//! );
//! ```
//!
//! ## Dépendances principales
//!
//! - `rusqlite` : Base de données SQLite
//! - `pmoaudio` : Sondage, décodage et encodage audio
//! - `tokio` : Runtime asynchrone
//! - `sysinfo` : Espace disque disponible
//! - `axum` : Surface HTTP (optionnel, feature `pmoserver`)
//!
//! ## Voir aussi
//!
//! - `pmoaudio` : Formats et encodeurs audio
//! - `pmoserver` : Serveur HTTP sur lequel se montent les routes

pub mod db;
pub mod buffer;
pub mod entry;
pub mod cache;
pub mod transcode;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

#[cfg(feature = "pmoserver")]
pub mod pmoserver_ext;

#[cfg(feature = "pmoserver")]
pub mod api;

#[cfg(feature = "pmoserver")]
pub mod openapi;

pub use db::{CacheDb, CacheInfo, ResultCode};
pub use buffer::{cachefile_path, Buffer, CloseFlags};
pub use entry::{CacheEntry, CacheKey};
pub use cache::{free_disk_space, Cache, CacheParams, MaintenanceReport};
pub use transcode::Transcoder;

#[cfg(feature = "pmoconfig")]
pub use config_ext::TranscodeConfigExt;

#[cfg(feature = "pmoserver")]
pub use pmoserver_ext::{
    create_cache_api_router, create_library_router, create_stream_router, StreamCacheExt,
};

#[cfg(feature = "pmoserver")]
pub use api::{
    CacheStats, ClearResponse, DeleteEntryResponse, ErrorResponse, LibraryEntry, LibraryListing,
};

#[cfg(feature = "pmoserver")]
pub use openapi::{CacheApiDoc, LibraryApiDoc};
