//! Module de gestion du cache de transcodage
//!
//! Le [`Cache`] possède la base de données, le répertoire des produits et
//! la table des entrées vivantes. Il arbitre l'ouverture et la fermeture
//! des entrées, applique les politiques de purge (expiration, taille
//! maximale, espace disque) et planifie la maintenance périodique.
//!
//! Les entrées tenues par une requête ou un job sont dites « vivantes » et
//! ne sont jamais purgées.

use crate::buffer::{cachefile_path, CloseFlags};
use crate::db::{CacheDb, CacheInfo};
use crate::entry::{CacheEntry, CacheKey};
use anyhow::{bail, Result};
use chrono::Utc;
use pmoaudio::TargetFormat;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Nom du fichier SQLite dans le répertoire du cache
const DB_FILENAME: &str = "cache.sqlite";

/// Paramètres du cache de transcodage
///
/// Les durées sont en secondes, les tailles en octets. Une limite à 0
/// désactive la politique correspondante.
#[derive(Debug, Clone)]
pub struct CacheParams {
    /// Répertoire des produits transcodés et de la base de données
    pub cache_dir: PathBuf,
    /// Racine de la bibliothèque musicale
    pub library_root: PathBuf,
    /// Format de destination des transcodages
    pub target_format: TargetFormat,
    /// Résolution de sortie en bits par échantillon
    pub bits_per_sample: u32,
    /// Niveau de compression FLAC (0-8)
    pub flac_compression: u32,
    /// Retranscode les sources déjà au format cible
    pub recode_same: bool,
    /// Durée de vie d'un produit sans accès, 0 pour illimitée
    pub cache_expiry: u64,
    /// Inactivité avant suspension d'un job de transcodage
    pub max_inactive_suspend: u64,
    /// Inactivité avant abandon d'un job de transcodage
    pub max_inactive_abort: u64,
    /// Octets à encoder avant de libérer la première requête
    pub prebuffer_size: u64,
    /// Taille totale maximale des produits, 0 pour illimitée
    pub max_cache_size: u64,
    /// Espace disque libre à préserver, 0 pour désactiver
    pub min_diskspace: u64,
    /// Jette systématiquement les produits existants
    pub disable_cache: bool,
    /// Période de la maintenance automatique, 0 pour désactiver
    pub cache_maintenance: u64,
    /// Purge le cache au démarrage
    pub prune_cache_on_start: bool,
    /// Vide le cache au démarrage
    pub clear_cache_on_start: bool,
    /// Nombre maximal de jobs de transcodage simultanés
    pub max_threads: usize,
}

impl Default for CacheParams {
    fn default() -> Self {
        CacheParams {
            cache_dir: PathBuf::from("cache"),
            library_root: PathBuf::from("."),
            target_format: TargetFormat::Flac,
            bits_per_sample: 16,
            flac_compression: 5,
            recode_same: false,
            cache_expiry: 7 * 24 * 3600,
            max_inactive_suspend: 15,
            max_inactive_abort: 30,
            prebuffer_size: 100 * 1024,
            max_cache_size: 0,
            min_diskspace: 0,
            disable_cache: false,
            cache_maintenance: 3600,
            prune_cache_on_start: false,
            clear_cache_on_start: false,
            max_threads: 16,
        }
    }
}

/// Bilan d'une passe de maintenance
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct MaintenanceReport {
    /// Entrées supprimées pour expiration
    pub expired_removed: usize,
    /// Entrées supprimées pour dépassement de la taille maximale
    pub size_removed: usize,
    /// Entrées supprimées pour libérer de l'espace disque
    pub disk_removed: usize,
    /// Faux si au moins une étape a échoué
    pub success: bool,
}

/// Cache de produits transcodés
///
/// Les entrées vivantes sont partagées via des `Arc` dans une table
/// protégée par un verrou en lecture/écriture. La base de données et les
/// paramètres sont partagés avec chaque entrée.
#[derive(Debug)]
pub struct Cache {
    params: Arc<CacheParams>,
    pub db: Arc<CacheDb>,
    entries: Arc<RwLock<HashMap<CacheKey, Arc<CacheEntry>>>>,
    pub(crate) transcode_jobs: Arc<Semaphore>,
}

impl Cache {
    /// Ouvre (ou crée) le cache dans son répertoire
    ///
    /// Crée l'arborescence, ouvre la base de données et applique les
    /// actions de démarrage configurées (`clear_cache_on_start` prime sur
    /// `prune_cache_on_start`).
    pub async fn new(params: CacheParams) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&params.cache_dir)?;
        let db = Arc::new(CacheDb::open(&params.cache_dir.join(DB_FILENAME))?);
        let params = Arc::new(params);

        let cache = Arc::new(Cache {
            params: params.clone(),
            db,
            entries: Arc::new(RwLock::new(HashMap::new())),
            transcode_jobs: Arc::new(Semaphore::new(params.max_threads)),
        });

        tracing::info!(
            "Transcoding cache opened: {} ({} entries)",
            cache.params.cache_dir.display(),
            cache.db.count()?
        );

        if cache.params.clear_cache_on_start {
            let removed = cache.clear().await?;
            tracing::info!("Cache cleared on startup: {} entries removed", removed);
        } else if cache.params.prune_cache_on_start {
            cache.maintenance(0).await;
        }

        Ok(cache)
    }

    /// Ouvre l'entrée d'un produit, en la créant au besoin
    ///
    /// L'entrée retournée est comptée : l'appelant doit la rendre via
    /// [`Cache::close_entry`]. Deux requêtes simultanées sur le même
    /// produit partagent la même entrée.
    pub async fn open_entry(&self, filename: &str, desttype: &str) -> Result<Arc<CacheEntry>> {
        let key = CacheKey::new(filename, desttype);
        let mut entries = self.entries.write().await;

        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(CacheEntry::new(
                    key.clone(),
                    self.db.clone(),
                    self.params.clone(),
                ))
            })
            .clone();

        if let Err(err) = entry.open() {
            // Première ouverture échouée : ne pas laisser d'entrée morte
            if entry.ref_count() == 0 {
                entries.remove(&key);
            }
            return Err(err);
        }
        Ok(entry)
    }

    /// Rend une entrée ouverte
    ///
    /// Le dernier fermeur retire l'entrée de la table des vivantes.
    /// Retourne vrai si l'entrée n'est plus tenue par personne.
    pub async fn close_entry(&self, entry: &Arc<CacheEntry>, flags: CloseFlags) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let unused = entry.close(flags)?;
        if unused {
            entries.remove(entry.key());
        }
        Ok(unused)
    }

    /// Retourne l'entrée vivante d'un produit, s'il y en a une
    pub async fn get_entry(&self, filename: &str, desttype: &str) -> Option<Arc<CacheEntry>> {
        let key = CacheKey::new(filename, desttype);
        self.entries.read().await.get(&key).cloned()
    }

    /// Nombre d'entrées actuellement tenues
    pub async fn live_count(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn live_keys(&self) -> HashSet<CacheKey> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Supprime le fichier et la ligne d'un produit
    ///
    /// Un fichier déjà absent n'est pas une erreur, la ligne est supprimée
    /// dans tous les cas.
    async fn remove_product(&self, info: &CacheInfo) -> Result<()> {
        let path = cachefile_path(&self.params.cache_dir, &info.filename, &info.desttype);
        if let Err(err) = tokio::fs::remove_file(&path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(err.into());
            }
        }
        self.db.delete(&info.filename, &info.desttype)?;
        Ok(())
    }

    /// Purge les produits expirés
    ///
    /// Un produit expire quand son dernier accès est plus vieux que
    /// `cache_expiry`. Les entrées vivantes sont épargnées. Retourne le
    /// nombre de produits supprimés.
    pub async fn prune_expired(&self) -> Result<usize> {
        let expiry = self.params.cache_expiry;
        if expiry == 0 {
            return Ok(0);
        }

        let cutoff = Utc::now().timestamp() - expiry as i64;
        let candidates = self.db.get_expired(cutoff)?;
        if candidates.is_empty() {
            return Ok(0);
        }
        let live = self.live_keys().await;

        let mut removed = 0;
        self.db.begin_transaction()?;
        for info in &candidates {
            if live.contains(&CacheKey::new(&info.filename, &info.desttype)) {
                continue;
            }
            tracing::info!(
                "Pruning expired cache entry: {} ({})",
                info.filename,
                info.desttype
            );
            if let Err(err) = self.remove_product(info).await {
                self.db.rollback_transaction()?;
                return Err(err);
            }
            removed += 1;
        }
        self.db.commit_transaction()?;
        Ok(removed)
    }

    /// Purge les produits les moins récemment utilisés au-delà de la
    /// taille maximale du cache
    pub async fn prune_cache_size(&self) -> Result<usize> {
        let max_size = self.params.max_cache_size;
        if max_size == 0 {
            return Ok(0);
        }

        let before = self.db.total_encoded_size()?;
        if before <= max_size {
            return Ok(0);
        }

        let count = self.db.count()?;
        let candidates = self.db.get_oldest(count)?;
        let live = self.live_keys().await;

        let mut total = before;
        let mut removed = 0;
        self.db.begin_transaction()?;
        for info in &candidates {
            if total <= max_size {
                break;
            }
            if live.contains(&CacheKey::new(&info.filename, &info.desttype)) {
                continue;
            }
            tracing::info!(
                "Pruning cache entry over size limit: {} ({})",
                info.filename,
                info.desttype
            );
            if let Err(err) = self.remove_product(info).await {
                self.db.rollback_transaction()?;
                return Err(err);
            }
            total = total.saturating_sub(info.encoded_filesize);
            removed += 1;
        }
        self.db.commit_transaction()?;

        if removed > 0 {
            tracing::info!(
                "LRU eviction: removed {} entries (cache size: {} -> {} bytes)",
                removed,
                before,
                total
            );
        }
        Ok(removed)
    }

    /// Purge les produits les moins récemment utilisés jusqu'à retrouver
    /// l'espace disque minimal
    ///
    /// `predicted` est la taille du produit sur le point d'être encodé,
    /// ajoutée au seuil pour lui faire de la place.
    pub async fn prune_disk_space(&self, predicted: u64) -> Result<usize> {
        let min_diskspace = self.params.min_diskspace;
        if min_diskspace == 0 {
            return Ok(0);
        }

        let free = free_disk_space(&self.params.cache_dir);
        let wanted = min_diskspace.saturating_add(predicted);
        if free >= wanted {
            return Ok(0);
        }

        let count = self.db.count()?;
        let candidates = self.db.get_oldest(count)?;
        let live = self.live_keys().await;

        let mut freed: u64 = 0;
        let mut removed = 0;
        self.db.begin_transaction()?;
        for info in &candidates {
            if free.saturating_add(freed) >= wanted {
                break;
            }
            if live.contains(&CacheKey::new(&info.filename, &info.desttype)) {
                continue;
            }
            tracing::info!(
                "Pruning cache entry to free disk space: {} ({})",
                info.filename,
                info.desttype
            );
            if let Err(err) = self.remove_product(info).await {
                self.db.rollback_transaction()?;
                return Err(err);
            }
            freed = freed.saturating_add(info.encoded_filesize);
            removed += 1;
        }
        self.db.commit_transaction()?;
        Ok(removed)
    }

    /// Passe de maintenance complète
    ///
    /// Enchaîne les trois purges. Une étape en échec est signalée dans le
    /// bilan mais n'empêche pas les suivantes de s'exécuter.
    pub async fn maintenance(&self, predicted: u64) -> MaintenanceReport {
        let mut report = MaintenanceReport {
            expired_removed: 0,
            size_removed: 0,
            disk_removed: 0,
            success: true,
        };

        match self.prune_expired().await {
            Ok(n) => report.expired_removed = n,
            Err(err) => {
                tracing::error!("Cache maintenance: pruning expired entries failed: {}", err);
                report.success = false;
            }
        }
        match self.prune_cache_size().await {
            Ok(n) => report.size_removed = n,
            Err(err) => {
                tracing::error!("Cache maintenance: pruning over size limit failed: {}", err);
                report.success = false;
            }
        }
        match self.prune_disk_space(predicted).await {
            Ok(n) => report.disk_removed = n,
            Err(err) => {
                tracing::error!("Cache maintenance: pruning for disk space failed: {}", err);
                report.success = false;
            }
        }
        report
    }

    /// Vide le cache
    ///
    /// Supprime tous les produits et leurs lignes, sauf les entrées
    /// vivantes. Retourne le nombre de produits supprimés.
    pub async fn clear(&self) -> Result<usize> {
        let rows = self.db.get_all()?;
        let live = self.live_keys().await;

        let mut removed = 0;
        for info in &rows {
            if live.contains(&CacheKey::new(&info.filename, &info.desttype)) {
                tracing::debug!(
                    "Skipping live cache entry: {} ({})",
                    info.filename,
                    info.desttype
                );
                continue;
            }
            self.remove_product(info).await?;
            removed += 1;
        }
        tracing::info!("Cache cleared: {} entries removed", removed);
        Ok(removed)
    }

    /// Supprime un produit désigné
    ///
    /// Refuse si l'entrée est vivante. Retourne faux si le produit
    /// n'existe pas.
    pub async fn remove_cachefile(&self, filename: &str, desttype: &str) -> Result<bool> {
        let key = CacheKey::new(filename, desttype);
        if self.entries.read().await.contains_key(&key) {
            bail!("cache entry {} is currently in use", key);
        }

        match self.db.get(filename, desttype)? {
            None => Ok(false),
            Some(info) => {
                self.remove_product(&info).await?;
                tracing::info!("Removed cache entry: {} ({})", filename, desttype);
                Ok(true)
            }
        }
    }

    /// Planifie la maintenance périodique sur le runtime
    pub fn start_maintenance(self: &Arc<Self>) {
        let period = self.params.cache_maintenance;
        if period == 0 {
            tracing::info!("Periodic cache maintenance is disabled");
            return;
        }

        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(period));
            // Le premier tick est immédiat, on le consomme
            interval.tick().await;
            loop {
                interval.tick().await;
                tracing::debug!("Running periodic cache maintenance");
                cache.maintenance(0).await;
            }
        });
        tracing::info!(
            "Periodic cache maintenance scheduled every {} seconds",
            period
        );
    }

    /// Paramètres du cache
    pub fn params(&self) -> &CacheParams {
        &self.params
    }

    /// Répertoire des produits transcodés
    pub fn cache_dir(&self) -> &Path {
        &self.params.cache_dir
    }

    /// Racine de la bibliothèque musicale
    pub fn library_root(&self) -> &Path {
        &self.params.library_root
    }
}

/// Espace disque libre du volume portant `path`
///
/// Retourne `u64::MAX` quand le volume ne peut pas être identifié, ce qui
/// neutralise la purge par espace disque plutôt que de vider le cache à
/// tort.
pub fn free_disk_space(path: &Path) -> u64 {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    // Le point de montage le plus long est le plus spécifique
    let mut best: Option<(usize, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if target.starts_with(mount) {
            let len = mount.as_os_str().len();
            if best.map_or(true, |(best_len, _)| len > best_len) {
                best = Some((len, disk.available_space()));
            }
        }
    }

    match best {
        Some((_, available)) => available,
        None => {
            tracing::warn!("Unable to determine free disk space for {:?}", path);
            u64::MAX
        }
    }
}
