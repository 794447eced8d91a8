//! Entrée vivante du cache de transcodage
//!
//! Une [`CacheEntry`] réunit tout l'état partagé d'un produit : la ligne
//! de la base de données, le fichier cache et son compteur de références.
//! Plusieurs requêtes HTTP et le job de transcodage peuvent tenir la même
//! entrée simultanément ; le premier ouvreur la charge, le dernier fermeur
//! la libère.

use crate::buffer::{cachefile_path, Buffer, CloseFlags};
use crate::cache::CacheParams;
use crate::db::{CacheDb, CacheInfo, ResultCode};
use anyhow::Result;
use chrono::Utc;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::UNIX_EPOCH;

/// Clé d'une entrée : couple (source relative, format de destination)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub filename: String,
    pub desttype: String,
}

impl CacheKey {
    pub fn new(filename: &str, desttype: &str) -> Self {
        CacheKey {
            filename: filename.to_string(),
            desttype: desttype.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.filename, self.desttype)
    }
}

/// État partagé d'un produit transcodé
///
/// L'entrée est comptée par références : chaque `open()` doit être suivi
/// d'un `close()`. Les métadonnées vivent en mémoire derrière un verrou et
/// ne sont persistées qu'aux points de passage (ouverture, fermeture,
/// progression du job).
#[derive(Debug)]
pub struct CacheEntry {
    key: CacheKey,
    source_path: PathBuf,
    db: Arc<CacheDb>,
    buffer: Buffer,
    info: RwLock<CacheInfo>,
    ref_count: AtomicUsize,
    decoding: AtomicBool,
    params: Arc<CacheParams>,
}

impl CacheEntry {
    /// Crée une entrée sans toucher au disque ni à la base
    pub fn new(key: CacheKey, db: Arc<CacheDb>, params: Arc<CacheParams>) -> Self {
        let source_path = params.library_root.join(&key.filename);
        let buffer = Buffer::new(cachefile_path(&params.cache_dir, &key.filename, &key.desttype));
        let info = CacheInfo::new(&key.filename, &key.desttype);
        CacheEntry {
            key,
            source_path,
            db,
            buffer,
            info: RwLock::new(info),
            ref_count: AtomicUsize::new(0),
            decoding: AtomicBool::new(false),
            params,
        }
    }

    /// Ouvre l'entrée
    ///
    /// Incrémente le compteur de références. Le premier ouvreur charge la
    /// ligne depuis la base : une ligne absente ou non aboutie (ni
    /// `Finished` ni `Error`) jette le fichier cache et repart de zéro,
    /// une ligne en erreur est conservée telle quelle pour que l'appelant
    /// puisse la constater. La date d'accès est estampillée et la ligne
    /// persistée.
    pub fn open(&self) -> Result<()> {
        let prev = self.ref_count.fetch_add(1, Ordering::SeqCst);
        if prev == 0 {
            if let Err(err) = self.first_open() {
                self.ref_count.fetch_sub(1, Ordering::SeqCst);
                return Err(err);
            }
        }
        Ok(())
    }

    fn first_open(&self) -> Result<()> {
        let row = self.db.get(&self.key.filename, &self.key.desttype)?;
        let rebuild = match row {
            Some(row)
                if row.result == ResultCode::Finished || row.result == ResultCode::Error =>
            {
                *self.info.write().unwrap() = row;
                false
            }
            Some(_) => {
                tracing::debug!("Discarding unfinished cache product for {}", self.key);
                *self.info.write().unwrap() =
                    CacheInfo::new(&self.key.filename, &self.key.desttype);
                true
            }
            None => {
                *self.info.write().unwrap() =
                    CacheInfo::new(&self.key.filename, &self.key.desttype);
                true
            }
        };

        {
            let mut info = self.info.write().unwrap();
            let now = Utc::now().timestamp();
            if now > info.access_time {
                info.access_time = now;
            }
        }

        self.buffer.open(rebuild)?;
        self.persist()?;
        Ok(())
    }

    /// Ferme l'entrée
    ///
    /// Persiste les métadonnées et décrémente le compteur. Le dernier
    /// fermeur ferme le fichier cache ; avec [`CloseFlags::Delete`] il
    /// supprime aussi le fichier et la ligne. Retourne vrai si l'entrée
    /// n'est plus tenue par personne.
    pub fn close(&self, flags: CloseFlags) -> Result<bool> {
        if self.ref_count.load(Ordering::SeqCst) == 0 {
            tracing::warn!("close() without matching open() for {}", self.key);
            return Ok(true);
        }

        self.persist()?;

        let prev = self.ref_count.fetch_sub(1, Ordering::SeqCst);
        if prev <= 1 {
            self.buffer.close(flags)?;
            if flags == CloseFlags::Delete {
                self.db.delete(&self.key.filename, &self.key.desttype)?;
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Estampille la date de dernier accès
    ///
    /// La date ne recule jamais. Avec `persist`, la ligne est aussi écrite
    /// en base ; sinon seule la copie mémoire bouge et la persistance
    /// attend le prochain point de passage.
    pub fn update_access(&self, persist: bool) -> Result<()> {
        {
            let mut info = self.info.write().unwrap();
            let now = Utc::now().timestamp();
            if now > info.access_time {
                info.access_time = now;
            }
        }
        if persist {
            self.persist()?;
        }
        Ok(())
    }

    /// Taille du produit telle qu'annonçable à un client
    ///
    /// Taille réelle une fois le transcodage terminé, sinon le maximum de
    /// la ligne de flottaison et de la prédiction.
    pub fn size(&self) -> u64 {
        let info = self.info.read().unwrap();
        if info.result == ResultCode::Finished {
            info.encoded_filesize
        } else {
            self.buffer.watermark().max(info.predicted_filesize)
        }
    }

    /// Âge de l'entrée en secondes depuis sa création
    pub fn age(&self) -> u64 {
        let creation = self.info.read().unwrap().creation_time;
        (Utc::now().timestamp() - creation).max(0) as u64
    }

    /// Vrai si l'entrée a dépassé la durée de vie configurée
    pub fn expired(&self) -> bool {
        let expiry = self.params.cache_expiry;
        expiry > 0 && self.age() > expiry
    }

    /// Secondes écoulées depuis le dernier accès
    fn idle(&self) -> u64 {
        let access = self.info.read().unwrap().access_time;
        (Utc::now().timestamp() - access).max(0) as u64
    }

    /// Vrai si aucun accès depuis assez longtemps pour suspendre le job
    pub fn suspend_timeout(&self) -> bool {
        let timeout = self.params.max_inactive_suspend;
        timeout > 0 && self.idle() > timeout
    }

    /// Vrai si aucun accès depuis assez longtemps pour abandonner le job
    pub fn decode_timeout(&self) -> bool {
        let timeout = self.params.max_inactive_abort;
        timeout > 0 && self.idle() > timeout
    }

    /// Vrai si le produit ne correspond plus à la source ou aux paramètres
    ///
    /// Compare la date de modification et la taille du fichier source avec
    /// celles relevées au transcodage, ainsi que la résolution configurée.
    /// Une source disparue remonte l'erreur système.
    pub fn outdated(&self) -> io::Result<bool> {
        let info = self.info.read().unwrap();
        if info.result == ResultCode::None {
            return Ok(false);
        }

        let meta = std::fs::metadata(&self.source_path)?;
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if mtime != info.file_time || meta.len() != info.file_size {
            return Ok(true);
        }
        if info.bits_per_sample != 0 && info.bits_per_sample != self.params.bits_per_sample {
            return Ok(true);
        }
        Ok(false)
    }

    /// Remet le produit à zéro
    ///
    /// Efface les résultats du transcodage et tronque le fichier cache.
    /// Les dates de création et d'accès sont conservées.
    pub fn clear(&self) -> Result<()> {
        {
            let mut info = self.info.write().unwrap();
            info.audiobitrate = 0;
            info.audiosamplerate = 0;
            info.channels = 0;
            info.bits_per_sample = 0;
            info.predicted_filesize = 0;
            info.encoded_filesize = 0;
            info.result = ResultCode::None;
            info.error = false;
            info.errno = 0;
            info.file_time = 0;
            info.file_size = 0;
        }
        self.buffer.clear()?;
        Ok(())
    }

    /// Vrai si un job de transcodage tient actuellement l'entrée
    pub fn decoding(&self) -> bool {
        self.decoding.load(Ordering::SeqCst)
    }

    /// Prend le rôle de décodeur
    ///
    /// Retourne vrai pour un seul appelant à la fois : celui qui doit
    /// lancer le job. Les autres se contentent d'attendre.
    pub fn begin_decoding(&self) -> bool {
        self.decoding
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn set_decoding(&self, value: bool) {
        self.decoding.store(value, Ordering::SeqCst);
    }

    /// Nombre d'ouvreurs courants
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::SeqCst)
    }

    /// Copie des métadonnées courantes
    pub fn info(&self) -> CacheInfo {
        self.info.read().unwrap().clone()
    }

    /// Modifie les métadonnées en mémoire
    pub fn update_info(&self, f: impl FnOnce(&mut CacheInfo)) {
        let mut info = self.info.write().unwrap();
        f(&mut info);
    }

    /// Écrit la ligne courante en base
    pub fn persist(&self) -> Result<()> {
        let info = self.info.read().unwrap().clone();
        self.db.upsert(&info)?;
        Ok(())
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn filename(&self) -> &str {
        &self.key.filename
    }

    pub fn desttype(&self) -> &str {
        &self.key.desttype
    }

    /// Chemin absolu du fichier source dans la bibliothèque
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Fichier cache du produit
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}
