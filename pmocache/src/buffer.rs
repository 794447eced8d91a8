//! Fichier cache d'un produit transcodé
//!
//! Un [`Buffer`] matérialise un produit sur disque pendant et après son
//! transcodage. La ligne de flottaison (watermark) sépare les octets déjà
//! encodés du reste du fichier : les lectures s'arrêtent dessus, les
//! écritures la font avancer. Le fichier peut être pré-alloué au-delà par
//! l'encodeur (en-tête estimé), la fermeture le ramène exactement à la
//! ligne de flottaison.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Comportement à la fermeture d'un buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseFlags {
    /// Conserve le fichier sur disque
    Keep,
    /// Supprime le fichier sur disque
    Delete,
}

/// Chemin du fichier cache d'un produit
///
/// Le fichier vit sous `<cache_dir>/<filename>.cache.<desttype>`, en
/// reproduisant l'arborescence de la bibliothèque sous le répertoire du
/// cache.
pub fn cachefile_path(cache_dir: &Path, filename: &str, desttype: &str) -> PathBuf {
    let relative = filename.trim_start_matches('/');
    cache_dir.join(format!("{}.cache.{}", relative, desttype))
}

/// Fichier cache avec ligne de flottaison
///
/// Le descripteur d'écriture est partagé derrière un mutex, les lectures
/// ouvrent leur propre descripteur et peuvent donc avoir lieu pendant
/// qu'un job écrit.
#[derive(Debug)]
pub struct Buffer {
    path: PathBuf,
    writer: Mutex<Option<File>>,
    watermark: AtomicU64,
}

impl Buffer {
    /// Crée un buffer sans toucher au disque
    pub fn new(path: PathBuf) -> Self {
        Buffer {
            path,
            writer: Mutex::new(None),
            watermark: AtomicU64::new(0),
        }
    }

    /// Ouvre le fichier cache en écriture
    ///
    /// Crée l'arborescence parente si nécessaire. Avec `erase`, le fichier
    /// est tronqué et la ligne de flottaison remise à zéro ; sinon un
    /// fichier existant est adopté tel quel, sa taille devenant la ligne
    /// de flottaison.
    pub fn open(&self, erase: bool) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        if erase {
            file.set_len(0)?;
            self.watermark.store(0, Ordering::SeqCst);
        } else {
            let len = file.metadata()?.len();
            self.watermark.store(len, Ordering::SeqCst);
        }

        *self.writer.lock().unwrap() = Some(file);
        Ok(())
    }

    /// Vrai si le descripteur d'écriture est ouvert
    pub fn is_open(&self) -> bool {
        self.writer.lock().unwrap().is_some()
    }

    /// Ajoute des octets à la ligne de flottaison et la fait avancer
    pub fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut guard = self.writer.lock().unwrap();
        let file = guard.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "cache file is not open")
        })?;

        let watermark = self.watermark.load(Ordering::SeqCst);
        file.seek(SeekFrom::Start(watermark))?;
        file.write_all(data)?;
        self.watermark
            .store(watermark + data.len() as u64, Ordering::SeqCst);
        Ok(data.len())
    }

    /// Réécrit des octets à une position arbitraire
    ///
    /// Sert aux patchs d'en-tête en fin d'encodage. La ligne de flottaison
    /// ne recule jamais : elle n'avance que si le patch dépasse sa position
    /// courante.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().unwrap();
        let file = guard.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "cache file is not open")
        })?;

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        self.watermark
            .fetch_max(offset + data.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    /// Copie des octets du fichier cache dans `buf`
    ///
    /// La lecture s'arrête à la ligne de flottaison : le nombre d'octets
    /// copiés peut être inférieur à la taille de `buf`, et vaut 0 si
    /// `offset` est au-delà. Chaque appel ouvre son propre descripteur,
    /// aucune exclusivité avec l'écrivain.
    pub fn copy(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let watermark = self.watermark.load(Ordering::SeqCst);
        if offset >= watermark {
            return Ok(0);
        }

        let available = (watermark - offset) as usize;
        let n = buf.len().min(available);

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf[..n])?;
        Ok(n)
    }

    /// Position courante de la ligne de flottaison
    ///
    /// Lisible à tout moment, descripteur ouvert ou non.
    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::SeqCst)
    }

    /// Tronque le fichier à la ligne de flottaison
    ///
    /// Élimine l'espace pré-alloué au-delà des octets réellement encodés.
    pub fn shrink(&self) -> io::Result<()> {
        let guard = self.writer.lock().unwrap();
        if let Some(file) = guard.as_ref() {
            file.set_len(self.watermark.load(Ordering::SeqCst))?;
        }
        Ok(())
    }

    /// Ferme le fichier cache
    ///
    /// Vide les tampons et tronque le fichier à la ligne de flottaison,
    /// puis le supprime si `flags` le demande. La suppression opère même
    /// si le buffer n'a jamais été ouvert.
    pub fn close(&self, flags: CloseFlags) -> io::Result<()> {
        let mut guard = self.writer.lock().unwrap();
        if let Some(mut file) = guard.take() {
            file.flush()?;
            file.set_len(self.watermark.load(Ordering::SeqCst))?;
        }
        drop(guard);

        if flags == CloseFlags::Delete {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != io::ErrorKind::NotFound {
                    return Err(err);
                }
            }
            self.watermark.store(0, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Remet le buffer à zéro
    ///
    /// La ligne de flottaison revient à 0 et le fichier est tronqué, qu'il
    /// soit ouvert ou non. Sans effet sur le disque si le fichier n'existe
    /// pas encore.
    pub fn clear(&self) -> io::Result<()> {
        self.watermark.store(0, Ordering::SeqCst);

        let guard = self.writer.lock().unwrap();
        match guard.as_ref() {
            Some(file) => file.set_len(0)?,
            None => {
                if self.path.exists() {
                    OpenOptions::new()
                        .write(true)
                        .truncate(true)
                        .open(&self.path)?;
                }
            }
        }
        Ok(())
    }

    /// Chemin du fichier cache sur disque
    pub fn path(&self) -> &Path {
        &self.path
    }
}
