//! Module de gestion de la base de données SQLite pour le cache
//!
//! Ce module stocke les métadonnées des produits transcodés : paramètres
//! d'encodage, tailles prédites et réelles, horodatages de création et
//! d'accès. La table est indexée par (filename, desttype) et versionnée
//! pour permettre les migrations de schéma.

use anyhow::bail;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Nom de la table des produits transcodés
const TABLE_NAME: &str = "cache_entry";

/// Version majeure du schéma. Une base portant une version majeure plus
/// récente est refusée à l'ouverture.
pub const DB_VERSION_MAJOR: i64 = 1;
/// Version mineure du schéma, mise à jour silencieusement.
pub const DB_VERSION_MINOR: i64 = 0;

/// Délai d'attente sur verrou SQLite avant erreur `SQLITE_BUSY`
const BUSY_TIMEOUT: Duration = Duration::from_millis(1000);

/// État d'avancement d'un produit transcodé
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum ResultCode {
    /// Aucun transcodage effectué
    #[default]
    None,
    /// Transcodage démarré mais pas terminé
    Incomplete,
    /// Transcodage terminé avec succès
    Finished,
    /// Transcodage échoué
    Error,
}

impl ResultCode {
    /// Représentation stockée en base
    pub fn as_i64(self) -> i64 {
        match self {
            ResultCode::None => 0,
            ResultCode::Incomplete => 1,
            ResultCode::Finished => 2,
            ResultCode::Error => 3,
        }
    }

    /// Relit la valeur stockée. Une valeur inconnue (base corrompue ou
    /// version future) est ramenée à `None`, ce qui force un nouveau
    /// transcodage au prochain accès.
    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => ResultCode::Incomplete,
            2 => ResultCode::Finished,
            3 => ResultCode::Error,
            _ => ResultCode::None,
        }
    }
}

/// Métadonnées d'un produit transcodé
///
/// Une ligne par couple (fichier source, format de destination). Les
/// horodatages sont des epochs Unix en secondes.
#[derive(Debug, Serialize, Clone)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CacheInfo {
    /// Chemin du fichier source, relatif à la racine de la bibliothèque
    #[cfg_attr(feature = "openapi", schema(example = "albums/wall/track01.flac"))]
    pub filename: String,
    /// Format de destination (ex: `"wav"`, `"flac"`, `"aiff"`)
    #[cfg_attr(feature = "openapi", schema(example = "wav"))]
    pub desttype: String,
    /// Débit moyen de la source en bits/s, relevé au transcodage
    #[cfg_attr(feature = "openapi", schema(example = 1411200))]
    pub audiobitrate: u32,
    /// Fréquence d'échantillonnage en Hz
    #[cfg_attr(feature = "openapi", schema(example = 44100))]
    pub audiosamplerate: u32,
    /// Nombre de canaux
    #[cfg_attr(feature = "openapi", schema(example = 2))]
    pub channels: u32,
    /// Résolution de sortie en bits par échantillon
    #[cfg_attr(feature = "openapi", schema(example = 16))]
    pub bits_per_sample: u32,
    /// Taille prédite du produit en octets
    #[cfg_attr(feature = "openapi", schema(example = 31415926))]
    pub predicted_filesize: u64,
    /// Taille réelle du produit, connue une fois le transcodage terminé
    #[cfg_attr(feature = "openapi", schema(example = 31415000))]
    pub encoded_filesize: u64,
    /// État d'avancement du transcodage
    pub result: ResultCode,
    /// Vrai si le dernier transcodage a échoué
    pub error: bool,
    /// Code d'erreur système du dernier échec, 0 sinon
    pub errno: i32,
    /// Date de création de l'entrée (epoch)
    #[cfg_attr(feature = "openapi", schema(example = 1735689600))]
    pub creation_time: i64,
    /// Date du dernier accès (epoch)
    #[cfg_attr(feature = "openapi", schema(example = 1735693200))]
    pub access_time: i64,
    /// Date de modification du fichier source au moment du transcodage (epoch)
    #[cfg_attr(feature = "openapi", schema(example = 1704067200))]
    pub file_time: i64,
    /// Taille du fichier source au moment du transcodage
    #[cfg_attr(feature = "openapi", schema(example = 52428800))]
    pub file_size: u64,
}

impl CacheInfo {
    /// Crée une entrée vierge pour un couple (source, format)
    ///
    /// Les dates de création et d'accès sont initialisées à maintenant,
    /// tous les autres champs à zéro.
    pub fn new(filename: &str, desttype: &str) -> Self {
        let now = Utc::now().timestamp();
        CacheInfo {
            filename: filename.to_string(),
            desttype: desttype.to_string(),
            audiobitrate: 0,
            audiosamplerate: 0,
            channels: 0,
            bits_per_sample: 0,
            predicted_filesize: 0,
            encoded_filesize: 0,
            result: ResultCode::None,
            error: false,
            errno: 0,
            creation_time: now,
            access_time: now,
            file_time: 0,
            file_size: 0,
        }
    }
}

/// Base de données SQLite du cache de transcodage
///
/// Toutes les opérations passent par une connexion unique protégée par un
/// mutex. La base est ouverte en mode WAL avec un busy timeout, ce qui
/// permet les lectures concurrentes pendant qu'un job écrit.
#[derive(Debug)]
pub struct CacheDb {
    conn: Mutex<Connection>,
}

impl CacheDb {
    /// Ouvre (ou crée) la base de données du cache
    ///
    /// Crée la table des produits et son index LRU si nécessaire, puis
    /// vérifie la version du schéma : une version majeure plus récente que
    /// celle supportée est refusée, une version plus ancienne est mise à
    /// jour en place.
    ///
    /// # Arguments
    ///
    /// * `path` - Chemin vers le fichier SQLite
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use pmocache::db::CacheDb;
    /// use std::path::Path;
    ///
    /// let db = CacheDb::open(Path::new("cache.sqlite")).unwrap();
    /// ```
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;

        // WAL renvoie le nouveau mode sous forme de ligne
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let create_table_sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                filename           TEXT NOT NULL,
                desttype           CHAR(10) NOT NULL,
                audiobitrate       INT NOT NULL DEFAULT 0,
                audiosamplerate    INT NOT NULL DEFAULT 0,
                channels           INT NOT NULL DEFAULT 0,
                bits_per_sample    INT NOT NULL DEFAULT 0,
                predicted_filesize UNSIGNED BIG INT NOT NULL DEFAULT 0,
                encoded_filesize   UNSIGNED BIG INT NOT NULL DEFAULT 0,
                result             INT NOT NULL DEFAULT 0,
                error              BOOLEAN NOT NULL DEFAULT 0,
                errno              INT NOT NULL DEFAULT 0,
                creation_time      DATETIME NOT NULL DEFAULT 0,
                access_time        DATETIME NOT NULL DEFAULT 0,
                file_time          DATETIME NOT NULL DEFAULT 0,
                file_size          UNSIGNED BIG INT NOT NULL DEFAULT 0,
                PRIMARY KEY (filename, desttype)
            )",
            TABLE_NAME
        );
        conn.execute(&create_table_sql, [])?;

        let create_index_sql = format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_lru ON {} (access_time ASC)",
            TABLE_NAME, TABLE_NAME
        );
        conn.execute(&create_index_sql, [])?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS version (
                major INTEGER NOT NULL,
                minor INTEGER NOT NULL
            )",
            [],
        )?;

        let version: Option<(i64, i64)> = conn
            .query_row("SELECT major, minor FROM version LIMIT 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO version (major, minor) VALUES (?1, ?2)",
                    params![DB_VERSION_MAJOR, DB_VERSION_MINOR],
                )?;
            }
            Some((major, minor)) => {
                if major > DB_VERSION_MAJOR {
                    bail!(
                        "cache database version {}.{} is newer than supported version {}.{}",
                        major,
                        minor,
                        DB_VERSION_MAJOR,
                        DB_VERSION_MINOR
                    );
                }
                if major < DB_VERSION_MAJOR || minor < DB_VERSION_MINOR {
                    tracing::info!(
                        "Upgrading cache database from version {}.{} to {}.{}",
                        major,
                        minor,
                        DB_VERSION_MAJOR,
                        DB_VERSION_MINOR
                    );
                    conn.execute(
                        "UPDATE version SET major = ?1, minor = ?2",
                        params![DB_VERSION_MAJOR, DB_VERSION_MINOR],
                    )?;
                }
            }
        }

        Ok(CacheDb {
            conn: Mutex::new(conn),
        })
    }

    /// Reconstruit un [`CacheInfo`] depuis une ligne SQL
    fn row_to_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheInfo> {
        Ok(CacheInfo {
            filename: row.get(0)?,
            desttype: row.get(1)?,
            audiobitrate: row.get::<_, i64>(2)? as u32,
            audiosamplerate: row.get::<_, i64>(3)? as u32,
            channels: row.get::<_, i64>(4)? as u32,
            bits_per_sample: row.get::<_, i64>(5)? as u32,
            predicted_filesize: row.get::<_, i64>(6)? as u64,
            encoded_filesize: row.get::<_, i64>(7)? as u64,
            result: ResultCode::from_i64(row.get(8)?),
            error: row.get(9)?,
            errno: row.get(10)?,
            creation_time: row.get(11)?,
            access_time: row.get(12)?,
            file_time: row.get(13)?,
            file_size: row.get::<_, i64>(14)? as u64,
        })
    }

    /// Récupère l'entrée d'un couple (source, format)
    ///
    /// Retourne `Ok(None)` si l'entrée n'existe pas.
    pub fn get(&self, filename: &str, desttype: &str) -> rusqlite::Result<Option<CacheInfo>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT filename, desttype, audiobitrate, audiosamplerate, channels,
                    bits_per_sample, predicted_filesize, encoded_filesize, result,
                    error, errno, creation_time, access_time, file_time, file_size
             FROM {} WHERE filename = ?1 AND desttype = ?2",
            TABLE_NAME
        );
        conn.query_row(&sql, params![filename, desttype], Self::row_to_info)
            .optional()
    }

    /// Insère ou remplace une entrée
    ///
    /// La clé primaire (filename, desttype) garantit l'unicité : un upsert
    /// sur une entrée existante la remplace entièrement.
    pub fn upsert(&self, info: &CacheInfo) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "INSERT OR REPLACE INTO {} (
                filename, desttype, audiobitrate, audiosamplerate, channels,
                bits_per_sample, predicted_filesize, encoded_filesize, result,
                error, errno, creation_time, access_time, file_time, file_size
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            TABLE_NAME
        );
        conn.execute(
            &sql,
            params![
                info.filename,
                info.desttype,
                info.audiobitrate,
                info.audiosamplerate,
                info.channels,
                info.bits_per_sample,
                info.predicted_filesize as i64,
                info.encoded_filesize as i64,
                info.result.as_i64(),
                info.error,
                info.errno,
                info.creation_time,
                info.access_time,
                info.file_time,
                info.file_size as i64,
            ],
        )?;
        Ok(())
    }

    /// Supprime une entrée. Sans effet si elle n'existe pas.
    pub fn delete(&self, filename: &str, desttype: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "DELETE FROM {} WHERE filename = ?1 AND desttype = ?2",
            TABLE_NAME
        );
        conn.execute(&sql, params![filename, desttype])?;
        Ok(())
    }

    /// Liste toutes les entrées, triées par clé
    pub fn get_all(&self) -> rusqlite::Result<Vec<CacheInfo>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT filename, desttype, audiobitrate, audiosamplerate, channels,
                    bits_per_sample, predicted_filesize, encoded_filesize, result,
                    error, errno, creation_time, access_time, file_time, file_size
             FROM {} ORDER BY filename, desttype",
            TABLE_NAME
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_info)?;
        rows.collect()
    }

    /// Nombre total d'entrées
    pub fn count(&self) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT COUNT(*) FROM {}", TABLE_NAME);
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Somme des tailles encodées de tous les produits
    pub fn total_encoded_size(&self) -> rusqlite::Result<u64> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT COALESCE(SUM(encoded_filesize), 0) FROM {}", TABLE_NAME);
        let total: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(total as u64)
    }

    /// Retourne les entrées les moins récemment utilisées
    ///
    /// Les entrées sont triées par date d'accès croissante, la plus
    /// ancienne en premier.
    pub fn get_oldest(&self, limit: usize) -> rusqlite::Result<Vec<CacheInfo>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT filename, desttype, audiobitrate, audiosamplerate, channels,
                    bits_per_sample, predicted_filesize, encoded_filesize, result,
                    error, errno, creation_time, access_time, file_time, file_size
             FROM {} ORDER BY access_time ASC LIMIT ?1",
            TABLE_NAME
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_info)?;
        rows.collect()
    }

    /// Retourne les entrées dont le dernier accès est antérieur ou égal au
    /// seuil donné, la plus ancienne en premier
    pub fn get_expired(&self, cutoff: i64) -> rusqlite::Result<Vec<CacheInfo>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT filename, desttype, audiobitrate, audiosamplerate, channels,
                    bits_per_sample, predicted_filesize, encoded_filesize, result,
                    error, errno, creation_time, access_time, file_time, file_size
             FROM {} WHERE access_time <= ?1 ORDER BY access_time ASC",
            TABLE_NAME
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cutoff], Self::row_to_info)?;
        rows.collect()
    }

    /// Démarre une transaction explicite
    ///
    /// Utilisé par les purges pour grouper les suppressions. La connexion
    /// étant partagée, la transaction couvre toutes les écritures jusqu'au
    /// commit ou rollback.
    pub fn begin_transaction(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("BEGIN TRANSACTION")
    }

    /// Valide la transaction en cours
    pub fn commit_transaction(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("COMMIT")
    }

    /// Annule la transaction en cours
    pub fn rollback_transaction(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("ROLLBACK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_round_trip() {
        for code in [
            ResultCode::None,
            ResultCode::Incomplete,
            ResultCode::Finished,
            ResultCode::Error,
        ] {
            assert_eq!(ResultCode::from_i64(code.as_i64()), code);
        }
    }

    #[test]
    fn test_result_code_corrompu() {
        // Une valeur inconnue force le retranscodage
        assert_eq!(ResultCode::from_i64(42), ResultCode::None);
        assert_eq!(ResultCode::from_i64(-1), ResultCode::None);
    }

    #[test]
    fn test_version_plus_recente_refusee() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("cache.sqlite");

        {
            let db = CacheDb::open(&db_path).unwrap();
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "UPDATE version SET major = ?1, minor = 0",
                params![DB_VERSION_MAJOR + 1],
            )
            .unwrap();
        }

        let result = CacheDb::open(&db_path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("newer"));
    }

    #[test]
    fn test_version_ancienne_mise_a_jour() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("cache.sqlite");

        {
            let db = CacheDb::open(&db_path).unwrap();
            let conn = db.conn.lock().unwrap();
            conn.execute("UPDATE version SET major = 0, minor = 9", [])
                .unwrap();
        }

        let db = CacheDb::open(&db_path).unwrap();
        let conn = db.conn.lock().unwrap();
        let (major, minor): (i64, i64) = conn
            .query_row("SELECT major, minor FROM version", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!((major, minor), (DB_VERSION_MAJOR, DB_VERSION_MINOR));
    }
}
