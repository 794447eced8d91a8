//! Extension pour construire les paramètres du cache depuis pmoconfig
//!
//! Ce module fournit le trait [`TranscodeConfigExt`] qui étend
//! `pmoconfig::Config` avec l'assemblage des [`CacheParams`] depuis les
//! sections `library`, `transcode` et `cache` de la configuration.

use crate::cache::CacheParams;
use anyhow::{anyhow, Result};
use pmoaudio::TargetFormat;
use pmoconfig::Config;
use std::path::PathBuf;

/// Trait d'extension pour lire les paramètres du cache de transcodage
///
/// # Exemple
///
/// ```rust,no_run
/// use pmoconfig::get_config;
/// use pmocache::TranscodeConfigExt;
///
/// let params = get_config().cache_params().unwrap();
/// println!("cache dans {:?}", params.cache_dir);
/// ```
pub trait TranscodeConfigExt {
    /// Assemble les paramètres du cache depuis la configuration
    ///
    /// Les valeurs absentes prennent leurs défauts documentés. Un format
    /// de destination inconnu est une erreur.
    fn cache_params(&self) -> Result<CacheParams>;
}

impl TranscodeConfigExt for Config {
    fn cache_params(&self) -> Result<CacheParams> {
        let target = self.get_target_format()?;
        let target_format = TargetFormat::from_desttype(&target)
            .ok_or_else(|| anyhow!("unsupported target format: {}", target))?;

        Ok(CacheParams {
            cache_dir: PathBuf::from(self.get_cache_dir()?),
            library_root: PathBuf::from(self.get_library_root()?),
            target_format,
            bits_per_sample: self.get_bits_per_sample()? as u32,
            flac_compression: self.get_flac_compression()? as u32,
            recode_same: self.get_recode_same()?,
            cache_expiry: self.get_cache_expiry()? as u64,
            max_inactive_suspend: self.get_max_inactive_suspend()? as u64,
            max_inactive_abort: self.get_max_inactive_abort()? as u64,
            prebuffer_size: self.get_prebuffer_size()? as u64,
            max_cache_size: self.get_max_cache_size()? as u64,
            min_diskspace: self.get_min_diskspace()? as u64,
            disable_cache: self.get_disable_cache()?,
            cache_maintenance: self.get_cache_maintenance()? as u64,
            prune_cache_on_start: self.get_prune_cache_on_start()?,
            clear_cache_on_start: self.get_clear_cache_on_start()?,
            max_threads: self.get_max_threads()?,
        })
    }
}
