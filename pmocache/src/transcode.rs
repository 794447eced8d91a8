//! Orchestration du transcodage à la demande
//!
//! Un [`Transcoder`] relie une requête HTTP à l'entrée de cache de son
//! produit. La première requête sur un produit absent lance un job
//! asynchrone qui encode la source dans le fichier cache ; les suivantes
//! s'accrochent au même job et lisent derrière la ligne de flottaison.
//!
//! Le job ralentit sa vie au rythme des lecteurs : il se suspend quand
//! plus personne ne lit, reprend au premier accès et abandonne après une
//! inactivité prolongée. Le nombre de jobs simultanés est borné par un
//! sémaphore partagé du cache.

use crate::buffer::CloseFlags;
use crate::cache::{Cache, CacheParams};
use crate::db::{CacheInfo, ResultCode};
use crate::entry::CacheEntry;
use anyhow::{bail, Context, Result};
use pmoaudio::{
    predicted_size, AiffEncoder, AudioCodec, AudioError, AudioProbe, HeaderPatch, PcmReader,
    TargetFormat, WavEncoder,
};
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

/// Période de scrutation de la ligne de flottaison
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Pas de sommeil d'un job suspendu
const SUSPEND_SLEEP: Duration = Duration::from_secs(1);
/// Taille des blocs de copie et d'écriture
const COPY_CHUNK: usize = 64 * 1024;

/// Accès d'une requête à un produit transcodé
///
/// Tient une référence sur l'entrée de cache du produit du début à la fin
/// de la requête. À la destruction, la référence est rendue au cache ;
/// un job en cours continue seul et finira par se suspendre puis
/// s'abandonner si personne ne revient.
#[derive(Debug)]
pub struct Transcoder {
    cache: Arc<Cache>,
    entry: Option<Arc<CacheEntry>>,
}

impl Transcoder {
    /// Ouvre un produit, en lançant son transcodage si nécessaire
    ///
    /// Avec `begin`, un produit absent ou invalide déclenche un job et
    /// l'appel ne rend la main qu'une fois le prébuffer encodé (ou le
    /// produit terminé). Sans `begin`, seule la taille prédite est
    /// calculée : les requêtes de métadonnées ne lancent jamais de job.
    ///
    /// Un produit déjà complet est servi directement.
    pub async fn new(
        cache: Arc<Cache>,
        filename: &str,
        target: TargetFormat,
        begin: bool,
    ) -> Result<Self> {
        let source = cache.library_root().join(filename);
        std::fs::metadata(&source)
            .with_context(|| format!("cannot open source file {}", source.display()))?;

        let entry = cache.open_entry(filename, target.desttype()).await?;

        match Self::prepare(&cache, &entry, target, begin).await {
            Ok(()) => Ok(Transcoder {
                cache,
                entry: Some(entry),
            }),
            Err(err) => {
                // Démarrage raté : jeter le produit fautif
                let flags = if begin && entry.info().result == ResultCode::Error {
                    CloseFlags::Delete
                } else {
                    CloseFlags::Keep
                };
                let _ = cache.close_entry(&entry, flags).await;
                Err(err)
            }
        }
    }

    async fn prepare(
        cache: &Arc<Cache>,
        entry: &Arc<CacheEntry>,
        target: TargetFormat,
        begin: bool,
    ) -> Result<()> {
        if !entry.decoding() && (cache.params().disable_cache || entry.outdated()?) {
            tracing::debug!("Discarding stale cache product for {}", entry.key());
            entry.clear()?;
        }

        let info = entry.info();
        if entry.decoding() || info.result == ResultCode::Finished {
            if info.result == ResultCode::Finished {
                tracing::debug!("Cache hit for {}", entry.key());
            }
            return Ok(());
        }

        if begin {
            if info.result == ResultCode::Error {
                // L'échec précédent a été constaté, on repart de zéro
                tracing::info!(
                    "Retrying failed transcoding for {} (errno {})",
                    entry.key(),
                    info.errno
                );
                entry.clear()?;
            }
            if entry.begin_decoding() {
                tokio::spawn(transcode_job(
                    cache.clone(),
                    entry.filename().to_string(),
                    target,
                ));
            }
            Self::wait_prebuffer(cache, entry).await?;
        } else {
            Self::predict_only(cache, entry, target).await?;
        }
        Ok(())
    }

    /// Remplit la taille prédite sans lancer de job
    async fn predict_only(
        cache: &Arc<Cache>,
        entry: &Arc<CacheEntry>,
        target: TargetFormat,
    ) -> Result<()> {
        let source = entry.source_path().to_path_buf();
        let probe = {
            let path = source.clone();
            tokio::task::spawn_blocking(move || pmoaudio::probe(&path)).await??
        };

        let meta = std::fs::metadata(&source)?;
        let mtime = source_mtime(&meta)?;
        let params = cache.params();
        let predicted = predicted_size(&probe, target, params.bits_per_sample, params.recode_same);

        let bits_per_sample = params.bits_per_sample;
        entry.update_info(|info| {
            info.audiobitrate = probe.bit_rate;
            info.audiosamplerate = probe.sample_rate;
            info.channels = probe.channels as u32;
            info.bits_per_sample = bits_per_sample;
            info.predicted_filesize = predicted;
            info.file_time = mtime;
            info.file_size = meta.len();
        });
        entry.persist()?;
        Ok(())
    }

    /// Attend que le job signale sa disponibilité
    ///
    /// Le job est prêt quand la ligne de flottaison atteint le prébuffer
    /// configuré ou que le produit est terminé. Un échec de démarrage
    /// remonte l'erreur système enregistrée par le job.
    async fn wait_prebuffer(cache: &Arc<Cache>, entry: &Arc<CacheEntry>) -> Result<()> {
        let prebuffer = cache.params().prebuffer_size;
        loop {
            let info = entry.info();
            if info.result == ResultCode::Error {
                return Err(errno_error(&info))
                    .with_context(|| format!("transcoding of {} failed to start", entry.key()));
            }
            if info.result == ResultCode::Finished || entry.buffer().watermark() >= prebuffer {
                return Ok(());
            }
            if !entry.decoding() {
                bail!("transcoding of {} stopped unexpectedly", entry.key());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Attend que les octets `[offset, offset + len)` soient disponibles
    ///
    /// Rend la main quand la ligne de flottaison couvre l'intervalle, que
    /// le produit est terminé (lecture courte en fin de flux) ou que le
    /// job a échoué (l'erreur enregistrée est propagée).
    pub async fn transcode_until(&self, offset: u64, len: usize) -> Result<()> {
        let entry = self.entry();
        let target = offset + len as u64;
        loop {
            let info = entry.info();
            if info.result == ResultCode::Error {
                return Err(errno_error(&info))
                    .with_context(|| format!("transcoding of {} failed", entry.key()));
            }

            let watermark = entry.buffer().watermark();
            if watermark >= target {
                tracing::trace!(
                    "Cache hit: {} bytes available for {}",
                    watermark,
                    entry.key()
                );
                return Ok(());
            }
            if info.result == ResultCode::Finished {
                // Fin de flux, la lecture sera courte
                return Ok(());
            }
            if !entry.decoding() {
                bail!(
                    "transcoding of {} stopped before offset {}",
                    entry.key(),
                    target
                );
            }

            tracing::trace!("Cache miss: waiting for {} bytes of {}", target, entry.key());
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Lit des octets du produit, en attendant le job si besoin
    ///
    /// Rafraîchit la date d'accès puis lit au plus `buf.len()` octets à
    /// partir de `offset`. Retourne 0 en fin de produit.
    pub async fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let entry = self.entry();
        entry.update_access(false)?;

        if buf.is_empty() {
            return Ok(0);
        }
        self.transcode_until(offset, buf.len()).await?;

        let watermark = entry.buffer().watermark();
        if offset >= watermark {
            return Ok(0);
        }
        let len = buf.len().min((watermark - offset) as usize);
        let n = entry.buffer().copy(&mut buf[..len], offset)?;
        Ok(n)
    }

    /// Entrée de cache du produit
    pub fn entry(&self) -> &Arc<CacheEntry> {
        self.entry.as_ref().expect("transcoder entry already taken")
    }

    /// Taille annonçable du produit
    pub fn size(&self) -> u64 {
        self.entry().size()
    }

    /// Copie des métadonnées courantes
    pub fn info(&self) -> CacheInfo {
        self.entry().info()
    }

    /// Vrai si le produit est entièrement encodé
    pub fn is_finished(&self) -> bool {
        self.entry().info().result == ResultCode::Finished
    }

    /// Rend l'entrée au cache
    pub async fn close(mut self, flags: CloseFlags) -> Result<bool> {
        match self.entry.take() {
            Some(entry) => self.cache.close_entry(&entry, flags).await,
            None => Ok(true),
        }
    }
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            let cache = self.cache.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = cache.close_entry(&entry, CloseFlags::Keep).await;
                    });
                }
                Err(_) => {
                    tracing::warn!("Transcoder for {} dropped outside the runtime", entry.key());
                }
            }
        }
    }
}

/// Reconstruit l'erreur système enregistrée dans une ligne en échec
fn errno_error(info: &CacheInfo) -> io::Error {
    if info.errno != 0 {
        io::Error::from_raw_os_error(info.errno)
    } else {
        io::Error::other("transcoding failed")
    }
}

/// Date de modification d'un fichier en secondes epoch
fn source_mtime(meta: &std::fs::Metadata) -> io::Result<i64> {
    Ok(meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}

/// Code d'erreur système d'un échec de transcodage
fn error_to_errno(err: &anyhow::Error) -> i32 {
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        if let Some(errno) = io_err.raw_os_error() {
            return errno;
        }
        if io_err.kind() == io::ErrorKind::TimedOut {
            return libc::ETIMEDOUT;
        }
        return libc::EIO;
    }
    if let Some(audio_err) = err.downcast_ref::<AudioError>() {
        let errno = audio_err.os_error();
        if errno != 0 {
            return errno;
        }
    }
    libc::EIO
}

/// Job de transcodage d'un produit
///
/// Tient sa propre référence sur l'entrée pendant toute la durée de
/// l'encodage. En sortie, réussite ou échec, le job rend sa référence et
/// relâche le drapeau de décodage.
async fn transcode_job(cache: Arc<Cache>, filename: String, target: TargetFormat) {
    let entry = match cache.open_entry(&filename, target.desttype()).await {
        Ok(entry) => entry,
        Err(err) => {
            tracing::error!(
                "Transcoder job cannot open cache entry for {} ({}): {}",
                filename,
                target.desttype(),
                err
            );
            if let Some(entry) = cache.get_entry(&filename, target.desttype()).await {
                entry.update_info(|info| {
                    info.result = ResultCode::Error;
                    info.error = true;
                    info.errno = libc::EIO;
                });
                let _ = entry.persist();
                entry.set_decoding(false);
            }
            return;
        }
    };

    let _permit = match cache.transcode_jobs.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            // Sémaphore fermé : le serveur s'arrête
            entry.set_decoding(false);
            let _ = cache.close_entry(&entry, CloseFlags::Keep).await;
            return;
        }
    };

    tracing::info!("Transcoding started for {}", entry.key());

    let mut flags = CloseFlags::Keep;
    if let Err(err) = run_transcode(&cache, &entry, target).await {
        let errno = error_to_errno(&err);
        if errno == libc::ETIMEDOUT {
            tracing::warn!(
                "Transcoding aborted for {}: no access within {} seconds",
                entry.key(),
                cache.params().max_inactive_abort
            );
            flags = CloseFlags::Delete;
        } else {
            tracing::error!("Transcoding failed for {}: {:#}", entry.key(), err);
        }
        entry.update_info(|info| {
            info.result = ResultCode::Error;
            info.error = true;
            info.errno = errno;
        });
        if let Err(err) = entry.persist() {
            tracing::error!("Cannot persist cache entry for {}: {}", entry.key(), err);
        }
    }

    entry.set_decoding(false);
    if let Err(err) = cache.close_entry(&entry, flags).await {
        tracing::error!("Cannot close cache entry for {}: {}", entry.key(), err);
    }
}

/// Corps du job : sonde, prédit, fait de la place, encode, finalise
async fn run_transcode(
    cache: &Arc<Cache>,
    entry: &Arc<CacheEntry>,
    target: TargetFormat,
) -> Result<()> {
    let source = entry.source_path().to_path_buf();

    let probe = {
        let path = source.clone();
        tokio::task::spawn_blocking(move || pmoaudio::probe(&path)).await??
    };

    let meta = std::fs::metadata(&source)?;
    let mtime = source_mtime(&meta)?;
    let params = cache.params().clone();
    let predicted = predicted_size(&probe, target, params.bits_per_sample, params.recode_same);

    let bits_per_sample = params.bits_per_sample;
    entry.update_info(|info| {
        info.audiobitrate = probe.bit_rate;
        info.audiosamplerate = probe.sample_rate;
        info.channels = probe.channels as u32;
        info.bits_per_sample = bits_per_sample;
        info.predicted_filesize = predicted;
        info.encoded_filesize = 0;
        info.result = ResultCode::Incomplete;
        info.error = false;
        info.errno = 0;
        info.file_time = mtime;
        info.file_size = meta.len();
    });
    entry.persist()?;

    // Faire de la place avant d'encoder
    cache.maintenance(predicted).await;

    let encode_entry = entry.clone();
    tokio::task::spawn_blocking(move || {
        encode_product(&encode_entry, &source, &probe, target, &params)
    })
    .await??;

    finish_product(entry)
}

/// Encodeur PCM conteneurisé, WAV ou AIFF
enum PcmEncoder {
    Wav(WavEncoder),
    Aiff(AiffEncoder),
}

impl PcmEncoder {
    fn header(&self, estimated_frames: u64, bytes_per_frame: u64) -> Vec<u8> {
        match self {
            PcmEncoder::Wav(enc) => enc.header(estimated_frames * bytes_per_frame),
            PcmEncoder::Aiff(enc) => enc.header(estimated_frames),
        }
    }

    fn encode_block(&mut self, samples: &[i32]) -> Vec<u8> {
        match self {
            PcmEncoder::Wav(enc) => enc.encode_block(samples),
            PcmEncoder::Aiff(enc) => enc.encode_block(samples),
        }
    }

    fn finalize(&self) -> Vec<HeaderPatch> {
        match self {
            PcmEncoder::Wav(enc) => enc.finalize(),
            PcmEncoder::Aiff(enc) => enc.finalize(),
        }
    }
}

/// Encode la source dans le fichier cache (thread bloquant)
fn encode_product(
    entry: &Arc<CacheEntry>,
    source: &Path,
    probe: &AudioProbe,
    target: TargetFormat,
    params: &CacheParams,
) -> Result<()> {
    match target {
        TargetFormat::Flac if probe.codec == AudioCodec::Flac && !params.recode_same => {
            copy_source(entry, source)
        }
        TargetFormat::Flac => {
            let mut reader = PcmReader::open(source)?;
            let spec = reader.spec();

            // flacenc encode un flux complet, pas bloc par bloc : tout
            // décoder d'abord, écrire le résultat en tranches ensuite
            let mut samples: Vec<i32> = Vec::new();
            while let Some(block) = reader.next_block()? {
                control_checks(entry)?;
                samples.extend_from_slice(&block);
            }

            let encoded = pmoaudio::encode_flac(
                &samples,
                spec.channels,
                params.bits_per_sample as usize,
                spec.sample_rate as usize,
            )?;
            for chunk in encoded.chunks(COPY_CHUNK) {
                control_checks(entry)?;
                entry.buffer().write(chunk)?;
            }
            Ok(())
        }
        TargetFormat::Wav | TargetFormat::Aiff => {
            let mut reader = PcmReader::open(source)?;
            let spec = reader.spec();
            let bits = params.bits_per_sample as u16;

            let mut encoder = match target {
                TargetFormat::Wav => {
                    PcmEncoder::Wav(WavEncoder::new(spec.sample_rate, spec.channels as u16, bits))
                }
                _ => {
                    PcmEncoder::Aiff(AiffEncoder::new(spec.sample_rate, spec.channels as u16, bits))
                }
            };

            let frames = reader
                .total_frames()
                .unwrap_or_else(|| (probe.duration_secs * spec.sample_rate as f64).round() as u64);
            let bytes_per_frame = spec.channels as u64 * (bits as u64 / 8);
            entry.buffer().write(&encoder.header(frames, bytes_per_frame))?;

            while let Some(block) = reader.next_block()? {
                control_checks(entry)?;
                let bytes = encoder.encode_block(&block);
                entry.buffer().write(&bytes)?;
            }

            // Tailles réelles dans l'en-tête, sans reculer la ligne de
            // flottaison
            for patch in encoder.finalize() {
                entry.buffer().write_at(patch.offset, &patch.bytes)?;
            }
            Ok(())
        }
    }
}

/// Copie une source déjà au format cible, sans retranscodage
fn copy_source(entry: &Arc<CacheEntry>, source: &Path) -> Result<()> {
    let mut input = std::fs::File::open(source)?;
    let mut chunk = vec![0u8; COPY_CHUNK];
    loop {
        control_checks(entry)?;
        let n = input.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        entry.buffer().write(&chunk[..n])?;
    }
    Ok(())
}

/// Points de contrôle entre deux blocs encodés
///
/// Rafraîchit la date d'accès tant que d'autres ouvreurs existent, puis
/// applique les délais d'inactivité : suspension par pas d'une seconde,
/// abandon en `ETIMEDOUT` une fois le délai maximal écoulé.
fn control_checks(entry: &Arc<CacheEntry>) -> io::Result<()> {
    if entry.ref_count() > 1 {
        let _ = entry.update_access(false);
    }

    if entry.decode_timeout() {
        return Err(io::Error::from_raw_os_error(libc::ETIMEDOUT));
    }

    if entry.suspend_timeout() {
        tracing::debug!("Suspending transcoding of {}", entry.key());
        while entry.suspend_timeout() {
            if entry.decode_timeout() {
                return Err(io::Error::from_raw_os_error(libc::ETIMEDOUT));
            }
            std::thread::sleep(SUSPEND_SLEEP);
        }
        tracing::debug!("Resuming transcoding of {}", entry.key());
    }
    Ok(())
}

/// Clôt un produit entièrement encodé
fn finish_product(entry: &Arc<CacheEntry>) -> Result<()> {
    let encoded = entry.buffer().watermark();
    entry.buffer().shrink()?;

    let predicted = entry.info().predicted_filesize;
    entry.update_info(|info| {
        info.encoded_filesize = encoded;
        info.result = ResultCode::Finished;
        info.error = false;
        info.errno = 0;
    });
    entry.persist()?;

    tracing::info!(
        "Transcoding finished for {}: {} bytes encoded, {} bytes predicted",
        entry.key(),
        encoded,
        predicted
    );
    Ok(())
}
