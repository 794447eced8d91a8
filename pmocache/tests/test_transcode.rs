use pmoaudio::{encode_flac, TargetFormat, WavEncoder};
use pmocache::buffer::CloseFlags;
use pmocache::cache::{Cache, CacheParams};
use pmocache::db::{CacheInfo, ResultCode};
use pmocache::transcode::Transcoder;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tempfile::TempDir;

/// Paramètres pointant dans un répertoire temporaire, sans maintenance
fn test_params(temp_dir: &TempDir) -> CacheParams {
    CacheParams {
        cache_dir: temp_dir.path().join("cache"),
        library_root: temp_dir.path().join("library"),
        cache_maintenance: 0,
        prebuffer_size: 1024,
        ..CacheParams::default()
    }
}

async fn create_test_cache(params: CacheParams) -> Arc<Cache> {
    std::fs::create_dir_all(&params.library_root).unwrap();
    Cache::new(params).await.unwrap()
}

/// Écrit une source WAV stéréo 16 bits de `frames` trames
fn write_wav(path: &Path, frames: usize) {
    let mut encoder = WavEncoder::new(44_100, 2, 16);
    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let value = ((i % 200) as i32) - 100;
        samples.push(value);
        samples.push(-value);
    }
    let data = encoder.encode_block(&samples);
    let mut bytes = encoder.header(data.len() as u64);
    bytes.extend_from_slice(&data);
    for patch in encoder.finalize() {
        let offset = patch.offset as usize;
        bytes[offset..offset + patch.bytes.len()].copy_from_slice(&patch.bytes);
    }
    std::fs::write(path, bytes).unwrap();
}

/// Lit le produit en entier, au fil de l'encodage
async fn read_all(transcoder: &Transcoder) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        let n = transcoder
            .read(out.len() as u64, &mut buf)
            .await
            .unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[tokio::test]
async fn test_transcodage_wav_vers_flac() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;
    write_wav(&temp_dir.path().join("library/track.wav"), 4_000);

    let transcoder = Transcoder::new(cache.clone(), "track.wav", TargetFormat::Flac, true)
        .await
        .unwrap();

    let product = read_all(&transcoder).await;
    assert!(transcoder.is_finished());

    // Le produit est un flux FLAC
    assert_eq!(&product[..4], b"fLaC");

    let info = transcoder.info();
    assert_eq!(info.result, ResultCode::Finished);
    assert!(!info.error);
    assert_eq!(info.errno, 0);
    assert_eq!(info.encoded_filesize, product.len() as u64);
    assert_eq!(info.audiosamplerate, 44_100);
    assert_eq!(info.channels, 2);
    assert_eq!(transcoder.size(), product.len() as u64);

    // Lire au-delà de la fin ne rend rien
    let mut buf = [0u8; 16];
    let n = transcoder
        .read(product.len() as u64, &mut buf)
        .await
        .unwrap();
    assert_eq!(n, 0);

    transcoder.close(CloseFlags::Keep).await.unwrap();

    // La fiche survit à la fermeture
    let stored = cache.db.get("track.wav", "flac").unwrap().unwrap();
    assert_eq!(stored.result, ResultCode::Finished);
}

#[tokio::test]
async fn test_transcodage_vers_wav() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;
    write_wav(&temp_dir.path().join("library/track.wav"), 4_000);

    let transcoder = Transcoder::new(cache.clone(), "track.wav", TargetFormat::Wav, true)
        .await
        .unwrap();
    let product = read_all(&transcoder).await;

    // En-tête RIFF/WAVE puis 4 octets par trame en stéréo 16 bits
    assert_eq!(&product[..4], b"RIFF");
    assert_eq!(&product[8..12], b"WAVE");
    assert_eq!(product.len(), 44 + 4_000 * 4);
    assert_eq!(transcoder.info().encoded_filesize, product.len() as u64);

    transcoder.close(CloseFlags::Keep).await.unwrap();
}

#[tokio::test]
async fn test_transcodage_vers_aiff() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;
    write_wav(&temp_dir.path().join("library/track.wav"), 4_000);

    let transcoder = Transcoder::new(cache.clone(), "track.wav", TargetFormat::Aiff, true)
        .await
        .unwrap();
    let product = read_all(&transcoder).await;

    assert_eq!(&product[..4], b"FORM");
    assert_eq!(&product[8..12], b"AIFF");
    assert_eq!(transcoder.info().encoded_filesize, product.len() as u64);

    transcoder.close(CloseFlags::Keep).await.unwrap();
}

#[tokio::test]
async fn test_prediction_sans_lancer_le_job() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;
    write_wav(&temp_dir.path().join("library/track.wav"), 4_000);

    let transcoder = Transcoder::new(cache.clone(), "track.wav", TargetFormat::Flac, false)
        .await
        .unwrap();

    // La taille est prédite mais rien n'est encodé
    let info = transcoder.info();
    assert_eq!(info.result, ResultCode::None);
    assert!(info.predicted_filesize > 0);
    assert_eq!(transcoder.size(), info.predicted_filesize);
    assert!(!transcoder.entry().decoding());
    assert_eq!(transcoder.entry().buffer().watermark(), 0);

    transcoder.close(CloseFlags::Keep).await.unwrap();

    // La prédiction est en base pour les prochaines requêtes
    let stored = cache.db.get("track.wav", "flac").unwrap().unwrap();
    assert_eq!(stored.result, ResultCode::None);
    assert!(stored.predicted_filesize > 0);
}

#[tokio::test]
async fn test_produit_fini_resservi() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;
    write_wav(&temp_dir.path().join("library/track.wav"), 4_000);

    // Premier passage : encodage complet
    let transcoder = Transcoder::new(cache.clone(), "track.wav", TargetFormat::Flac, true)
        .await
        .unwrap();
    let first = read_all(&transcoder).await;
    transcoder.close(CloseFlags::Keep).await.unwrap();

    // Second passage : servi depuis le cache, sans réencodage
    let transcoder = Transcoder::new(cache.clone(), "track.wav", TargetFormat::Flac, true)
        .await
        .unwrap();
    assert!(transcoder.is_finished());
    assert!(!transcoder.entry().decoding());

    let second = read_all(&transcoder).await;
    assert_eq!(first, second);
    transcoder.close(CloseFlags::Keep).await.unwrap();
}

#[tokio::test]
async fn test_flac_copie_directe() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;

    // Source déjà en FLAC : copiée à l'identique sans réencodage
    let mut samples = Vec::new();
    for i in 0..4_000 {
        let value = ((i % 200) as i32) - 100;
        samples.push(value);
        samples.push(-value);
    }
    let flac = encode_flac(&samples, 2, 16, 44_100).unwrap();
    std::fs::write(temp_dir.path().join("library/track.flac"), &flac).unwrap();

    let transcoder = Transcoder::new(cache.clone(), "track.flac", TargetFormat::Flac, true)
        .await
        .unwrap();
    let product = read_all(&transcoder).await;
    assert_eq!(product, flac);

    let info = transcoder.info();
    assert_eq!(info.predicted_filesize, flac.len() as u64);
    assert_eq!(info.encoded_filesize, flac.len() as u64);

    transcoder.close(CloseFlags::Keep).await.unwrap();
}

#[tokio::test]
async fn test_source_disparue() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;

    let err = Transcoder::new(cache.clone(), "missing.wav", TargetFormat::Flac, true)
        .await
        .unwrap_err();

    // L'erreur système d'origine reste accessible pour le 404
    let io_err = err.downcast_ref::<std::io::Error>().unwrap();
    assert_eq!(io_err.kind(), std::io::ErrorKind::NotFound);

    // Aucune entrée morte ne traîne dans le cache
    assert!(cache.get_entry("missing.wav", "flac").await.is_none());
}

#[tokio::test]
async fn test_reprise_apres_echec() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;

    let source = temp_dir.path().join("library/track.wav");
    write_wav(&source, 4_000);

    // Fiche d'échec cohérente avec la source, laissée par un passage
    // précédent
    let meta = std::fs::metadata(&source).unwrap();
    let mtime = meta
        .modified()
        .unwrap()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let mut info = CacheInfo::new("track.wav", "flac");
    info.result = ResultCode::Error;
    info.error = true;
    info.errno = 5;
    info.bits_per_sample = 16;
    info.file_time = mtime;
    info.file_size = meta.len();
    cache.db.upsert(&info).unwrap();

    // Une nouvelle demande relance le transcodage
    let transcoder = Transcoder::new(cache.clone(), "track.wav", TargetFormat::Flac, true)
        .await
        .unwrap();
    let product = read_all(&transcoder).await;
    assert!(transcoder.is_finished());
    assert_eq!(&product[..4], b"fLaC");

    let info = transcoder.info();
    assert!(!info.error);
    assert_eq!(info.errno, 0);

    transcoder.close(CloseFlags::Keep).await.unwrap();
}

#[tokio::test]
async fn test_source_modifiee_reencode() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;

    let source = temp_dir.path().join("library/track.wav");
    write_wav(&source, 2_000);

    let transcoder = Transcoder::new(cache.clone(), "track.wav", TargetFormat::Flac, true)
        .await
        .unwrap();
    let first = read_all(&transcoder).await;
    transcoder.close(CloseFlags::Keep).await.unwrap();

    // La source grossit : le produit en cache est jeté et refait
    write_wav(&source, 4_000);

    let transcoder = Transcoder::new(cache.clone(), "track.wav", TargetFormat::Flac, true)
        .await
        .unwrap();
    let second = read_all(&transcoder).await;
    assert!(transcoder.is_finished());
    assert!(second.len() > first.len());

    transcoder.close(CloseFlags::Keep).await.unwrap();
}
