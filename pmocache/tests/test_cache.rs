use pmocache::buffer::{cachefile_path, CloseFlags};
use pmocache::cache::{free_disk_space, Cache, CacheParams};
use pmocache::db::{CacheInfo, ResultCode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Paramètres pointant dans un répertoire temporaire, sans maintenance
fn test_params(temp_dir: &TempDir) -> CacheParams {
    CacheParams {
        cache_dir: temp_dir.path().join("cache"),
        library_root: temp_dir.path().join("library"),
        cache_maintenance: 0,
        ..CacheParams::default()
    }
}

async fn create_test_cache(params: CacheParams) -> Arc<Cache> {
    std::fs::create_dir_all(&params.library_root).unwrap();
    Cache::new(params).await.unwrap()
}

/// Dépose un produit terminé : fiche en base et fichier sur disque
fn insert_product(cache: &Cache, filename: &str, size: usize, access_time: i64) -> PathBuf {
    let mut info = CacheInfo::new(filename, "flac");
    info.predicted_filesize = size as u64;
    info.encoded_filesize = size as u64;
    info.result = ResultCode::Finished;
    info.access_time = access_time;
    cache.db.upsert(&info).unwrap();

    let product = cachefile_path(cache.cache_dir(), filename, "flac");
    std::fs::create_dir_all(product.parent().unwrap()).unwrap();
    std::fs::write(&product, vec![0u8; size]).unwrap();
    product
}

#[tokio::test]
async fn test_prune_expired() {
    let temp_dir = tempfile::tempdir().unwrap();
    let params = CacheParams {
        cache_expiry: 3_600,
        ..test_params(&temp_dir)
    };
    let cache = create_test_cache(params).await;

    let old_product = insert_product(&cache, "old.wav", 100, now() - 7_200);
    let fresh_product = insert_product(&cache, "fresh.wav", 100, now());

    let removed = cache.prune_expired().await.unwrap();
    assert_eq!(removed, 1);

    // L'entrée expirée disparaît, fiche et fichier
    assert!(cache.db.get("old.wav", "flac").unwrap().is_none());
    assert!(!old_product.exists());
    assert!(cache.db.get("fresh.wav", "flac").unwrap().is_some());
    assert!(fresh_product.exists());
}

#[tokio::test]
async fn test_prune_expired_desactive() {
    let temp_dir = tempfile::tempdir().unwrap();
    let params = CacheParams {
        cache_expiry: 0,
        ..test_params(&temp_dir)
    };
    let cache = create_test_cache(params).await;

    insert_product(&cache, "ancient.wav", 100, 1_000);

    // Expiration désactivée : rien ne part
    assert_eq!(cache.prune_expired().await.unwrap(), 0);
    assert!(cache.db.get("ancient.wav", "flac").unwrap().is_some());
}

#[tokio::test]
async fn test_prune_cache_size_lru() {
    let temp_dir = tempfile::tempdir().unwrap();
    let params = CacheParams {
        max_cache_size: 250,
        cache_expiry: 0,
        ..test_params(&temp_dir)
    };
    let cache = create_test_cache(params).await;

    let oldest = insert_product(&cache, "oldest.wav", 100, 1_000);
    insert_product(&cache, "middle.wav", 100, 2_000);
    insert_product(&cache, "newest.wav", 100, 3_000);

    // 300 octets pour 250 permis : seule la plus ancienne part
    let removed = cache.prune_cache_size().await.unwrap();
    assert_eq!(removed, 1);
    assert!(!oldest.exists());
    assert!(cache.db.get("middle.wav", "flac").unwrap().is_some());
    assert!(cache.db.get("newest.wav", "flac").unwrap().is_some());
    assert_eq!(cache.db.total_encoded_size().unwrap(), 200);
}

#[tokio::test]
async fn test_prune_cache_size_sous_la_limite() {
    let temp_dir = tempfile::tempdir().unwrap();
    let params = CacheParams {
        max_cache_size: 1_000,
        ..test_params(&temp_dir)
    };
    let cache = create_test_cache(params).await;

    insert_product(&cache, "a.wav", 100, 1_000);
    assert_eq!(cache.prune_cache_size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_prune_size_garde_les_vivantes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let params = CacheParams {
        max_cache_size: 50,
        cache_expiry: 0,
        ..test_params(&temp_dir)
    };
    let cache = create_test_cache(params).await;

    let product = insert_product(&cache, "held.wav", 100, 1_000);
    let entry = cache.open_entry("held.wav", "flac").await.unwrap();

    // Au-dessus de la limite mais tenue par un lecteur : intouchable
    assert_eq!(cache.prune_cache_size().await.unwrap(), 0);
    assert!(product.exists());

    cache.close_entry(&entry, CloseFlags::Keep).await.unwrap();

    // Plus personne ne la tient : la purge la reprend
    assert_eq!(cache.prune_cache_size().await.unwrap(), 1);
    assert!(!product.exists());
}

#[tokio::test]
async fn test_prune_expired_garde_les_vivantes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let params = CacheParams {
        cache_expiry: 3_600,
        ..test_params(&temp_dir)
    };
    let cache = create_test_cache(params).await;

    insert_product(&cache, "held.wav", 100, now() - 7_200);
    let entry = cache.open_entry("held.wav", "flac").await.unwrap();

    // Antidater la fiche pendant qu'elle est tenue
    entry.update_info(|info| info.access_time = now() - 7_200);
    entry.persist().unwrap();

    assert_eq!(cache.prune_expired().await.unwrap(), 0);
    assert!(cache.db.get("held.wav", "flac").unwrap().is_some());

    cache.close_entry(&entry, CloseFlags::Keep).await.unwrap();

    // Refermée et toujours antidatée : elle part
    entry.update_info(|info| info.access_time = now() - 7_200);
    entry.persist().unwrap();
    assert_eq!(cache.prune_expired().await.unwrap(), 1);
}

#[tokio::test]
async fn test_prune_disk_space_desactive() {
    let temp_dir = tempfile::tempdir().unwrap();
    let params = CacheParams {
        min_diskspace: 0,
        ..test_params(&temp_dir)
    };
    let cache = create_test_cache(params).await;

    insert_product(&cache, "a.wav", 100, 1_000);
    assert_eq!(cache.prune_disk_space(0).await.unwrap(), 0);
}

#[tokio::test]
async fn test_maintenance_rapport() {
    let temp_dir = tempfile::tempdir().unwrap();
    let params = CacheParams {
        cache_expiry: 3_600,
        max_cache_size: 1_000_000,
        min_diskspace: 0,
        ..test_params(&temp_dir)
    };
    let cache = create_test_cache(params).await;

    insert_product(&cache, "old.wav", 100, now() - 7_200);
    insert_product(&cache, "fresh.wav", 100, now());

    let report = cache.maintenance(0).await;
    assert!(report.success);
    assert_eq!(report.expired_removed, 1);
    assert_eq!(report.size_removed, 0);
    assert_eq!(report.disk_removed, 0);
}

#[tokio::test]
async fn test_clear() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;

    let a = insert_product(&cache, "a.wav", 100, 1_000);
    let b = insert_product(&cache, "b.wav", 100, 2_000);

    let removed = cache.clear().await.unwrap();
    assert_eq!(removed, 2);
    assert!(!a.exists());
    assert!(!b.exists());
    assert_eq!(cache.db.count().unwrap(), 0);
}

#[tokio::test]
async fn test_clear_garde_les_vivantes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;

    insert_product(&cache, "held.wav", 100, 1_000);
    insert_product(&cache, "idle.wav", 100, 2_000);
    let entry = cache.open_entry("held.wav", "flac").await.unwrap();

    let removed = cache.clear().await.unwrap();
    assert_eq!(removed, 1);
    assert!(cache.db.get("held.wav", "flac").unwrap().is_some());
    assert!(cache.db.get("idle.wav", "flac").unwrap().is_none());

    cache.close_entry(&entry, CloseFlags::Keep).await.unwrap();
    assert_eq!(cache.clear().await.unwrap(), 1);
}

#[tokio::test]
async fn test_remove_cachefile() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;

    let product = insert_product(&cache, "a.wav", 100, 1_000);

    // Première suppression : la fiche et le fichier partent
    assert!(cache.remove_cachefile("a.wav", "flac").await.unwrap());
    assert!(!product.exists());
    assert!(cache.db.get("a.wav", "flac").unwrap().is_none());

    // Seconde suppression : plus rien à faire
    assert!(!cache.remove_cachefile("a.wav", "flac").await.unwrap());
}

#[tokio::test]
async fn test_remove_cachefile_refuse_les_vivantes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = create_test_cache(test_params(&temp_dir)).await;

    insert_product(&cache, "held.wav", 100, 1_000);
    let entry = cache.open_entry("held.wav", "flac").await.unwrap();

    let result = cache.remove_cachefile("held.wav", "flac").await;
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("in use"));

    cache.close_entry(&entry, CloseFlags::Keep).await.unwrap();
    assert!(cache.remove_cachefile("held.wav", "flac").await.unwrap());
}

#[tokio::test]
async fn test_clear_cache_on_start() {
    let temp_dir = tempfile::tempdir().unwrap();

    let product = {
        let cache = create_test_cache(test_params(&temp_dir)).await;
        insert_product(&cache, "stale.wav", 100, 1_000)
    };
    assert!(product.exists());

    // Redémarrage avec vidage : le cache repart à vide
    let params = CacheParams {
        clear_cache_on_start: true,
        ..test_params(&temp_dir)
    };
    let cache = create_test_cache(params).await;
    assert_eq!(cache.db.count().unwrap(), 0);
    assert!(!product.exists());
}

#[tokio::test]
async fn test_prune_cache_on_start() {
    let temp_dir = tempfile::tempdir().unwrap();

    {
        let cache = create_test_cache(test_params(&temp_dir)).await;
        insert_product(&cache, "old.wav", 100, now() - 7_200);
        insert_product(&cache, "fresh.wav", 100, now());
    }

    // Redémarrage avec purge : seules les entrées expirées partent
    let params = CacheParams {
        prune_cache_on_start: true,
        cache_expiry: 3_600,
        ..test_params(&temp_dir)
    };
    let cache = create_test_cache(params).await;
    assert!(cache.db.get("old.wav", "flac").unwrap().is_none());
    assert!(cache.db.get("fresh.wav", "flac").unwrap().is_some());
}

#[test]
fn test_free_disk_space() {
    let temp_dir = tempfile::tempdir().unwrap();

    // Un volume inconnu vaut u64::MAX, un volume connu un espace réel
    assert!(free_disk_space(temp_dir.path()) > 0);
}
