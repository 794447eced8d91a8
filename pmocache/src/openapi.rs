use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "PMOStream Cache API",
        version = "0.1.0",
        description = "API REST pour gérer le cache de transcodage de PMOStream",
        contact(
            name = "PMOStream Team",
        ),
        license(
            name = "MIT",
        ),
    ),
    paths(
        crate::api::list_entries,
        crate::api::get_stats,
        crate::api::run_maintenance,
        crate::api::clear_cache,
        crate::api::delete_entry,
    ),
    components(
        schemas(
            crate::db::CacheInfo,
            crate::db::ResultCode,
            crate::cache::MaintenanceReport,
            crate::api::CacheStats,
            crate::api::ClearResponse,
            crate::api::DeleteEntryResponse,
            crate::api::ErrorResponse,
        )
    ),
    tags(
        (name = "cache", description = "Gestion du cache de transcodage")
    )
)]
pub struct CacheApiDoc;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "PMOStream Library API",
        version = "0.1.0",
        description = "API REST pour parcourir la bibliothèque musicale de PMOStream",
        contact(
            name = "PMOStream Team",
        ),
        license(
            name = "MIT",
        ),
    ),
    paths(
        crate::api::library_root_listing,
        crate::api::library_listing,
    ),
    components(
        schemas(
            crate::api::LibraryEntry,
            crate::api::LibraryListing,
            crate::api::ErrorResponse,
        )
    ),
    tags(
        (name = "library", description = "Parcours de la bibliothèque musicale")
    )
)]
pub struct LibraryApiDoc;
