//! Cache (temporary) file tests.

use slide_mmap::{
    create_cache_file, BackingKind, CacheCreateInfo, CacheHeadroom, CacheSizing, MapConfig,
    MappedFile, PageSize,
};

fn small_cache(base: u64, headroom: CacheHeadroom) -> MapConfig {
    MapConfig::global()
        .with_page_size(PageSize::new(4096).expect("page size"))
        .with_cache_sizing(CacheSizing { base, headroom })
}

#[test]
fn default_cache_is_500mb_plus_a_page() {
    let cache = MappedFile::create_cache().expect("create cache");
    let page = MapConfig::global().page_size.get();
    let expected = (500_000_000u64 & !(page - 1)) + page;
    assert_eq!(cache.size().expect("size"), expected);
    assert!(cache.write_access().expect("write access"));
    assert_eq!(cache.backing(), BackingKind::Cache);
}

#[test]
fn cache_label_is_synthetic_and_unique() {
    let config = small_cache(10_000, CacheHeadroom::ExtraPage);
    let a = MappedFile::create_cache_with(&config).expect("a");
    let b = MappedFile::create_cache_with(&config).expect("b");
    let label_a = a.path().expect("path").to_string_lossy().into_owned();
    let label_b = b.path().expect("path").to_string_lossy().into_owned();
    assert!(label_a.starts_with("cache://"));
    assert_ne!(label_a, label_b);
    assert!(!a.path().expect("path").exists());
}

#[test]
fn configured_headroom_policies() {
    let extra = MappedFile::create_cache_with(&small_cache(8192, CacheHeadroom::ExtraPage))
        .expect("extra page");
    assert_eq!(extra.size().expect("size"), 12_288);

    let aligned = MappedFile::create_cache_with(&small_cache(8192, CacheHeadroom::AlignUp))
        .expect("align up");
    assert_eq!(aligned.size().expect("size"), 8192);
}

#[test]
fn cache_grows_by_doubling_and_keeps_tiles() {
    let cache = create_cache_file(&CacheCreateInfo {
        config: Some(small_cache(16_384, CacheHeadroom::AlignUp)),
    })
    .expect("create cache");

    let tile = [0x42u8; 256];
    cache.write_at(16_384 - 256, &tile).expect("write last tile");

    let doubled = cache
        .resize(cache.size().expect("size") * 2, false)
        .expect("double");
    assert_eq!(doubled, 32_768);

    let mut back = [0u8; 256];
    cache.read_into(16_384 - 256, &mut back).expect("read tile");
    assert_eq!(back, tile);
    cache.write_at(32_768 - 256, &tile).expect("write in new space");
}

#[test]
fn closed_cache_reports_invalid_state() {
    let cache = MappedFile::create_cache_with(&small_cache(4096, CacheHeadroom::AlignUp))
        .expect("create cache");
    cache.close();
    assert!(cache.size().is_err());
    assert!(cache.path().is_err());
}
