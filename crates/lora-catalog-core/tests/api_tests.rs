//! End-to-end tests for the catalog facade: scan, search and title edits
//! against real model trees in temp directories.

use lora_catalog::{CatalogApi, CatalogConfig, CatalogError, KindFilter, ScanProgress};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn write_model(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

fn write_info(model: &Path, json: serde_json::Value) {
    let info = model.with_extension("info");
    fs::write(info, serde_json::to_vec(&json).unwrap()).unwrap();
}

fn write_preview(model: &Path) -> PathBuf {
    let preview = model.with_extension("preview.png");
    image::RgbImage::from_pixel(64, 48, image::Rgb([200, 40, 90]))
        .save(&preview)
        .unwrap();
    preview
}

async fn open(root: &Path) -> CatalogApi {
    CatalogApi::open(CatalogConfig::for_root(root)).await.unwrap()
}

async fn scan(api: &CatalogApi) -> lora_catalog::ScanSummary {
    api.scan(None::<fn(ScanProgress)>).await.unwrap()
}

async fn id_of(api: &CatalogApi, path: &Path) -> i64 {
    let path = path.canonicalize().unwrap();
    api.store()
        .get_entry(&path.to_string_lossy())
        .unwrap()
        .unwrap_or_else(|| panic!("{} not indexed", path.display()))
        .id
}

#[tokio::test]
async fn test_open_migrates_to_latest() {
    let temp = TempDir::new().unwrap();
    let api = open(temp.path()).await;

    let report = api.migration_report();
    assert_eq!((report.from, report.to), (0, 4));
    assert_eq!(report.applied, vec![1, 2, 3, 4]);
    assert_eq!(api.schema_version().await.unwrap(), 4);
    assert!(api.migrate().await.unwrap().applied.is_empty());
    assert_eq!(api.entry_count().await.unwrap(), 0);
    drop(api);

    let reopened = open(temp.path()).await;
    let report = reopened.migration_report();
    assert_eq!((report.from, report.to), (4, 4));
    assert!(report.applied.is_empty());
}

#[tokio::test]
async fn test_open_rejects_missing_root() {
    let temp = TempDir::new().unwrap();
    let result = CatalogApi::open(CatalogConfig::for_root(temp.path().join("nope"))).await;
    assert!(matches!(result, Err(CatalogError::NotADirectory(_))));
}

#[tokio::test]
async fn test_second_scan_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write_model(&root.join("char/miku.safetensors"), b"miku weights");
    write_model(&root.join("style/ink.safetensors"), b"ink weights");
    write_model(&root.join("tower.safetensors"), b"tower weights");
    write_preview(&root.join("tower.safetensors"));

    let api = open(root).await;
    let first = scan(&api).await;
    assert_eq!(first.total, 3);
    assert_eq!(first.updated, 3);
    assert_eq!(first.hashed, 3);

    let miku = id_of(&api, &root.join("char/miku.safetensors")).await;
    let before = api.get_entry(miku).await.unwrap().unwrap();

    let second = scan(&api).await;
    assert_eq!(second.updated, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.hashed, 0);
    assert_eq!(api.entry_count().await.unwrap(), 3);

    let after = api.get_entry(miku).await.unwrap().unwrap();
    assert_eq!(after.sha256, before.sha256);
    assert_eq!(after.scanned_at, before.scanned_at);
}

#[tokio::test]
async fn test_deleted_thumbnail_regenerated_without_rehash() {
    let temp = TempDir::new().unwrap();
    let model = temp.path().join("tower.safetensors");
    write_model(&model, b"tower weights");
    write_preview(&model);

    let api = open(temp.path()).await;
    scan(&api).await;

    let id = id_of(&api, &model).await;
    let entry = api.get_entry(id).await.unwrap().unwrap();
    let thumb = PathBuf::from(entry.preview_thumb.expect("thumbnail rendered"));
    assert!(thumb.exists());
    assert!(thumb
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with(entry.sha256.as_deref().unwrap()));

    fs::remove_file(&thumb).unwrap();
    let summary = scan(&api).await;

    assert_eq!(summary.updated, 1);
    assert_eq!(summary.hashed, 0);
    assert!(thumb.exists());
}

#[tokio::test]
async fn test_identical_content_shares_thumbnail() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a.safetensors");
    let b = temp.path().join("b.safetensors");
    write_model(&a, b"same bytes");
    write_model(&b, b"same bytes");
    write_preview(&a);
    write_preview(&b);

    let api = open(temp.path()).await;
    scan(&api).await;

    let ids = vec![id_of(&api, &a).await, id_of(&api, &b).await];
    let entries = api.fetch_by_ids(ids, true).await.unwrap();
    assert!(entries[0].preview_thumb.is_some());
    assert_eq!(entries[0].preview_thumb, entries[1].preview_thumb);
}

#[tokio::test]
async fn test_changed_file_is_rehashed_and_keeps_title() {
    let temp = TempDir::new().unwrap();
    let model = temp.path().join("ink.safetensors");
    write_model(&model, b"v1");

    let api = open(temp.path()).await;
    scan(&api).await;
    let id = id_of(&api, &model).await;
    api.set_title(id, "Ink Wash").await.unwrap();
    let old_sha = api.get_entry(id).await.unwrap().unwrap().sha256;

    write_model(&model, b"version two is longer");
    let summary = scan(&api).await;

    assert_eq!(summary.updated, 1);
    assert_eq!(summary.hashed, 1);
    let entry = api.get_entry(id).await.unwrap().unwrap();
    assert_ne!(entry.sha256, old_sha);
    assert_eq!(entry.title.as_deref(), Some("Ink Wash"));
}

#[tokio::test]
async fn test_fetch_by_ids_preserves_order_and_omits_missing() {
    let temp = TempDir::new().unwrap();
    for name in ["a", "b", "c"] {
        write_model(&temp.path().join(format!("{name}.safetensors")), name.as_bytes());
    }
    let api = open(temp.path()).await;
    scan(&api).await;

    let a = id_of(&api, &temp.path().join("a.safetensors")).await;
    let b = id_of(&api, &temp.path().join("b.safetensors")).await;
    let c = id_of(&api, &temp.path().join("c.safetensors")).await;

    let entries = api.fetch_by_ids(vec![c, 9999, a, b], true).await.unwrap();
    let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![c, a, b]);
}

#[tokio::test]
async fn test_kind_filter_empty_vs_absent() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write_model(&root.join("char/miku.safetensors"), b"1");
    write_model(&root.join("style/ink.safetensors"), b"2");
    write_model(&root.join("loose.safetensors"), b"3");

    let api = open(root).await;
    scan(&api).await;

    let none = api
        .search("", KindFilter::only(Vec::<String>::new()), 100)
        .await
        .unwrap();
    assert!(none.is_empty());

    let all = api.search("", KindFilter::Any, 100).await.unwrap();
    assert_eq!(all.len(), 3);

    let chars = api.search("", KindFilter::only(["char"]), 100).await.unwrap();
    assert_eq!(chars, vec![id_of(&api, &root.join("char/miku.safetensors")).await]);

    let unsorted = api
        .search("", KindFilter::only(["Unsorted"]), 100)
        .await
        .unwrap();
    assert_eq!(unsorted, vec![id_of(&api, &root.join("loose.safetensors")).await]);

    assert_eq!(
        api.distinct_kinds().await.unwrap(),
        vec!["char", "style", "Unsorted"]
    );
}

#[tokio::test]
async fn test_terms_are_anded_in_any_order() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write_model(&root.join("blue_hair_girl.safetensors"), b"1");
    write_model(&root.join("blue_sky.safetensors"), b"2");
    write_model(&root.join("red_hair.safetensors"), b"3");

    let api = open(root).await;
    scan(&api).await;
    let expected = vec![id_of(&api, &root.join("blue_hair_girl.safetensors")).await];

    assert_eq!(api.search("blue hair", KindFilter::Any, 10).await.unwrap(), expected);
    assert_eq!(api.search("hair blue", KindFilter::Any, 10).await.unwrap(), expected);
    assert_eq!(api.search("HAIR", KindFilter::Any, 10).await.unwrap().len(), 2);
    assert_eq!(api.search("sky", KindFilter::Any, 10).await.unwrap().len(), 1);
    assert_eq!(api.search("ky", KindFilter::Any, 10).await.unwrap().len(), 1);
    assert_eq!(api.search("hair", KindFilter::Any, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_set_title_keeps_index_consistent() {
    let temp = TempDir::new().unwrap();
    let model = temp.path().join("tower.safetensors");
    write_model(&model, b"tower");
    write_info(
        &model,
        serde_json::json!({ "name": "Tower", "tags": ["castle", "architecture"] }),
    );

    let api = open(temp.path()).await;
    scan(&api).await;
    let id = id_of(&api, &model).await;

    assert!(api.search("citadel", KindFilter::Any, 10).await.unwrap().is_empty());
    api.set_title(id, "Citadel of Dawn").await.unwrap();

    let store = api.store();
    let live = store.index_row(id).unwrap().unwrap();
    assert_eq!(Some(live.clone()), store.derived_index_row(id).unwrap());
    assert_eq!(live.title, "Citadel of Dawn");
    assert_eq!(live.tags_text, "architecture castle");

    assert_eq!(api.search("citadel", KindFilter::Any, 10).await.unwrap(), vec![id]);

    api.rebuild_search_index().await.unwrap();
    assert_eq!(store.index_row(id).unwrap(), Some(live));
}

#[tokio::test]
async fn test_set_title_unknown_id() {
    let temp = TempDir::new().unwrap();
    let api = open(temp.path()).await;
    let err = api.set_title(404, "missing").await.unwrap_err();
    assert!(matches!(err, CatalogError::EntryNotFound { id: 404 }));
}

#[tokio::test]
async fn test_sidecar_metadata_is_stored() {
    let temp = TempDir::new().unwrap();
    let model = temp.path().join("char/miku.safetensors");
    write_model(&model, b"miku");
    write_info(
        &model,
        serde_json::json!({
            "name": "Miku",
            "id": 1234,
            "baseModel": "Pony",
            "triggerWords": ["miku", "twintails"],
            "tags": "vocaloid, anime"
        }),
    );

    let api = open(temp.path()).await;
    scan(&api).await;
    let id = id_of(&api, &model).await;
    let entry = api.get_entry(id).await.unwrap().unwrap();

    assert_eq!(entry.name, "Miku");
    assert_eq!(entry.trigger.as_deref(), Some("miku, twintails"));
    assert_eq!(entry.civitai_id.as_deref(), Some("1234"));
    assert_eq!(entry.base.as_deref(), Some("Pony"));
    assert_eq!(entry.kind.as_deref(), Some("char"));
    assert!(entry.info_json.is_some());

    let tags: Vec<String> = api
        .store()
        .tags_for(id)
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(tags, vec!["anime", "vocaloid"]);
}

#[tokio::test]
async fn test_default_base_and_existing_kind_kept() {
    let temp = TempDir::new().unwrap();
    let model = temp.path().join("style/ink.safetensors");
    write_model(&model, b"ink");

    let api = open(temp.path()).await;
    scan(&api).await;
    let id = id_of(&api, &model).await;
    let entry = api.get_entry(id).await.unwrap().unwrap();
    assert_eq!(entry.base.as_deref(), Some("SDXL"));
    assert_eq!(entry.kind.as_deref(), Some("style"));

    // a move to another directory is a new path, the old row stays until pruned
    let moved = temp.path().join("concept/ink.safetensors");
    write_model(&moved, b"ink");
    fs::remove_file(&model).unwrap();

    let mut config = CatalogConfig::for_root(temp.path());
    config.prune_missing = true;
    let options = lora_catalog::ScanOptions::from_config(&config);
    let summary = api
        .scan_with(options, None::<fn(ScanProgress)>)
        .await
        .unwrap();

    assert_eq!(summary.removed, 1);
    assert_eq!(api.entry_count().await.unwrap(), 1);
    assert!(api.get_entry(id).await.unwrap().is_none());
    let new_id = id_of(&api, &moved).await;
    assert_eq!(
        api.get_entry(new_id).await.unwrap().unwrap().kind.as_deref(),
        Some("concept")
    );
}

#[tokio::test]
async fn test_progress_reports_final_counts() {
    let temp = TempDir::new().unwrap();
    for name in ["a", "b", "c", "d"] {
        write_model(&temp.path().join(format!("{name}.safetensors")), name.as_bytes());
    }

    let api = open(temp.path()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    api.scan(Some(move |p: ScanProgress| sink.lock().unwrap().push(p)))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    let last = seen.last().unwrap();
    assert_eq!((last.done, last.total, last.failed), (4, 4, 0));
}

#[tokio::test]
async fn test_small_batches_commit_everything() {
    let temp = TempDir::new().unwrap();
    for i in 0..7 {
        write_model(
            &temp.path().join(format!("m{i}.safetensors")),
            format!("weights {i}").as_bytes(),
        );
    }

    let mut config = CatalogConfig::for_root(temp.path());
    config.batch_size = 2;
    let api = CatalogApi::open(config).await.unwrap();
    let summary = scan(&api).await;

    assert_eq!(summary.updated, 7);
    assert_eq!(api.entry_count().await.unwrap(), 7);
    assert_eq!(api.search("m", KindFilter::Any, 100).await.unwrap().len(), 7);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_file_counted_as_failed() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let good = temp.path().join("good.safetensors");
    let bad = temp.path().join("bad.safetensors");
    write_model(&good, b"good");
    write_model(&bad, b"bad");
    fs::set_permissions(&bad, fs::Permissions::from_mode(0o000)).unwrap();

    // privileged users can read the file anyway
    if fs::File::open(&bad).is_ok() {
        return;
    }

    let api = open(temp.path()).await;
    let summary = scan(&api).await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(api.entry_count().await.unwrap(), 1);
    id_of(&api, &good).await;
}
