//! Listing and link caches.
//!
//! Keys are `mount_path + actual_path`, so replicas in a balance group
//! cache independently. Listings expire after the storage's configured
//! lifetime; links after their own expiration. Mutations patch cached
//! listings in place where they can, and drop them where they can't.

mod debounce;
mod memo;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use strata_types::path;
use strata_types::{Obj, extract_folder, sort_objs};

use crate::vfs::{Link, MountedStorage};

pub use debounce::Debouncer;
pub use memo::MemoCache;

/// Cache key for `path` on `storage`.
pub fn key(storage: &MountedStorage, actual_path: &str) -> String {
    path::join(storage.mount_path(), actual_path)
}

/// Listing and link caches for every mounted storage.
pub struct FsCache {
    list: Arc<MemoCache<String, Vec<Obj>>>,
    link: MemoCache<String, Link>,
    sort: Debouncer<String>,
}

impl Default for FsCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SORT_DEBOUNCE)
    }
}

impl FsCache {
    /// Default delay before a patched listing is re-sorted.
    pub const DEFAULT_SORT_DEBOUNCE: Duration = Duration::from_secs(60);

    pub fn new(sort_debounce: Duration) -> Self {
        Self {
            list: Arc::new(MemoCache::new()),
            link: MemoCache::new(),
            sort: Debouncer::new(sort_debounce),
        }
    }

    /// The listing cache, for coalesced loads.
    pub fn lists(&self) -> &MemoCache<String, Vec<Obj>> {
        &self.list
    }

    /// The link cache, for coalesced loads.
    pub fn links(&self) -> &MemoCache<String, Link> {
        &self.link
    }

    pub fn get_list(&self, storage: &MountedStorage, dir: &str) -> Option<Vec<Obj>> {
        self.list.get(&key(storage, dir))
    }

    /// Store a listing. Empty listings are evicted instead of cached.
    pub fn set_list(&self, storage: &MountedStorage, dir: &str, objs: Vec<Obj>) {
        let key = key(storage, dir);
        if objs.is_empty() {
            self.list.del(&key);
        } else {
            self.list.set(key, objs, Some(storage.storage().cache_ttl()));
        }
    }

    /// Insert or replace an entry in a cached listing.
    ///
    /// Directories go to the front, files to the back. Storages that sort
    /// locally get a debounced re-sort of the listing.
    pub fn add_entry(&self, storage: &MountedStorage, dir: &str, obj: Obj) {
        let key = key(storage, dir);
        let patched = self.list.update(&key, |objs| {
            if let Some(existing) = objs.iter_mut().find(|o| o.name == obj.name) {
                *existing = obj;
            } else if obj.is_dir {
                objs.insert(0, obj);
            } else {
                objs.push(obj);
            }
        });
        trace!(key = %key, patched, "add cache entry");
        if patched && storage.config().local_sort {
            self.schedule_sort(storage, key);
        }
    }

    /// Replace the entry named `old_name` with `obj`.
    pub fn update_entry(&self, storage: &MountedStorage, dir: &str, old_name: &str, obj: Obj) {
        let key = key(storage, dir);
        let patched = self.list.update(&key, |objs| {
            objs.retain(|o| o.name != obj.name || o.name == old_name);
            match objs.iter_mut().find(|o| o.name == old_name) {
                Some(existing) => *existing = obj,
                None => objs.push(obj),
            }
        });
        if patched && storage.config().local_sort {
            self.schedule_sort(storage, key);
        }
    }

    /// Remove an entry from a cached listing. Removing a directory also
    /// drops every cached listing beneath it.
    pub fn delete_entry(&self, storage: &MountedStorage, dir: &str, obj: &Obj) {
        let key = key(storage, dir);
        self.list.update(&key, |objs| objs.retain(|o| o.name != obj.name));
        if obj.is_dir {
            self.clear(storage, &path::join(dir, &obj.name));
        }
    }

    /// Drop the cached listing for `dir` and every cached listing below it.
    pub fn clear(&self, storage: &MountedStorage, dir: &str) {
        let prefix = key(storage, dir);
        let below = if prefix == "/" {
            prefix.clone()
        } else {
            format!("{prefix}/")
        };
        self.sort.cancel(&prefix);
        self.list
            .del_matching(|k| *k == prefix || k.starts_with(below.as_str()));
        debug!(key = %prefix, "cleared listing cache");
    }

    /// Drop everything cached for a storage.
    pub fn clear_storage(&self, storage: &MountedStorage) {
        self.clear(storage, "/");
        let prefix = storage.mount_path().to_string();
        self.link.del_matching(|k| path::is_sub_path(&prefix, link_path(k)));
    }

    /// Link cache key, scoped to the client address when the link is.
    pub fn link_key(storage: &MountedStorage, actual_path: &str, ip: Option<&str>) -> String {
        match ip {
            Some(ip) => format!("{}{LINK_IP_SEP}{ip}", key(storage, actual_path)),
            None => key(storage, actual_path),
        }
    }

    /// Drop every cached link for a file, address-scoped ones included.
    pub fn del_link(&self, storage: &MountedStorage, actual_path: &str) {
        let plain = key(storage, actual_path);
        let scoped = format!("{plain}{LINK_IP_SEP}");
        self.link
            .del_matching(|k| *k == plain || k.starts_with(scoped.as_str()));
    }

    /// Cancel pending re-sorts.
    pub fn shutdown(&self) {
        self.sort.shutdown();
    }

    fn schedule_sort(&self, storage: &MountedStorage, key: String) {
        let sort = storage.storage().sort;
        let list = Arc::clone(&self.list);
        let target = key.clone();
        self.sort.arm(key, move || {
            list.update(&target, |objs| {
                sort_objs(objs, sort.order_by, sort.order_direction);
                extract_folder(objs, sort.extract_folder);
            });
        });
    }
}

/// Separates a link key from its client address. Never valid in a path.
const LINK_IP_SEP: char = '\0';

/// Strip the address suffix of an address-scoped link key.
fn link_path(key: &str) -> &str {
    key.split_once(LINK_IP_SEP).map_or(key, |(path, _)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryDriver;
    use strata_types::{OrderBy, Storage};

    async fn storage(local_sort: bool) -> MountedStorage {
        let mut storage = Storage::new("/m", "memory")
            .with_addition(serde_json::json!({ "local_sort": local_sort }));
        storage.sort.order_by = Some(OrderBy::Name);
        let mut driver = MemoryDriver::new();
        crate::vfs::Driver::init(&mut driver, &storage).await.unwrap();
        MountedStorage::new(storage, Arc::new(driver))
    }

    fn names(objs: &[Obj]) -> Vec<&str> {
        objs.iter().map(|o| o.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_empty_listing_is_evicted() {
        let cache = FsCache::default();
        let s = storage(false).await;
        cache.set_list(&s, "/d", vec![Obj::file("a", 1)]);
        assert!(cache.get_list(&s, "/d").is_some());
        cache.set_list(&s, "/d", Vec::new());
        assert!(cache.get_list(&s, "/d").is_none());
    }

    #[tokio::test]
    async fn test_add_update_delete_entries() {
        let cache = FsCache::default();
        let s = storage(false).await;
        cache.set_list(&s, "/", vec![Obj::file("b", 1)]);

        cache.add_entry(&s, "/", Obj::dir("sub"));
        cache.add_entry(&s, "/", Obj::file("c", 2));
        assert_eq!(names(&cache.get_list(&s, "/").unwrap()), ["sub", "b", "c"]);

        cache.update_entry(&s, "/", "b", Obj::file("b2", 1));
        assert_eq!(names(&cache.get_list(&s, "/").unwrap()), ["sub", "b2", "c"]);

        cache.set_list(&s, "/sub", vec![Obj::file("x", 1)]);
        cache.delete_entry(&s, "/", &Obj::dir("sub"));
        assert_eq!(names(&cache.get_list(&s, "/").unwrap()), ["b2", "c"]);
        assert!(cache.get_list(&s, "/sub").is_none());
    }

    #[tokio::test]
    async fn test_add_entry_without_cached_listing_is_noop() {
        let cache = FsCache::default();
        let s = storage(false).await;
        cache.add_entry(&s, "/nowhere", Obj::file("a", 1));
        assert!(cache.get_list(&s, "/nowhere").is_none());
    }

    #[tokio::test]
    async fn test_clear_is_segment_aligned() {
        let cache = FsCache::default();
        let s = storage(false).await;
        cache.set_list(&s, "/a", vec![Obj::file("1", 1)]);
        cache.set_list(&s, "/a/b", vec![Obj::file("2", 1)]);
        cache.set_list(&s, "/ab", vec![Obj::file("3", 1)]);
        cache.clear(&s, "/a");
        assert!(cache.get_list(&s, "/a").is_none());
        assert!(cache.get_list(&s, "/a/b").is_none());
        assert!(cache.get_list(&s, "/ab").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_resort() {
        let cache = FsCache::new(Duration::from_secs(10));
        let s = storage(true).await;
        cache.set_list(&s, "/", vec![Obj::file("b", 1), Obj::file("d", 1)]);
        cache.add_entry(&s, "/", Obj::file("a", 1));
        cache.add_entry(&s, "/", Obj::file("c", 1));
        assert_eq!(names(&cache.get_list(&s, "/").unwrap()), ["b", "d", "a", "c"]);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(names(&cache.get_list(&s, "/").unwrap()), ["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_del_link_drops_scoped_keys() {
        let cache = FsCache::default();
        let s = storage(false).await;
        let ttl = Some(Duration::from_secs(60));
        cache.links().set(FsCache::link_key(&s, "/f", None), Link::url("u1"), ttl);
        cache.links().set(FsCache::link_key(&s, "/f", Some("1.2.3.4")), Link::url("u2"), ttl);
        cache.links().set(FsCache::link_key(&s, "/g", None), Link::url("u3"), ttl);
        cache.links().set(FsCache::link_key(&s, "/f:1", None), Link::url("u4"), ttl);
        cache.links().set(FsCache::link_key(&s, "/f:1", Some("::1")), Link::url("u5"), ttl);
        cache.del_link(&s, "/f");
        assert_eq!(cache.links().len(), 3);
        assert!(cache.links().get(&FsCache::link_key(&s, "/f:1", Some("::1"))).is_some());
    }

    #[test]
    fn test_link_path_strips_ip() {
        assert_eq!(link_path("/m/f\u{0}10.0.0.1"), "/m/f");
        assert_eq!(link_path("/m/f\u{0}::1"), "/m/f");
        assert_eq!(link_path("/m/f"), "/m/f");
        assert_eq!(link_path("/m/a:b/f:1"), "/m/a:b/f:1");
    }
}
