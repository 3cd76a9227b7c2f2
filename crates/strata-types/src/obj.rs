//! The uniform object model.
//!
//! Every driver reports files and directories as [`Obj`]. Listings handed
//! back to callers pass through [`wrap_obj_names`] so display names are
//! normalized without touching the cached snapshot they were cloned from.

use std::cmp::Ordering;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::storage::{ExtractFolder, OrderBy, OrderDirection};

/// A file or directory.
///
/// `id` is the driver's native identifier (may be empty), `path` the
/// driver-relative path (may be empty when the driver addresses by id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obj {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
    pub is_dir: bool,
}

impl Obj {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            id: String::new(),
            path: String::new(),
            name: name.into(),
            size,
            modified: SystemTime::UNIX_EPOCH,
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            path: String::new(),
            name: name.into(),
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
            is_dir: true,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = modified;
        self
    }

    /// Name as shown to callers.
    pub fn display_name(&self) -> &str {
        self.name.trim()
    }
}

/// Wire shape of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjResp {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: SystemTime,
}

impl From<&Obj> for ObjResp {
    fn from(obj: &Obj) -> Self {
        Self {
            name: obj.display_name().to_string(),
            size: obj.size,
            is_dir: obj.is_dir,
            modified: obj.modified,
        }
    }
}

/// Normalize display names on a listing that is about to leave the kernel.
pub fn wrap_obj_names(objs: &mut [Obj]) {
    for obj in objs {
        let trimmed = obj.display_name();
        if trimmed.len() != obj.name.len() {
            obj.name = trimmed.to_string();
        }
    }
}

/// Compare names the way people expect: digit runs compare by value.
///
/// `file2` sorts before `file10`. Ties on numeric value fall back to the
/// shorter run (fewer leading zeros) first, then plain byte order.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let si = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let sj = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let ra = trim_zeros(&a[si..i]);
            let rb = trim_zeros(&b[sj..j]);
            let ord = ra
                .len()
                .cmp(&rb.len())
                .then_with(|| ra.cmp(rb))
                .then_with(|| (i - si).cmp(&(j - sj)));
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            let ord = a[i].to_ascii_lowercase().cmp(&b[j].to_ascii_lowercase());
            if ord != Ordering::Equal {
                return ord;
            }
            i += 1;
            j += 1;
        }
    }
    (a.len() - i).cmp(&(b.len() - j)).then_with(|| a.cmp(b))
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
    let start = digits.iter().position(|&d| d != b'0').unwrap_or(digits.len());
    &digits[start..]
}

/// Sort a listing in place. A missing `order_by` leaves the order untouched.
pub fn sort_objs(objs: &mut [Obj], order_by: Option<OrderBy>, direction: Option<OrderDirection>) {
    let Some(order_by) = order_by else {
        return;
    };
    let desc = direction == Some(OrderDirection::Desc);
    objs.sort_by(|a, b| {
        let ord = match order_by {
            OrderBy::Name => natural_cmp(&a.name, &b.name),
            OrderBy::Size => a.size.cmp(&b.size),
            OrderBy::Modified => a.modified.cmp(&b.modified),
        };
        if desc { ord.reverse() } else { ord }
    });
}

/// Stable partition of directories to the front or back.
pub fn extract_folder(objs: &mut [Obj], extract: Option<ExtractFolder>) {
    match extract {
        Some(ExtractFolder::Front) => objs.sort_by_key(|o| !o.is_dir),
        Some(ExtractFolder::Back) => objs.sort_by_key(|o| o.is_dir),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn names(objs: &[Obj]) -> Vec<&str> {
        objs.iter().map(|o| o.name.as_str()).collect()
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("file2", "file10"), Ordering::Less);
        assert_eq!(natural_cmp("a", "B"), Ordering::Less);
        assert_eq!(natural_cmp("x01", "x1"), Ordering::Greater);
        assert_eq!(natural_cmp("same", "same"), Ordering::Equal);
        assert_eq!(natural_cmp("abc", "abcd"), Ordering::Less);
    }

    #[test]
    fn test_sort_by_name_desc() {
        let mut objs = vec![Obj::file("v2", 1), Obj::file("v10", 1), Obj::file("v1", 1)];
        sort_objs(&mut objs, Some(OrderBy::Name), Some(OrderDirection::Desc));
        assert_eq!(names(&objs), ["v10", "v2", "v1"]);
    }

    #[test]
    fn test_sort_by_modified() {
        let t = SystemTime::UNIX_EPOCH;
        let mut objs = vec![
            Obj::file("new", 1).with_modified(t + Duration::from_secs(20)),
            Obj::file("old", 1).with_modified(t + Duration::from_secs(10)),
        ];
        sort_objs(&mut objs, Some(OrderBy::Modified), None);
        assert_eq!(names(&objs), ["old", "new"]);
    }

    #[test]
    fn test_extract_folder_is_stable() {
        let mut objs = vec![
            Obj::file("f1", 1),
            Obj::dir("d1"),
            Obj::file("f2", 1),
            Obj::dir("d2"),
        ];
        extract_folder(&mut objs, Some(ExtractFolder::Front));
        assert_eq!(names(&objs), ["d1", "d2", "f1", "f2"]);
        extract_folder(&mut objs, Some(ExtractFolder::Back));
        assert_eq!(names(&objs), ["f1", "f2", "d1", "d2"]);
    }

    #[test]
    fn test_wrap_obj_names_trims() {
        let mut objs = vec![Obj::file("  padded.txt ", 3), Obj::dir("clean")];
        wrap_obj_names(&mut objs);
        assert_eq!(names(&objs), ["padded.txt", "clean"]);
    }

    #[test]
    fn test_obj_resp_shape() {
        let resp = ObjResp::from(&Obj::file("a.txt", 42));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["name"], "a.txt");
        assert_eq!(json["size"], 42);
        assert_eq!(json["is_dir"], false);
    }
}
