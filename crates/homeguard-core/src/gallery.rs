//! Registered-face gallery kept as flat files.
//!
//! Layout: `<root>/<person>/image_<n>.json` holds one embedding and
//! `<root>/<person>/image_<n>.jpg` the face crop it was taken from.

use crate::types::{Embedding, RegisteredFace};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

const EMBEDDING_EXT: &str = "json";
const DEFAULT_PERSON: &str = "unknown";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("invalid person name: {0:?}")]
    InvalidName(String),
    #[error("gallery io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt embedding file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to save face crop: {0}")]
    Image(#[from] image::ImageError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> GalleryError + '_ {
    move |source| GalleryError::Io { path: path.to_path_buf(), source }
}

/// Normalize a person name into a safe directory name.
///
/// Blank names become `"unknown"`. Names that could escape the gallery root
/// are rejected.
pub fn sanitize_person_name(raw: &str) -> Result<String, GalleryError> {
    let name = raw.trim();
    if name.is_empty() {
        return Ok(DEFAULT_PERSON.to_string());
    }
    if name == "."
        || name.contains("..")
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control)
    {
        return Err(GalleryError::InvalidName(raw.to_string()));
    }
    Ok(name.to_string())
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub person: String,
    pub variation: u32,
    pub directory: PathBuf,
}

/// Filesystem-backed gallery of registered faces.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    root: PathBuf,
}

impl GalleryStore {
    /// Open (and create if needed) the gallery rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root })
    }

    /// Read every stored embedding, persons in name order, variations in
    /// filename order. Persons without embeddings are skipped.
    pub fn load(&self) -> Result<Vec<RegisteredFace>, GalleryError> {
        let mut persons: Vec<(String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            let path = entry.path();
            if path.is_dir() {
                persons.push((entry.file_name().to_string_lossy().into_owned(), path));
            }
        }
        persons.sort();

        let mut faces = Vec::new();
        for (person, dir) in persons {
            for (variation, file) in embedding_files(&dir)? {
                let data = fs::read(&file).map_err(io_err(&file))?;
                let embedding: Embedding = serde_json::from_slice(&data)
                    .map_err(|source| GalleryError::Corrupt { path: file.clone(), source })?;
                faces.push(RegisteredFace { person: person.clone(), variation, embedding });
            }
        }

        tracing::debug!(faces = faces.len(), root = %self.root.display(), "gallery loaded");
        Ok(faces)
    }

    /// Store a new variation for `person`: the embedding plus its face crop.
    pub fn register(
        &self,
        person: &str,
        embedding: &Embedding,
        crop: &RgbImage,
    ) -> Result<Registration, GalleryError> {
        let person = sanitize_person_name(person)?;
        let dir = self.root.join(&person);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let variation = embedding_files(&dir)?.len() as u32 + 1;

        let json_path = dir.join(format!("image_{variation}.{EMBEDDING_EXT}"));
        let data = serde_json::to_vec(embedding)
            .map_err(|source| GalleryError::Corrupt { path: json_path.clone(), source })?;
        fs::write(&json_path, data).map_err(io_err(&json_path))?;

        crop.save(dir.join(format!("image_{variation}.jpg")))?;

        tracing::info!(person = %person, variation, "face variation registered");
        Ok(Registration { person, variation, directory: dir })
    }
}

/// Embedding files in `dir` as `(variation, path)`, sorted by filename.
fn embedding_files(dir: &Path) -> Result<Vec<(u32, PathBuf)>, GalleryError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_err(dir))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == EMBEDDING_EXT))
        .collect();
    files.sort();

    Ok(files
        .into_iter()
        .enumerate()
        .map(|(i, path)| {
            let variation = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix("image_"))
                .and_then(|n| n.parse().ok())
                .unwrap_or(i as u32 + 1);
            (variation, path)
        })
        .collect())
}

/// Time-bounded cache over [`GalleryStore::load`].
///
/// An empty gallery is never served from cache.
pub struct GalleryCache {
    store: GalleryStore,
    ttl: Duration,
    cached: Option<(Instant, Vec<RegisteredFace>)>,
}

impl GalleryCache {
    pub fn new(store: GalleryStore, ttl: Duration) -> Self {
        Self { store, ttl, cached: None }
    }

    pub fn store(&self) -> &GalleryStore {
        &self.store
    }

    /// Registered faces, reloading from disk when the cache is stale or empty.
    pub fn faces(&mut self) -> Result<&[RegisteredFace], GalleryError> {
        let fresh = matches!(
            &self.cached,
            Some((at, faces)) if !faces.is_empty() && at.elapsed() < self.ttl
        );
        if !fresh {
            let faces = self.store.load()?;
            self.cached = Some((Instant::now(), faces));
        }
        Ok(self.cached.as_ref().map(|(_, f)| f.as_slice()).unwrap_or(&[]))
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn crop() -> RgbImage {
        RgbImage::from_pixel(160, 160, image::Rgb([10, 20, 30]))
    }

    #[test]
    fn test_sanitize_person_name() {
        assert_eq!(sanitize_person_name("  Alice ").unwrap(), "Alice");
        assert_eq!(sanitize_person_name("   ").unwrap(), "unknown");
        assert!(sanitize_person_name("../etc").is_err());
        assert!(sanitize_person_name("a/b").is_err());
        assert!(sanitize_person_name("a\\b").is_err());
        assert!(sanitize_person_name("bad\nname").is_err());
    }

    #[test]
    fn test_register_numbers_variations() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path().join("registered_faces")).unwrap();

        let first = store.register("alice", &Embedding::new(vec![1.0, 0.0]), &crop()).unwrap();
        let second = store.register("alice", &Embedding::new(vec![0.0, 1.0]), &crop()).unwrap();

        assert_eq!(first.variation, 1);
        assert_eq!(second.variation, 2);
        assert!(second.directory.join("image_2.json").exists());
        assert!(second.directory.join("image_2.jpg").exists());
    }

    #[test]
    fn test_load_orders_persons_and_skips_empty_dirs() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path()).unwrap();

        store.register("zoe", &Embedding::new(vec![1.0]), &crop()).unwrap();
        store.register("adam", &Embedding::new(vec![2.0]), &crop()).unwrap();
        store.register("adam", &Embedding::new(vec![3.0]), &crop()).unwrap();
        fs::create_dir(tmp.path().join("empty")).unwrap();

        let faces = store.load().unwrap();
        let people: Vec<(&str, u32)> = faces.iter().map(|f| (f.person.as_str(), f.variation)).collect();
        assert_eq!(people, vec![("adam", 1), ("adam", 2), ("zoe", 1)]);
        assert_eq!(faces[1].embedding.values, vec![3.0]);
    }

    #[test]
    fn test_load_rejects_corrupt_embedding() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path()).unwrap();
        fs::create_dir(tmp.path().join("eve")).unwrap();
        fs::write(tmp.path().join("eve/image_1.json"), b"not json").unwrap();

        assert!(matches!(store.load(), Err(GalleryError::Corrupt { .. })));
    }

    #[test]
    fn test_cache_serves_until_invalidated() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path()).unwrap();
        store.register("alice", &Embedding::new(vec![1.0]), &crop()).unwrap();

        let mut cache = GalleryCache::new(store.clone(), Duration::from_secs(300));
        assert_eq!(cache.faces().unwrap().len(), 1);

        store.register("bob", &Embedding::new(vec![2.0]), &crop()).unwrap();
        assert_eq!(cache.faces().unwrap().len(), 1, "stale entry served within ttl");

        cache.invalidate();
        assert_eq!(cache.faces().unwrap().len(), 2);
    }

    #[test]
    fn test_cache_reloads_after_ttl() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path()).unwrap();
        store.register("alice", &Embedding::new(vec![1.0]), &crop()).unwrap();

        let mut cache = GalleryCache::new(store.clone(), Duration::from_millis(50));
        assert_eq!(cache.faces().unwrap().len(), 1);

        store.register("bob", &Embedding::new(vec![2.0]), &crop()).unwrap();
        assert_eq!(cache.faces().unwrap().len(), 1);

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.faces().unwrap().len(), 2);
    }

    #[test]
    fn test_cache_does_not_hold_empty_gallery() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path()).unwrap();
        let mut cache = GalleryCache::new(store.clone(), Duration::from_secs(300));

        assert!(cache.faces().unwrap().is_empty());
        store.register("alice", &Embedding::new(vec![1.0]), &crop()).unwrap();
        assert_eq!(cache.faces().unwrap().len(), 1);
    }
}
