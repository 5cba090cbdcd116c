// Speech endpoint helpers: model resolution and temp-file response bodies

use std::io;
use std::path::{Component, Path};

use actix_web::web::Bytes;
use futures::stream::{self, Stream};
use log::{debug, warn};
use tokio::io::AsyncReadExt;

use crate::engine_cache::ModelKey;
use crate::file_utils::TempFile;

const CHUNK_SIZE: usize = 64 * 1024;

/// Map a requested model name to the configuration document to load
///
/// `<manifests_dir>/<name>.json` when the name is a plain file name and the
/// document exists; the default configuration otherwise. Existing documents
/// are keyed by their canonical path, so every spelling of one document
/// shares one engine.
pub fn resolve_model(requested: Option<&str>, manifests_dir: &Path, default_config: &Path) -> ModelKey {
    let default = || canonical_key(default_config);

    let name = match requested.map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => return default(),
    };

    let mut components = Path::new(name).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\']) && !name.contains("..");
    if !plain {
        warn!("Rejected model name '{}', using default configuration", name);
        return default();
    }

    let file_name = if name.ends_with(".json") {
        name.to_string()
    } else {
        format!("{}.json", name)
    };
    let candidate = manifests_dir.join(file_name);
    if candidate.is_file() {
        canonical_key(&candidate)
    } else {
        debug!(
            "No configuration for model '{}' in {}, using default",
            name,
            manifests_dir.display()
        );
        default()
    }
}

/// Key a configuration document by its canonical path; a missing document
/// keeps its path as given and fails later as not found
fn canonical_key(path: &Path) -> ModelKey {
    match std::fs::canonicalize(path) {
        Ok(canonical) => ModelKey::new(canonical),
        Err(_) => ModelKey::new(path),
    }
}

/// Stream a temporary file as a response body, removing it once the body is
/// finished or dropped
pub fn temp_file_body(
    file: tokio::fs::File,
    guard: TempFile,
) -> impl Stream<Item = Result<Bytes, io::Error>> {
    stream::unfold(Some((file, guard)), |state| async move {
        let (mut file, guard) = state?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        match file.read(&mut buffer).await {
            Ok(0) => {
                // Close before the guard removes the file
                drop(file);
                drop(guard);
                None
            }
            Ok(read) => {
                buffer.truncate(read);
                Some((Ok(Bytes::from(buffer)), Some((file, guard))))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}
