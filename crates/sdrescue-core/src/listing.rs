//! Directory enumeration for the listing endpoint
//!
//! Children are pulled from the volume one at a time and encoded as a JSON
//! array chunk by chunk, so memory use does not grow with directory size.

use serde::Serialize;
use std::io;

use crate::error::{RecoveryError, Result};
use crate::storage::{ChildIter, EntryKind, Volume};

/// One element of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Full path of the child on the medium
    pub name: String,
}

/// Validate `dir` and start enumerating it.
///
/// `dir` is the raw request argument; `None` means it was not supplied.
/// An empty `dir` names nothing. A relative one is taken from the root so
/// that entry names are always absolute.
pub fn open_listing(volume: &dyn Volume, dir: Option<&str>) -> Result<DirectoryListing> {
    let dir = dir.ok_or(RecoveryError::Argument("dir"))?;
    if dir.is_empty() {
        return Err(RecoveryError::Path(String::new()));
    }

    let dir = if dir.starts_with('/') {
        dir.to_string()
    } else {
        format!("/{}", dir)
    };

    if dir != "/" && !volume.exists(&dir) {
        return Err(RecoveryError::Path(dir));
    }

    if !volume.open(&dir)?.is_directory() {
        return Err(RecoveryError::NotADirectory(dir));
    }

    let children = volume.read_dir(&dir)?;
    Ok(DirectoryListing { dir, children })
}

/// Lazy enumeration of a validated directory
pub struct DirectoryListing {
    dir: String,
    children: ChildIter,
}

impl DirectoryListing {
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Encode the listing as a chunked JSON array
    pub fn into_json_chunks(self) -> JsonArrayChunks {
        JsonArrayChunks {
            listing: self,
            state: ArrayState::Open,
        }
    }

    fn child_path(&self, name: &str) -> String {
        if self.dir.ends_with('/') {
            format!("{}{}", self.dir, name)
        } else {
            format!("{}/{}", self.dir, name)
        }
    }
}

impl Iterator for DirectoryListing {
    type Item = io::Result<DirectoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let child = self.children.next()?;
        Some(child.map(|child| DirectoryEntry {
            name: self.child_path(&child.name),
            kind: child.kind,
        }))
    }
}

impl std::fmt::Debug for DirectoryListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryListing")
            .field("dir", &self.dir)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    Open,
    Entries { written: usize },
    Close { written: usize },
    Finished,
}

/// Producer of a well-formed JSON array, one chunk per entry.
///
/// The opening bracket, separators and closing bracket are emitted by the
/// producer itself; nothing is buffered beyond the current entry.
pub struct JsonArrayChunks {
    listing: DirectoryListing,
    state: ArrayState,
}

impl Iterator for JsonArrayChunks {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ArrayState::Open => {
                    self.state = ArrayState::Entries { written: 0 };
                    return Some(b"[".to_vec());
                }
                ArrayState::Entries { written } => match self.listing.next() {
                    Some(Ok(entry)) => {
                        let mut chunk = Vec::with_capacity(entry.name.len() + 32);
                        if written > 0 {
                            chunk.push(b',');
                        }
                        if let Err(e) = serde_json::to_writer(&mut chunk, &entry) {
                            tracing::warn!("Skipping unencodable entry {}: {}", entry.name, e);
                            continue;
                        }
                        self.state = ArrayState::Entries {
                            written: written + 1,
                        };
                        return Some(chunk);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(
                            "Listing of {} cut short after {} entries: {}",
                            self.listing.dir,
                            written,
                            e
                        );
                        self.state = ArrayState::Close { written };
                    }
                    None => self.state = ArrayState::Close { written },
                },
                ArrayState::Close { written } => {
                    tracing::debug!("Listed {} entries of {}", written, self.listing.dir);
                    self.state = ArrayState::Finished;
                    return Some(b"]".to_vec());
                }
                ArrayState::Finished => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChildEntry, Handle};
    use std::collections::HashMap;

    /// Volume whose directories yield children in a fixed order
    struct FixedVolume {
        dirs: HashMap<String, Vec<ChildEntry>>,
        files: Vec<String>,
        fail_after: Option<usize>,
    }

    impl FixedVolume {
        fn photos() -> Self {
            let mut dirs = HashMap::new();
            dirs.insert("/".to_string(), vec![child("photos", EntryKind::Directory)]);
            dirs.insert(
                "/photos".to_string(),
                vec![child("a.jpg", EntryKind::File), child("sub", EntryKind::Directory)],
            );
            dirs.insert("/photos/sub".to_string(), vec![]);
            Self {
                dirs,
                files: vec!["/photos/a.jpg".to_string()],
                fail_after: None,
            }
        }
    }

    fn child(name: &str, kind: EntryKind) -> ChildEntry {
        ChildEntry {
            name: name.to_string(),
            kind,
        }
    }

    impl Volume for FixedVolume {
        fn open(&self, path: &str) -> Result<Handle> {
            if self.dirs.contains_key(path) {
                Ok(Handle::directory())
            } else if self.files.iter().any(|f| f == path) {
                Ok(Handle::file(0, Box::new(io::empty())))
            } else {
                Err(RecoveryError::Path(path.to_string()))
            }
        }

        fn exists(&self, path: &str) -> bool {
            self.dirs.contains_key(path) || self.files.iter().any(|f| f == path)
        }

        fn read_dir(&self, path: &str) -> Result<ChildIter> {
            let children = self.dirs.get(path).cloned().unwrap_or_default();
            let fail_after = self.fail_after;
            Ok(Box::new(children.into_iter().enumerate().map(
                move |(i, c)| match fail_after {
                    Some(n) if i >= n => Err(io::Error::new(io::ErrorKind::Other, "bad block")),
                    _ => Ok(c),
                },
            )))
        }
    }

    fn render(listing: DirectoryListing) -> String {
        let bytes: Vec<u8> = listing.into_json_chunks().flatten().collect();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_photos_scenario() {
        let volume = FixedVolume::photos();
        let listing = open_listing(&volume, Some("/photos")).unwrap();
        assert_eq!(
            render(listing),
            r#"[{"type":"file","name":"/photos/a.jpg"},{"type":"dir","name":"/photos/sub"}]"#
        );
    }

    #[test]
    fn test_root_listing_paths() {
        let volume = FixedVolume::photos();
        let listing = open_listing(&volume, Some("/")).unwrap();
        assert_eq!(render(listing), r#"[{"type":"dir","name":"/photos"}]"#);
    }

    #[test]
    fn test_empty_directory() {
        let volume = FixedVolume::photos();
        let listing = open_listing(&volume, Some("/photos/sub")).unwrap();
        assert_eq!(render(listing), "[]");
    }

    #[test]
    fn test_chunks_are_per_entry() {
        let volume = FixedVolume::photos();
        let chunks: Vec<Vec<u8>> = open_listing(&volume, Some("/photos"))
            .unwrap()
            .into_json_chunks()
            .collect();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], b"[");
        assert_eq!(chunks[2][0], b',');
        assert_eq!(chunks[3], b"]");
    }

    #[test]
    fn test_validation_errors() {
        let volume = FixedVolume::photos();
        assert!(matches!(
            open_listing(&volume, None),
            Err(RecoveryError::Argument("dir"))
        ));
        assert!(matches!(
            open_listing(&volume, Some("/missing")),
            Err(RecoveryError::Path(_))
        ));
        assert!(matches!(
            open_listing(&volume, Some("/photos/a.jpg")),
            Err(RecoveryError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_empty_dir_is_bad_path() {
        let volume = FixedVolume::photos();
        assert!(matches!(
            open_listing(&volume, Some("")),
            Err(RecoveryError::Path(_))
        ));
    }

    #[test]
    fn test_relative_dir_lists_absolute_names() {
        let volume = FixedVolume::photos();
        let listing = open_listing(&volume, Some("photos")).unwrap();
        assert_eq!(listing.dir(), "/photos");
        assert_eq!(
            render(listing),
            r#"[{"type":"file","name":"/photos/a.jpg"},{"type":"dir","name":"/photos/sub"}]"#
        );
    }

    #[test]
    fn test_enumeration_error_keeps_array_well_formed() {
        let mut volume = FixedVolume::photos();
        volume.fail_after = Some(1);
        let listing = open_listing(&volume, Some("/photos")).unwrap();

        let text = render(listing);
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_names_are_escaped() {
        let mut volume = FixedVolume::photos();
        volume
            .dirs
            .insert("/q".to_string(), vec![child("say \"hi\".txt", EntryKind::File)]);
        let listing = open_listing(&volume, Some("/q")).unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&render(listing)).unwrap();
        assert_eq!(parsed[0]["name"], "/q/say \"hi\".txt");
    }
}
