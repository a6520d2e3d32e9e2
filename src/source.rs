use crate::page::PageRef;
use anyhow::{anyhow, bail, Context, Result};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Chars;
use walkdir::WalkDir;

/// File extensions treated as page images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "tif", "tiff"];

/// Hands the pager an ordered list of pages and the raw bytes behind each.
pub trait PageSource: Send + Sync {
    fn ordered_pages(&self) -> Result<Vec<PageRef>>;
    fn read_bytes(&self, page: &PageRef) -> Result<Vec<u8>>;
}

pub fn is_image_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Numeric-aware ordering: runs of digits compare by value, so `2.png`
/// sorts before `10.png`. Other characters compare case-insensitively.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_digits = take_digits(&mut left);
                let r_digits = take_digits(&mut right);
                let l_trim = l_digits.trim_start_matches('0');
                let r_trim = r_digits.trim_start_matches('0');
                let ord = l_trim
                    .len()
                    .cmp(&r_trim.len())
                    .then_with(|| l_trim.cmp(r_trim));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

/// Loose image files in a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    recursive: bool,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            root: root.into(),
            recursive,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PageSource for DirectorySource {
    fn ordered_pages(&self) -> Result<Vec<PageRef>> {
        if !self.root.is_dir() {
            bail!("{} is not a directory", self.root.display());
        }
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(max_depth) {
            let entry = entry
                .with_context(|| format!("failed to list {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            let relative = path
                .strip_prefix(&self.root)
                .unwrap_or(path.as_path())
                .to_string_lossy()
                .into_owned();
            if is_image_name(&relative) {
                files.push((relative, path));
            }
        }
        files.sort_by(|(a, _), (b, _)| natural_cmp(a, b));
        Ok(files
            .into_iter()
            .map(|(_, path)| PageRef::File(path))
            .collect())
    }

    fn read_bytes(&self, page: &PageRef) -> Result<Vec<u8>> {
        match page {
            PageRef::File(path) => {
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))
            }
            PageRef::Entry(name) => Err(anyhow!("{name} is not a file in {}", self.root.display())),
        }
    }
}

/// Named in-memory entries, e.g. the members of an already extracted archive.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(name.into(), bytes);
    }

    pub fn with_entry(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PageSource for MemorySource {
    fn ordered_pages(&self) -> Result<Vec<PageRef>> {
        let mut names: Vec<&String> = self
            .entries
            .keys()
            .filter(|name| is_image_name(name))
            .collect();
        names.sort_by(|a, b| natural_cmp(a, b));
        Ok(names
            .into_iter()
            .map(|name| PageRef::Entry(name.clone()))
            .collect())
    }

    fn read_bytes(&self, page: &PageRef) -> Result<Vec<u8>> {
        match page {
            PageRef::Entry(name) => self
                .entries
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("no entry named {name}")),
            PageRef::File(path) => Err(anyhow!("{} is not an in-memory entry", path.display())),
        }
    }
}
