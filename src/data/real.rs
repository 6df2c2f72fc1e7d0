use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::info;

use crate::data::dataset::SegDataset;
use crate::data::image_io::{load_mask, load_rgb, CropBox, Framing};
use crate::data::sample::Sample;
use crate::error::{Result, SegError};

/// The real-image test sources this crate knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealDatasetKind {
    /// CUB-200 birds.
    Cub,
    Dog,
    Car,
    /// Side-scan sonar.
    Sss,
}

impl RealDatasetKind {
    pub fn name(&self) -> &'static str {
        match self {
            RealDatasetKind::Cub => "cub",
            RealDatasetKind::Dog => "dog",
            RealDatasetKind::Car => "car",
            RealDatasetKind::Sss => "sss",
        }
    }
}

impl fmt::Display for RealDatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RealDatasetKind {
    type Err = SegError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cub" => Ok(RealDatasetKind::Cub),
            "dog" => Ok(RealDatasetKind::Dog),
            "car" => Ok(RealDatasetKind::Car),
            "sss" => Ok(RealDatasetKind::Sss),
            other => Err(SegError::UnknownDataset(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSplit {
    Train,
    Test,
    All,
}

/// Where the list of sample keys comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSource {
    /// CUB-style tables: `<id> <path>`, `<id> <split>` and `<id> x y w h`.
    SplitTable { images: &'static str, splits: &'static str, bboxes: &'static str },
    /// One key per line, prefixed by the directory of its split.
    KeyList {
        train: &'static str,
        test: &'static str,
        train_prefix: &'static str,
        test_prefix: &'static str,
    },
    /// Every image file below a directory, recursively.
    DirectoryScan { dir: &'static str },
}

/// Static description of one real dataset.
///
/// Templates are relative to the dataset root; `{key}` is the sample key and
/// `{stem}` the key without its extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub dir_name: &'static str,
    pub image_template: &'static str,
    pub mask_template: &'static str,
    pub index_source: IndexSource,
    /// Why a center-cropped evaluation pass cannot be built, if it cannot.
    pub center_crop_unsupported: Option<&'static str>,
}

pub fn describe(kind: RealDatasetKind) -> DatasetLayout {
    let key_list = |train, test| IndexSource::KeyList {
        train,
        test,
        train_prefix: "data_mrcnn/train/resized/",
        test_prefix: "data_mrcnn/test/resized/",
    };
    match kind {
        RealDatasetKind::Cub => DatasetLayout {
            dir_name: "birds",
            image_template: "images/{key}.jpg",
            mask_template: "segmentations/{key}.png",
            index_source: IndexSource::SplitTable {
                images: "images.txt",
                splits: "train_val_test_split.txt",
                bboxes: "bounding_boxes.txt",
            },
            center_crop_unsupported: Some("should use the original images, the processed split is already resized"),
        },
        RealDatasetKind::Dog => DatasetLayout {
            dir_name: "dogs",
            image_template: "{key}_resized.png",
            mask_template: "{key}_maskresized.png",
            index_source: key_list("data_tr_sel.txt", "data_te_sel.txt"),
            center_crop_unsupported: Some("should use the original images, the processed split is already resized"),
        },
        RealDatasetKind::Car => DatasetLayout {
            dir_name: "cars",
            image_template: "{key}_resized.png",
            mask_template: "{key}_maskresized.png",
            index_source: key_list("data_mrcnn_train_select.txt", "data_mrcnn_test_select.txt"),
            center_crop_unsupported: Some("masks of the original car images are not available"),
        },
        RealDatasetKind::Sss => DatasetLayout {
            dir_name: "sss",
            image_template: "images/{key}",
            mask_template: "masks/{stem}.png",
            index_source: IndexSource::DirectoryScan { dir: "images" },
            center_crop_unsupported: Some("no center-cropped variant exists for sonar data"),
        },
    }
}

/// Fails with `NotImplemented` when `kind` has no center-cropped test pass.
pub fn check_center_crop(kind: RealDatasetKind) -> Result<()> {
    match describe(kind).center_crop_unsupported {
        Some(reason) => Err(SegError::NotImplemented(format!("center-cropped {kind} test split: {reason}"))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    key: String,
    bbox: Option<[i64; 4]>,
}

/// Any of the real datasets, driven entirely by its [`DatasetLayout`].
#[derive(Debug, Clone)]
pub struct RealDataset {
    kind: RealDatasetKind,
    root: PathBuf,
    layout: DatasetLayout,
    entries: Vec<Entry>,
    scale: u32,
}

impl RealDataset {
    pub fn open(kind: RealDatasetKind, root: &Path, split: DataSplit, scale: u32) -> Result<RealDataset> {
        let layout = describe(kind);
        if !root.is_dir() {
            return Err(SegError::config(format!("{kind} dataset root {} does not exist", root.display())));
        }
        let entries = match &layout.index_source {
            IndexSource::SplitTable { images, splits, bboxes } => {
                read_split_table(&root.join(images), &root.join(splits), &root.join(bboxes), split)?
            }
            IndexSource::KeyList { train, test, train_prefix, test_prefix } => {
                let mut keys = Vec::new();
                if matches!(split, DataSplit::Train | DataSplit::All) {
                    keys.extend(read_key_list(&root.join(train), train_prefix)?);
                }
                if matches!(split, DataSplit::Test | DataSplit::All) {
                    keys.extend(read_key_list(&root.join(test), test_prefix)?);
                }
                keys.into_iter().map(|key| Entry { key, bbox: None }).collect()
            }
            IndexSource::DirectoryScan { dir } => scan_images(&root.join(dir))?
                .into_iter()
                .map(|key| Entry { key, bbox: None })
                .collect(),
        };
        info!(dataset = %kind, samples = entries.len(), root = %root.display(), "opened real dataset");
        Ok(RealDataset { kind, root: root.to_path_buf(), layout, entries, scale })
    }

    pub fn kind(&self) -> RealDatasetKind {
        self.kind
    }

    pub fn key(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.key.as_str())
    }

    fn resolve(&self, template: &str, key: &str) -> PathBuf {
        let stem = Path::new(key).with_extension("");
        let rel = template
            .replace("{key}", key)
            .replace("{stem}", &stem.to_string_lossy());
        self.root.join(rel)
    }
}

impl SegDataset for RealDataset {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn load(&self, index: usize) -> Result<Sample> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| SegError::decode(index, "index out of range"))?;
        let image_path = self.resolve(self.layout.image_template, &entry.key);
        let mask_path = self.resolve(self.layout.mask_template, &entry.key);

        let framing = |path: &Path| -> Result<Framing> {
            Ok(match entry.bbox {
                Some(bbox) => {
                    let (w, h) = image::image_dimensions(path)?;
                    Framing::BoxResize(CropBox::around_bbox(w, h, bbox), self.scale)
                }
                None => Framing::Resize(self.scale),
            })
        };

        let load = || -> Result<Sample> {
            let (image, h, w) = load_rgb(&image_path, framing(&image_path)?)?;
            let (mask, mh, mw) = load_mask(&mask_path, framing(&mask_path)?)?;
            if (mh, mw) != (h, w) {
                return Err(SegError::shape(format!("mask is {mh}x{mw}, image is {h}x{w}")));
            }
            Sample::new(image, mask, 3, h, w)
        };
        load().map_err(|e| SegError::decode(index, e))
    }
}

fn read_table(path: &Path) -> Result<HashMap<String, Vec<String>>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace().map(str::to_string);
            let id = cols.next()?;
            Some((id, cols.collect()))
        })
        .collect())
}

fn read_split_table(images: &Path, splits: &Path, bboxes: &Path, split: DataSplit) -> Result<Vec<Entry>> {
    let text = fs::read_to_string(images)?;
    let split_of = read_table(splits)?;
    let bbox_of = read_table(bboxes)?;

    let mut entries = Vec::new();
    for line in text.lines() {
        let mut cols = line.split_whitespace();
        let (Some(id), Some(file)) = (cols.next(), cols.next()) else {
            continue;
        };
        let tag = split_of
            .get(id)
            .and_then(|c| c.first())
            .ok_or_else(|| SegError::config(format!("image id {id} missing from {}", splits.display())))?;
        let keep = match split {
            DataSplit::Train => tag == "0",
            DataSplit::Test => tag == "2",
            DataSplit::All => true,
        };
        if !keep {
            continue;
        }
        let bbox = bbox_of
            .get(id)
            .filter(|c| c.len() >= 4)
            .ok_or_else(|| SegError::config(format!("image id {id} missing from {}", bboxes.display())))?;
        let mut parsed = [0i64; 4];
        for (slot, raw) in parsed.iter_mut().zip(bbox) {
            *slot = raw
                .parse::<f64>()
                .map_err(|_| SegError::config(format!("bad bounding box value `{raw}` for id {id}")))? as i64;
        }
        let key = file.rsplit_once('.').map_or(file, |(stem, _)| stem).to_string();
        entries.push(Entry { key, bbox: Some(parsed) });
    }
    Ok(entries)
}

fn read_key_list(path: &Path, prefix: &str) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|key| format!("{prefix}{key}"))
        .collect())
}

fn scan_images(dir: &Path) -> Result<Vec<String>> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(base, &path, out)?;
                continue;
            }
            let ext = path.extension().map(|e| e.to_string_lossy().to_lowercase());
            if matches!(ext.as_deref(), Some("jpg" | "jpeg" | "png")) {
                if let Ok(rel) = path.strip_prefix(base) {
                    out.push(rel.to_string_lossy().into_owned());
                }
            }
        }
        Ok(())
    }

    let mut keys = Vec::new();
    walk(dir, dir, &mut keys)?;
    keys.sort();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names_only() {
        assert_eq!("car".parse::<RealDatasetKind>().unwrap(), RealDatasetKind::Car);
        assert!(matches!("flowers".parse::<RealDatasetKind>(), Err(SegError::UnknownDataset(_))));
    }

    #[test]
    fn center_crop_is_unsupported_everywhere() {
        for kind in [RealDatasetKind::Cub, RealDatasetKind::Dog, RealDatasetKind::Car, RealDatasetKind::Sss] {
            assert!(matches!(check_center_crop(kind), Err(SegError::NotImplemented(_))));
        }
    }

    #[test]
    fn split_table_filters_and_keeps_bboxes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("images.txt"), "1 a/x.jpg\n2 a/y.jpg\n3 b/z.jpg\n").unwrap();
        fs::write(root.join("train_val_test_split.txt"), "1 0\n2 2\n3 2\n").unwrap();
        fs::write(root.join("bounding_boxes.txt"), "1 0 0 4 4\n2 1.0 2.0 3.0 4.0\n3 0 0 1 1\n").unwrap();

        let data = RealDataset::open(RealDatasetKind::Cub, root, DataSplit::Test, 8).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.key(0), Some("a/y"));
        assert_eq!(data.entries[0].bbox, Some([1, 2, 3, 4]));
    }

    #[test]
    fn key_lists_get_split_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data_tr_sel.txt"), "0001\n").unwrap();
        fs::write(dir.path().join("data_te_sel.txt"), "0002\n0003\n").unwrap();

        let all = RealDataset::open(RealDatasetKind::Dog, dir.path(), DataSplit::All, 8).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.key(0), Some("data_mrcnn/train/resized/0001"));
        assert_eq!(all.key(2), Some("data_mrcnn/test/resized/0003"));
        assert_eq!(
            all.resolve(all.layout.mask_template, "k"),
            dir.path().join("k_maskresized.png")
        );
    }

    #[test]
    fn sonar_masks_follow_image_stems() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("images/sub")).unwrap();
        fs::create_dir_all(root.join("masks/sub")).unwrap();
        image::RgbImage::new(4, 4).save(root.join("images/sub/s1.jpg")).unwrap();
        image::RgbImage::from_pixel(4, 4, image::Rgb([255, 255, 255]))
            .save(root.join("masks/sub/s1.png"))
            .unwrap();

        let data = RealDataset::open(RealDatasetKind::Sss, root, DataSplit::Test, 2).unwrap();
        assert_eq!(data.key(0), Some("sub/s1.jpg"));
        let sample = data.load(0).unwrap();
        assert_eq!(sample.mask, vec![1; 4]);
    }
}
