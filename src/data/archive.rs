//! Line archives: crops and labels of every detected line, nested by
//! dataset, trajectory, frame, image type and line number.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use crate::{data::LabelFormat, Float, LineNetError, Result};

use super::{image::Pixels, LineType};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ArchivedLine {
    pub img: Pixels,
    pub labels: Vec<Float>,
    pub line_type: LineType,
}

/// image type (`rgb` or `depth`) → line number → line
pub type FrameEntry = BTreeMap<String, BTreeMap<u32, ArchivedLine>>;
/// frame number → frame
pub type TrajectoryEntry = BTreeMap<u32, FrameEntry>;
/// trajectory number → trajectory
pub type DatasetEntry = BTreeMap<u32, TrajectoryEntry>;
/// dataset name → dataset
pub type LineArchive = BTreeMap<String, DatasetEntry>;

pub const RGB: &str = "rgb";
pub const DEPTH: &str = "depth";

/// A flattened rgb line with its depth crop, if the archive has one.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedSample {
    pub key: String,
    pub bgr: Pixels,
    pub depth: Option<Pixels>,
    pub labels: Vec<Float>,
    pub line_type: LineType,
}

pub fn load_archive(path: impl AsRef<Path>) -> Result<LineArchive> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LineNetError::io(path, e))?;
    bincode::deserialize_from(BufReader::new(file)).map_err(|source| LineNetError::Archive {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_archive(path: impl AsRef<Path>, archive: &LineArchive) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| LineNetError::io(path, e))?;
    bincode::serialize_into(BufWriter::new(file), archive).map_err(|source| {
        LineNetError::Archive {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Deep merge of `other` into `into`. Lines present in both are taken from
/// `other`.
pub fn merge_archives(into: &mut LineArchive, other: LineArchive) {
    for (name, dataset) in other {
        let into = into.entry(name).or_default();
        for (trajectory, frames) in dataset {
            let into = into.entry(trajectory).or_default();
            for (frame, image_types) in frames {
                let into = into.entry(frame).or_default();
                for (image_type, lines) in image_types {
                    into.entry(image_type).or_default().extend(lines);
                }
            }
        }
    }
}

/// Walks the archive in key order and yields one sample per rgb line.
pub fn flatten_archive(archive: &LineArchive) -> Result<Vec<ArchivedSample>> {
    let expected = LabelFormat::Archive.label_len();
    let mut samples = Vec::new();
    for (name, dataset) in archive {
        for (trajectory, frames) in dataset {
            for (frame, image_types) in frames {
                let Some(rgb) = image_types.get(RGB) else {
                    continue;
                };
                let depth = image_types.get(DEPTH);
                for (line, entry) in rgb {
                    if entry.labels.len() != expected {
                        return Err(LineNetError::LabelShape {
                            expected,
                            found: entry.labels.len(),
                        });
                    }
                    samples.push(ArchivedSample {
                        key: format!("{name}/{trajectory}/{frame}/{line}"),
                        bgr: entry.img.clone(),
                        depth: depth.and_then(|d| d.get(line)).map(|d| d.img.clone()),
                        labels: entry.labels.clone(),
                        line_type: entry.line_type,
                    });
                }
            }
        }
    }
    Ok(samples)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn line(value: u16, channels: usize, class: Float) -> ArchivedLine {
        ArchivedLine {
            img: Pixels::new(2, 2, channels, vec![value; 4 * channels]).unwrap(),
            labels: vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, class],
            line_type: LineType::new(1).unwrap(),
        }
    }

    /// One dataset, one trajectory, frames 0 and 1 with two lines each.
    /// Frame 0 carries depth crops.
    pub(crate) fn archive() -> LineArchive {
        let mut frames = TrajectoryEntry::new();
        for frame in 0..2u32 {
            let mut entry = FrameEntry::new();
            let rgb = (0..2u32)
                .map(|l| (l, line((frame * 2 + l) as u16, 3, l as Float)))
                .collect();
            entry.insert(RGB.to_string(), rgb);
            if frame == 0 {
                let depth = (0..2u32).map(|l| (l, line(100, 1, 0.0))).collect();
                entry.insert(DEPTH.to_string(), depth);
            }
            frames.insert(frame, entry);
        }
        let mut archive = LineArchive::new();
        archive.insert("train_0".to_string(), DatasetEntry::from([(1, frames)]));
        archive
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.bin");
        save_archive(&path, &archive()).unwrap();
        assert_eq!(load_archive(&path).unwrap(), archive());

        std::fs::write(&path, b"garbage").unwrap();
        assert!(matches!(
            load_archive(&path).unwrap_err(),
            LineNetError::Archive { .. }
        ));
    }

    #[test]
    fn flatten_pairs_depth_by_line() {
        let samples = flatten_archive(&archive()).unwrap();
        let keys: Vec<_> = samples.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(
            keys,
            ["train_0/1/0/0", "train_0/1/0/1", "train_0/1/1/0", "train_0/1/1/1"]
        );
        assert!(samples[0].depth.is_some());
        assert!(samples[2].depth.is_none());
        assert_eq!(samples[3].bgr.data()[0], 3);
        assert!(samples.iter().all(|s| s.labels.len() == 7));
    }

    #[test]
    fn flatten_rejects_short_labels() {
        let mut archive = archive();
        let frame = archive.get_mut("train_0").unwrap().get_mut(&1).unwrap();
        let lines = frame.get_mut(&0).unwrap().get_mut(RGB).unwrap();
        lines.get_mut(&0).unwrap().labels.pop();
        assert!(matches!(
            flatten_archive(&archive).unwrap_err(),
            LineNetError::LabelShape {
                expected: 7,
                found: 6
            }
        ));
    }

    #[test]
    fn merge_keeps_both_sides() {
        let mut into = archive();
        let mut other = LineArchive::new();
        let mut frames = TrajectoryEntry::new();
        frames.insert(
            1,
            FrameEntry::from([(
                RGB.to_string(),
                BTreeMap::from([(0, line(50, 3, 9.0)), (5, line(60, 3, 9.0))]),
            )]),
        );
        other.insert("train_0".to_string(), DatasetEntry::from([(1, frames)]));
        other.insert("val_0".to_string(), DatasetEntry::new());

        merge_archives(&mut into, other);
        assert!(into.contains_key("val_0"));
        let rgb = &into["train_0"][&1][&1][RGB];
        assert_eq!(rgb.len(), 3);
        assert_eq!(rgb[&0].img.data()[0], 50);
        // untouched frame keeps its depth
        assert!(into["train_0"][&1][&0].contains_key(DEPTH));
    }
}
