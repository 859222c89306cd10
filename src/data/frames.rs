//! Framewise line sequences: every frame of a trajectory is a set of lines
//! with geometry, line type, instance and semantic class, plus an image crop
//! per line.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::{
    sequence::{Sequence, TrainSample},
    utils::stream_rng,
    vol::Vol,
    Float, LineNetError, Result,
};

use super::{
    channel_mean,
    image::{load_bgr, preprocess},
    ImageShape, LineType, BGR_MEAN, LINE_NUM_ATTR,
};

#[derive(Debug, Clone, PartialEq)]
pub struct FrameLine {
    pub geometry: Vec<Float>,
    pub line_type: LineType,
    pub instance: u32,
    pub class: u32,
    /// absolute path of the line crop
    pub crop: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub path: PathBuf,
    pub lines: Vec<FrameLine>,
}

/// Reads one frame file. Rows are
/// `<15 geometry values> <line type> <instance> <class> <crop path>`,
/// crop paths are relative to the frame file. Blank rows and rows starting
/// with `#` are skipped.
pub fn read_frame(path: impl AsRef<Path>) -> Result<Frame> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| LineNetError::io(path, e))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut lines = Vec::new();
    for (i, row) in raw.lines().enumerate() {
        let row = row.trim();
        if row.is_empty() || row.starts_with('#') {
            continue;
        }
        let items: Vec<&str> = row.split_whitespace().collect();
        if items.len() != LINE_NUM_ATTR + 4 {
            return Err(LineNetError::parse(
                path,
                i + 1,
                format!("expected {} columns, found {}", LINE_NUM_ATTR + 4, items.len()),
            ));
        }

        let float = |s: &str| {
            s.parse::<Float>()
                .map_err(|e| LineNetError::parse(path, i + 1, format!("'{s}': {e}")))
        };
        let int = |s: &str| {
            s.parse::<u32>()
                .map_err(|e| LineNetError::parse(path, i + 1, format!("'{s}': {e}")))
        };

        let geometry = items[..LINE_NUM_ATTR]
            .iter()
            .map(|s| float(*s))
            .collect::<Result<Vec<_>>>()?;
        lines.push(FrameLine {
            geometry,
            line_type: LineType::try_from(float(items[LINE_NUM_ATTR])?)?,
            instance: int(items[LINE_NUM_ATTR + 1])?,
            class: int(items[LINE_NUM_ATTR + 2])?,
            crop: base.join(items[LINE_NUM_ATTR + 3]),
        });
    }

    Ok(Frame {
        path: path.to_path_buf(),
        lines,
    })
}

/// Reads every `*.txt` frame file of a directory, in file name order.
pub fn read_frame_dir(dir: impl AsRef<Path>) -> Result<Vec<Frame>> {
    let dir = dir.as_ref();
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| LineNetError::io(dir, e))? {
        let path = entry.map_err(|e| LineNetError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "txt") {
            paths.push(path);
        }
    }
    paths.sort();
    paths.iter().map(read_frame).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceMode {
    /// Every line is served; background lines are flagged.
    #[default]
    Lines,
    /// Background lines are dropped at load time.
    Clusters,
}

#[derive(Debug, Clone)]
pub struct FrameConfig {
    pub batch_size: usize,
    pub bg_classes: Vec<u32>,
    pub valid_classes: Vec<u32>,
    pub mode: SequenceMode,
    pub shuffle: bool,
    pub data_augmentation: bool,
    pub img_shape: ImageShape,
    pub min_line_count: usize,
    pub max_line_count: usize,
    pub max_cluster_count: Option<usize>,
    pub mean: Vec<Float>,
    pub seed: Option<u64>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        let bg_classes = vec![0, 1, 2, 20, 22];
        let valid_classes = (0..41).filter(|c| !bg_classes.contains(c)).collect();
        Self {
            batch_size: 2,
            bg_classes,
            valid_classes,
            mode: SequenceMode::Lines,
            shuffle: false,
            data_augmentation: false,
            img_shape: ImageShape::default(),
            min_line_count: 30,
            max_line_count: 160,
            max_cluster_count: Some(15),
            mean: BGR_MEAN.to_vec(),
            seed: None,
        }
    }
}

/// Tensors of one frame, padded to `max_line_count` lines.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// `max_line_count × 15`, row major
    pub geometry: Vec<Float>,
    /// normalized line types
    pub line_types: Vec<Float>,
    pub valid: Vec<bool>,
    pub background: Vec<bool>,
    /// 1.. in order of appearance, 0 for background and padding
    pub instances: Vec<u32>,
    /// 1 + position in the valid classes, 0 for background and padding
    pub classes: Vec<usize>,
    pub crops: Vec<Vol>,
    /// number of real (unpadded) lines
    pub line_count: usize,
}

impl FrameData {
    pub fn line_geometry(&self, line: usize) -> &[Float] {
        &self.geometry[line * LINE_NUM_ATTR..(line + 1) * LINE_NUM_ATTR]
    }
}

#[derive(Debug, Clone)]
pub struct FrameBatch {
    pub frames: Vec<FrameData>,
}

pub struct FrameSequence {
    config: FrameConfig,
    mean: Vec<Float>,
    frames: Vec<Frame>,
    order: Vec<usize>,
    epoch: usize,
    rng: StdRng,
}

impl FrameSequence {
    pub fn new(dirs: &[PathBuf], config: FrameConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(LineNetError::Config("batch_size must be positive".into()));
        }
        if config.img_shape.channels != 3 {
            return Err(LineNetError::Config(format!(
                "line crops are bgr images, got {} channels",
                config.img_shape.channels
            )));
        }
        let mean = channel_mean(&config.mean, config.img_shape.channels)?;

        let mut frames = Vec::new();
        let mut skipped = 0;
        for dir in dirs {
            for mut frame in read_frame_dir(dir)? {
                if config.mode == SequenceMode::Clusters {
                    frame
                        .lines
                        .retain(|l| !is_background(&config, l.class));
                }
                if frame.lines.len() < config.min_line_count {
                    skipped += 1;
                    continue;
                }
                frames.push(frame);
            }
        }
        tracing::info!(
            frames = frames.len(),
            skipped,
            mode = ?config.mode,
            "loaded line frames"
        );

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut order: Vec<usize> = (0..frames.len()).collect();
        if config.shuffle {
            order.shuffle(&mut rng);
        }

        Ok(Self {
            config,
            mean,
            frames,
            order,
            epoch: 0,
            rng,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Loads the frames of batch `index`.
    pub fn frame_batch(&self, index: usize) -> Result<FrameBatch> {
        let batch_size = self.config.batch_size;
        if index >= Sequence::len(self) {
            return Err(LineNetError::EndOfData {
                pointer: index * batch_size,
                batch_size,
                len: self.frames.len(),
            });
        }

        let mut rng = stream_rng(self.config.seed, self.epoch, index);
        self.order[index * batch_size..(index + 1) * batch_size]
            .iter()
            .map(|&i| self.frame_data(&self.frames[i], &mut rng))
            .collect::<Result<Vec<_>>>()
            .map(|frames| FrameBatch { frames })
    }

    fn frame_data(&self, frame: &Frame, rng: &mut StdRng) -> Result<FrameData> {
        let config = &self.config;
        let max = config.max_line_count;
        let shape = config.img_shape;

        let mut lines: Vec<&FrameLine> = frame.lines.iter().collect();
        if config.data_augmentation {
            lines.shuffle(rng);
        }
        // after the shuffle this keeps a random subset
        lines.truncate(max);

        let mut data = FrameData {
            geometry: vec![0.0; max * LINE_NUM_ATTR],
            line_types: vec![0.0; max],
            valid: vec![false; max],
            background: vec![false; max],
            instances: vec![0; max],
            classes: vec![0; max],
            crops: Vec::with_capacity(max),
            line_count: lines.len(),
        };

        let mut instances: HashMap<u32, u32> = HashMap::new();
        for (i, line) in lines.iter().enumerate() {
            data.geometry[i * LINE_NUM_ATTR..(i + 1) * LINE_NUM_ATTR]
                .copy_from_slice(&line.geometry);
            data.line_types[i] = line.line_type.normalized();

            let class = self.class_index(line.class);
            data.classes[i] = class.unwrap_or(0);
            data.background[i] = class.is_none();
            data.valid[i] = true;
            if class.is_some() {
                let next = instances.len() as u32 + 1;
                let instance = *instances.entry(line.instance).or_insert(next);
                match config.max_cluster_count {
                    Some(limit) if instance as usize > limit => data.valid[i] = false,
                    _ => data.instances[i] = instance,
                }
            }

            let flip = config.data_augmentation && rng.gen_bool(0.5);
            let pixels = load_bgr(&line.crop)?;
            data.crops.push(preprocess(
                &pixels,
                flip,
                (shape.width, shape.height),
                &self.mean,
            )?);
        }
        data.crops
            .resize(max, Vol::zeros(shape.width, shape.height, shape.channels));

        Ok(data)
    }

    /// None for background, otherwise 1 + position in the valid classes.
    fn class_index(&self, class: u32) -> Option<usize> {
        if is_background(&self.config, class) {
            return None;
        }
        self.config
            .valid_classes
            .iter()
            .position(|c| *c == class)
            .map(|p| p + 1)
    }
}

// classes that are neither background nor valid count as background
fn is_background(config: &FrameConfig, class: u32) -> bool {
    config.bg_classes.contains(&class) || !config.valid_classes.contains(&class)
}

impl Sequence for FrameSequence {
    fn len(&self) -> usize {
        self.frames.len() / self.config.batch_size
    }

    /// One sample per valid line: the crop, geometry and normalized line type
    /// as side input, the class index as target.
    fn get(&self, index: usize) -> Result<Vec<TrainSample>> {
        let batch = self.frame_batch(index)?;
        let mut samples = Vec::new();
        for frame in batch.frames {
            for (i, crop) in frame.crops.iter().enumerate().take(frame.line_count) {
                if !frame.valid[i] {
                    continue;
                }
                let mut side = Vec::with_capacity(LINE_NUM_ATTR + 1);
                side.extend_from_slice(frame.line_geometry(i));
                side.push(frame.line_types[i]);
                samples.push(TrainSample::new(crop.clone(), side, frame.classes[i]));
            }
        }
        Ok(samples)
    }

    fn on_epoch_end(&mut self) {
        self.epoch += 1;
        if self.config.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::BTreeSet, fmt::Write as _};

    use image::Rgb;

    use super::*;

    /// Writes `frames` frame files into `dir`. Each entry lists
    /// `(instance, class)` per line; crops are 8×6 images.
    pub(crate) fn write_frames(dir: &Path, frames: &[Vec<(u32, u32)>]) {
        std::fs::create_dir_all(dir.join("crops")).unwrap();
        for (f, lines) in frames.iter().enumerate() {
            let mut rows = String::from("# geometry line_type instance class crop\n");
            for (l, (instance, class)) in lines.iter().enumerate() {
                let crop = format!("crops/{f}_{l}.png");
                image::RgbImage::from_pixel(8, 6, Rgb([l as u8 * 10, 0, 0]))
                    .save(dir.join(&crop))
                    .unwrap();
                for g in 0..LINE_NUM_ATTR {
                    write!(rows, "{} ", (f * 100 + l * 10 + g) as Float / 100.0).unwrap();
                }
                writeln!(rows, "{} {instance} {class} {crop}", l % 4).unwrap();
            }
            std::fs::write(dir.join(format!("frame_{f:03}.txt")), rows).unwrap();
        }
    }

    pub(crate) fn small_config() -> FrameConfig {
        FrameConfig {
            batch_size: 1,
            img_shape: ImageShape {
                width: 4,
                height: 3,
                channels: 3,
            },
            min_line_count: 2,
            max_line_count: 5,
            max_cluster_count: None,
            seed: Some(123),
            ..FrameConfig::default()
        }
    }

    #[test]
    fn reads_frame_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &[vec![(7, 3), (7, 3), (9, 0)]]);

        let frames = read_frame_dir(dir.path()).unwrap();
        assert_eq!(frames.len(), 1);
        let lines = &frames[0].lines;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].geometry.len(), LINE_NUM_ATTR);
        assert!((lines[1].geometry[2] - 0.12).abs() < 1e-6);
        assert_eq!(lines[2].line_type.value(), 2);
        assert_eq!((lines[2].instance, lines[2].class), (9, 0));
        assert_eq!(lines[0].crop, dir.path().join("crops/0_0.png"));
    }

    #[test]
    fn malformed_rows_report_the_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.txt");
        std::fs::write(&path, "\n1 2 3\n").unwrap();
        assert!(matches!(
            read_frame(&path).unwrap_err(),
            LineNetError::Parse { line: 2, .. }
        ));
    }

    #[test]
    fn line_mode_flags_background_and_pads() {
        let dir = tempfile::tempdir().unwrap();
        // class 0 is background, 3 and 4 are valid
        write_frames(dir.path(), &[vec![(7, 3), (2, 0), (9, 4), (7, 3)]]);

        let seq = FrameSequence::new(&[dir.path().to_path_buf()], small_config()).unwrap();
        assert_eq!(seq.len(), 1);
        let batch = seq.frame_batch(0).unwrap();
        let frame = &batch.frames[0];

        assert_eq!(frame.line_count, 4);
        assert_eq!(frame.geometry.len(), 5 * LINE_NUM_ATTR);
        assert_eq!(frame.valid, [true, true, true, true, false]);
        assert_eq!(frame.background, [false, true, false, false, false]);
        assert_eq!(frame.instances, [1, 0, 2, 1, 0]);
        // 3 and 4 are the first two valid classes
        assert_eq!(frame.classes, [1, 0, 2, 1, 0]);
        assert_eq!(frame.crops.len(), 5);
        assert!(frame.crops[4].w.iter().all(|w| *w == 0.0));
        assert_eq!(frame.line_geometry(4), &[0.0; LINE_NUM_ATTR]);

        assert!(seq.frame_batch(1).is_err());
    }

    #[test]
    fn cluster_mode_drops_background() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(
            dir.path(),
            &[
                vec![(7, 3), (2, 0), (9, 4)],
                // only one line left after dropping background
                vec![(1, 3), (2, 1), (3, 2)],
            ],
        );

        let config = FrameConfig {
            mode: SequenceMode::Clusters,
            ..small_config()
        };
        let seq = FrameSequence::new(&[dir.path().to_path_buf()], config).unwrap();
        assert_eq!(seq.frame_count(), 1);
        let frame = &seq.frame_batch(0).unwrap().frames[0];
        assert_eq!(frame.line_count, 2);
        assert!(frame.background.iter().all(|b| !b));
        assert_eq!(frame.instances, [1, 2, 0, 0, 0]);
    }

    #[test]
    fn cluster_limit_invalidates_extra_instances() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &[vec![(5, 3), (6, 3), (7, 3), (5, 3)]]);

        let config = FrameConfig {
            max_cluster_count: Some(2),
            ..small_config()
        };
        let seq = FrameSequence::new(&[dir.path().to_path_buf()], config).unwrap();
        let frame = &seq.frame_batch(0).unwrap().frames[0];
        assert_eq!(frame.valid, [true, true, false, true, false]);
        assert_eq!(frame.instances, [1, 2, 0, 1, 0]);
    }

    #[test]
    fn augmentation_keeps_a_subset_of_lines() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<_> = (0..8).map(|i| (i, 3)).collect();
        write_frames(dir.path(), &[lines]);

        let config = FrameConfig {
            data_augmentation: true,
            ..small_config()
        };
        let seq = FrameSequence::new(&[dir.path().to_path_buf()], config).unwrap();
        let frame = &seq.frame_batch(0).unwrap().frames[0];
        assert_eq!(frame.line_count, 5);
        assert!(frame.valid.iter().all(|v| *v));

        // geometry rows are still distinct lines of the frame
        let rows: BTreeSet<_> = (0..5)
            .map(|i| (frame.line_geometry(i)[0] * 100.0).round() as i64)
            .collect();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r % 10 == 0 && *r < 80));
        // every line got its own dense instance id
        let ids: BTreeSet<_> = frame.instances.iter().copied().collect();
        assert_eq!(ids, (1..=5).collect());
    }

    #[test]
    fn sequence_serves_valid_lines() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(
            dir.path(),
            &[vec![(7, 3), (2, 0), (9, 4)], vec![(1, 5), (1, 5)]],
        );

        let config = FrameConfig {
            batch_size: 2,
            ..small_config()
        };
        let seq = FrameSequence::new(&[dir.path().to_path_buf()], config).unwrap();
        assert_eq!(seq.len(), 1);

        let samples = seq.get(0).unwrap();
        assert_eq!(samples.len(), 5);
        let targets: Vec<_> = samples.iter().map(|s| s.target).collect();
        assert_eq!(targets, [1, 0, 2, 3, 3]);
        assert_eq!(samples[0].side.len(), LINE_NUM_ATTR + 1);
        assert_eq!(samples[0].side[LINE_NUM_ATTR], -1.0);
        assert_eq!(samples[0].image.sx(), 4);
    }

    #[test]
    fn epoch_end_reshuffles_frames() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<_> = (0..12).map(|_| vec![(1, 3), (2, 3)]).collect();
        write_frames(dir.path(), &frames);

        let config = FrameConfig {
            shuffle: true,
            ..small_config()
        };
        let mut seq = FrameSequence::new(&[dir.path().to_path_buf()], config).unwrap();
        let before = seq.order.clone();
        seq.on_epoch_end();
        assert_ne!(seq.order, before);
        let sorted: BTreeSet<_> = seq.order.iter().copied().collect();
        assert_eq!(sorted, (0..12).collect());
    }
}
