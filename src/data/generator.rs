use std::path::{Path, PathBuf};

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::{
    sequence::{Sequence, TrainSample},
    utils::stream_rng,
    vol::Vol,
    Float, LineNetError, Result,
};

use super::{
    archive::{flatten_archive, load_archive, merge_archives, ArchivedSample, LineArchive},
    channel_mean,
    image::{load_bgr, load_depth, preprocess, Pixels},
    labels::{read_label_file, LabelRecord},
    ImageType, LabelFormat, LineType, BGR_MEAN,
};

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub horizontal_flip: bool,
    pub shuffle: bool,
    pub image_type: ImageType,
    pub mean: Vec<Float>,
    /// (width, height) of the emitted images
    pub scale_size: (usize, usize),
    /// batch size used when the generator is driven as a [`Sequence`]
    pub batch_size: usize,
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            horizontal_flip: false,
            shuffle: false,
            image_type: ImageType::Bgr,
            mean: BGR_MEAN.to_vec(),
            scale_size: (227, 227),
            batch_size: 32,
            seed: None,
        }
    }
}

enum Source {
    Paths(Vec<LabelRecord>),
    Archive(Vec<ArchivedSample>),
}

/// A batch as produced by [`ImageDataGenerator::next_batch`].
#[derive(Debug, Clone)]
pub struct ImageBatch {
    pub images: Vec<Vol>,
    pub labels: Vec<Vec<Float>>,
    /// normalized into [-1, 1]
    pub line_types: Vec<Float>,
}

/// Serves preprocessed line crops with their labels, either from label files
/// (images are read from disk per batch) or from line archives (crops are
/// held in memory).
pub struct ImageDataGenerator {
    config: GeneratorConfig,
    mean: Vec<Float>,
    source: Source,
    // order in which samples are served
    access: Vec<usize>,
    pointer: usize,
    epoch: usize,
    rng: StdRng,
}

impl ImageDataGenerator {
    pub fn from_label_files(files: &[PathBuf], config: GeneratorConfig) -> Result<Self> {
        let mut records = Vec::new();
        for file in files {
            records.extend(read_label_file(file)?);
        }
        Self::new(Source::Paths(records), config)
    }

    pub fn from_archives(files: &[PathBuf], config: GeneratorConfig) -> Result<Self> {
        let mut archive = LineArchive::new();
        for file in files {
            merge_archives(&mut archive, load_archive(file)?);
        }
        let samples = flatten_archive(&archive)?;
        if config.image_type == ImageType::BgrD {
            if let Some(sample) = samples.iter().find(|s| s.depth.is_none()) {
                return Err(LineNetError::MissingDepth(sample.key.clone()));
            }
        }
        Self::new(Source::Archive(samples), config)
    }

    fn new(source: Source, config: GeneratorConfig) -> Result<Self> {
        let mean = channel_mean(&config.mean, config.image_type.channels())?;
        let data_size = match &source {
            Source::Paths(records) => records.len(),
            Source::Archive(samples) => samples.len(),
        };
        tracing::info!(data_size, image_type = %config.image_type, "loaded line samples");

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut generator = Self {
            mean,
            source,
            access: (0..data_size).collect(),
            pointer: 0,
            epoch: 0,
            rng,
            config,
        };
        if generator.config.shuffle {
            generator.shuffle_data();
        }
        Ok(generator)
    }

    pub fn data_size(&self) -> usize {
        self.access.len()
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn format(&self) -> LabelFormat {
        match self.source {
            Source::Paths(_) => LabelFormat::Text,
            Source::Archive(_) => LabelFormat::Archive,
        }
    }

    /// Random permutation of the access order.
    pub fn shuffle_data(&mut self) {
        self.access.shuffle(&mut self.rng);
    }

    pub fn reset_pointer(&mut self) {
        self.pointer = 0;
        if self.config.shuffle {
            self.shuffle_data();
        }
    }

    pub fn set_pointer(&mut self, index: usize) {
        self.pointer = index;
    }

    /// Loads the next `batch_size` samples and advances the pointer.
    pub fn next_batch(&mut self, batch_size: usize) -> Result<ImageBatch> {
        let start = self.pointer;
        let end = match start.checked_add(batch_size) {
            Some(end) if end <= self.access.len() => end,
            _ => {
                return Err(LineNetError::EndOfData {
                    pointer: self.pointer,
                    batch_size,
                    len: self.access.len(),
                })
            }
        };
        let mut batch = ImageBatch {
            images: Vec::with_capacity(batch_size),
            labels: Vec::with_capacity(batch_size),
            line_types: Vec::with_capacity(batch_size),
        };
        for position in start..end {
            let flip = self.config.horizontal_flip && self.rng.gen_bool(0.5);
            let (image, labels, line_type) = self.sample(self.access[position], flip)?;
            batch.images.push(image);
            batch.labels.push(labels);
            batch.line_types.push(line_type.normalized());
        }

        self.pointer += batch_size;
        Ok(batch)
    }

    fn sample(&self, idx: usize, flip: bool) -> Result<(Vol, Vec<Float>, LineType)> {
        let (pixels, labels, line_type) = match &self.source {
            Source::Paths(records) => {
                let record = &records[idx];
                (
                    self.read_pixels(&record.path)?,
                    &record.labels,
                    record.line_type,
                )
            }
            Source::Archive(samples) => {
                let sample = &samples[idx];
                let pixels = match (self.config.image_type, &sample.depth) {
                    (ImageType::Bgr, _) => sample.bgr.clone(),
                    (ImageType::BgrD, Some(depth)) => sample.bgr.stack(depth)?,
                    (ImageType::BgrD, None) => {
                        return Err(LineNetError::MissingDepth(sample.key.clone()))
                    }
                };
                (pixels, &sample.labels, sample.line_type)
            }
        };

        let expected = self.format().label_len();
        if labels.len() != expected {
            return Err(LineNetError::LabelShape {
                expected,
                found: labels.len(),
            });
        }

        let image = preprocess(&pixels, flip, self.config.scale_size, &self.mean)?;
        Ok((image, labels.clone(), line_type))
    }

    fn read_pixels(&self, path: &Path) -> Result<Pixels> {
        let bgr = load_bgr(path)?;
        match self.config.image_type {
            ImageType::Bgr => Ok(bgr),
            ImageType::BgrD => {
                let depth_path = depth_path(path);
                if !depth_path.exists() {
                    return Err(LineNetError::MissingDepth(depth_path.display().to_string()));
                }
                bgr.stack(&load_depth(&depth_path)?)
            }
        }
    }
}

/// The depth crop of a line lives next to its rgb crop, with every `rgb` in
/// the path replaced by `depth`.
pub fn depth_path(rgb: &Path) -> PathBuf {
    PathBuf::from(rgb.to_string_lossy().replace("rgb", "depth"))
}

impl Sequence for ImageDataGenerator {
    fn len(&self) -> usize {
        self.access.len() / self.config.batch_size.max(1)
    }

    /// Target is the class (last label), the side vector is the normalized
    /// line type followed by the remaining labels.
    fn get(&self, index: usize) -> Result<Vec<TrainSample>> {
        let batch_size = self.config.batch_size.max(1);
        let start = index * batch_size;
        let end = (start + batch_size).min(self.access.len());

        let mut rng = stream_rng(self.config.seed, self.epoch, index);
        let mut samples = Vec::with_capacity(end.saturating_sub(start));
        for position in start..end {
            let flip = self.config.horizontal_flip && rng.gen_bool(0.5);
            let (image, labels, line_type) = self.sample(self.access[position], flip)?;
            let (class, rest) = labels
                .split_last()
                .ok_or(LineNetError::LabelShape {
                    expected: self.format().label_len(),
                    found: 0,
                })?;

            if *class < 0.0 || class.fract() != 0.0 {
                return Err(LineNetError::InvalidClass(*class));
            }

            let mut side = Vec::with_capacity(labels.len());
            side.push(line_type.normalized());
            side.extend_from_slice(rest);
            samples.push(TrainSample::new(image, side, *class as usize));
        }
        Ok(samples)
    }

    fn on_epoch_end(&mut self) {
        self.epoch += 1;
        self.reset_pointer();
    }
}
