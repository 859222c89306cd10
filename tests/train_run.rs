use std::{fmt::Write as _, fs, path::Path};

use image::{Rgb, RgbImage};
use line_net_rust::{
    checkpoint::{checkpoint_path, load_net},
    config::{Config, ModelKind, Resume, UnfreezeStep},
    data::{
        archive::{
            save_archive, ArchivedLine, DatasetEntry, FrameEntry, LineArchive, TrajectoryEntry, RGB,
        },
        image::Pixels,
        LineType, LINE_NUM_ATTR,
    },
    run::{evaluate_checkpoint, train, METRICS_FILE},
    Vol,
};

/// Writes `frames` frame files of `lines` lines each. Instances cycle through
/// 1..=3, classes through 3, 4, 5 and the background class 0.
fn write_frames(dir: &Path, frames: usize, lines: usize) {
    fs::create_dir_all(dir.join("crops")).unwrap();
    for f in 0..frames {
        let mut rows = String::new();
        for l in 0..lines {
            let crop = format!("crops/{f}_{l}.png");
            let shade = (f * 40 + l * 20) as u8;
            RgbImage::from_pixel(10, 8, Rgb([shade, 255 - shade, 30]))
                .save(dir.join(&crop))
                .unwrap();
            for g in 0..LINE_NUM_ATTR {
                write!(rows, "{:.2} ", (l + g) as f32 / 10.0).unwrap();
            }
            let (instance, class) = match l % 4 {
                3 => (0, 0),
                k => (k + 1, k + 3),
            };
            writeln!(rows, "{} {instance} {class} {crop}", l % 4).unwrap();
        }
        fs::write(dir.join(format!("frame_{f:02}.txt")), rows).unwrap();
    }
}

fn line_config(root: &Path) -> Config {
    write_frames(&root.join("train"), 4, 5);
    write_frames(&root.join("test"), 2, 4);

    let mut config = Config::default();
    config.data.train = vec![root.join("train")];
    config.data.val = vec![root.join("test")];
    config.data.test = vec![root.join("test")];
    config.data.min_line_count = 3;
    config.data.max_line_count = 6;
    config.data.img_shape.width = 8;
    config.data.img_shape.height = 8;
    config.training.epochs = 2;
    config.training.workers = 2;
    config.training.max_queue_size = 2;
    config.training.learning_rate = 0.001;
    config.training.log_dir = Some(root.join("logs"));
    config
}

fn metric_rows(log_dir: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(log_dir.join(METRICS_FILE))
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn trains_checkpoints_and_resumes() {
    let root = tempfile::tempdir().unwrap();
    let mut config = line_config(root.path());
    config.model.frozen = vec!["conv1".into()];
    config.training.unfreeze = vec![UnfreezeStep {
        epoch: 0,
        layers: vec!["conv1".into()],
    }];

    let outcome = train(&config).unwrap();
    let log_dir = outcome.log_dir;
    assert_eq!(outcome.history.len(), 2);
    // 2 batches of 2 frames, background lines are served as class 0
    assert_eq!(outcome.history[0].samples, 20);
    assert!(outcome.history.iter().all(|l| l.val_loss.is_some()));

    for epoch in 1..=2 {
        assert!(checkpoint_path(&log_dir, epoch).exists());
        assert!(log_dir.join(format!("inference_{epoch:02}.json")).exists());
    }
    let saved = Config::from_path(&log_dir.join("config.toml")).unwrap();
    assert_eq!(saved.data.train, config.data.train);

    let net = load_net(checkpoint_path(&log_dir, 2)).unwrap();
    assert_eq!(net.is_trainable("conv1"), Some(true));
    assert_eq!(net.classes(), config.data.num_classes());

    config.training.epochs = 3;
    config.training.resume = Some(Resume {
        log_dir: log_dir.clone(),
        epoch: 2,
    });
    let resumed = train(&config).unwrap();
    assert_eq!(resumed.log_dir, log_dir);
    assert_eq!(resumed.history.len(), 1);
    assert_eq!(resumed.history[0].epoch, 2);
    assert!(checkpoint_path(&log_dir, 3).exists());

    let rows = metric_rows(&log_dir);
    let epochs: Vec<_> = rows.iter().map(|r| r["epoch"].as_u64().unwrap()).collect();
    assert_eq!(epochs, [0, 1, 2]);

    let evaluation = evaluate_checkpoint(&config, &checkpoint_path(&log_dir, 3)).unwrap();
    assert_eq!(evaluation.samples, 8);
}

#[test]
fn pretrained_image_weights_seed_the_line_net() {
    let root = tempfile::tempdir().unwrap();

    let mut frames = FrameEntry::new();
    let lines = (0..4u32)
        .map(|l| {
            let line = ArchivedLine {
                img: Pixels::new(6, 4, 3, vec![(l * 50) as u16; 6 * 4 * 3]).unwrap(),
                labels: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, (l % 2 + 3) as f32],
                line_type: LineType::new((l % 4) as u8).unwrap(),
            };
            (l, line)
        })
        .collect();
    frames.insert(RGB.to_string(), lines);
    let mut archive = LineArchive::new();
    let trajectory = TrajectoryEntry::from([(0, frames)]);
    archive.insert("train_0".to_string(), DatasetEntry::from([(0, trajectory)]));
    let archive_path = root.path().join("lines.bin");
    save_archive(&archive_path, &archive).unwrap();

    let mut pretrain = Config::default();
    pretrain.model.kind = ModelKind::Pretrain;
    pretrain.data.pretrain.archives = vec![archive_path];
    pretrain.data.pretrain.horizontal_flip = true;
    pretrain.data.img_shape.width = 8;
    pretrain.data.img_shape.height = 8;
    pretrain.training.epochs = 1;
    pretrain.training.workers = 0;
    pretrain.training.log_dir = Some(root.path().join("pretrain"));
    let outcome = train(&pretrain).unwrap();
    assert_eq!(outcome.history[0].samples, 4);
    let weights = checkpoint_path(&outcome.log_dir, 1);

    let mut config = line_config(root.path());
    config.training.epochs = 1;
    config.training.log_dir = Some(root.path().join("line"));
    config.model.image_weights = Some(weights.clone());
    config.model.frozen = vec!["conv1".into(), "conv2".into(), "conv3".into()];
    let outcome = train(&config).unwrap();

    let mut image_net = load_net(&weights).unwrap();
    let mut trained = load_net(checkpoint_path(&outcome.log_dir, 1)).unwrap();
    assert_eq!(trained.is_trainable("conv2"), Some(false));
    assert_eq!(trained.is_trainable("dense1"), Some(true));

    // frozen blocks still hold the pretrained weights, so copying them again
    // changes nothing
    let mut reloaded = load_net(checkpoint_path(&outcome.log_dir, 1)).unwrap();
    assert_eq!(reloaded.load_weights_by_name(&mut image_net), ["conv1", "conv2", "conv3"]);
    let image = Vol::new(8, 8, 3);
    let side = vec![0.0; LINE_NUM_ATTR + 1];
    assert_eq!(
        trained.forward(&image, &side, false).w,
        reloaded.forward(&image, &side, false).w
    );
}

#[test]
fn config_file_drives_the_run() {
    let root = tempfile::tempdir().unwrap();
    write_frames(&root.path().join("train"), 2, 4);
    let raw = format!(
        r#"
        seed = 5

        [data]
        train = [{train:?}]
        batch_size = 1
        mode = "clusters"
        min_line_count = 2
        max_line_count = 4

        [data.img_shape]
        width = 8
        height = 8
        channels = 3

        [training]
        epochs = 2
        workers = 1
        learning_rate = 0.01
        method = {{ kind = "sgd" }}
        momentum = 0.9
        log_dir = {logs:?}

        [[training.lr_schedule]]
        epoch = 2
        learning_rate = 0.001
        "#,
        train = root.path().join("train").display().to_string(),
        logs = root.path().join("logs").display().to_string(),
    );
    let path = root.path().join("line-net.toml");
    fs::write(&path, raw).unwrap();

    let config = Config::load(Some(&path)).unwrap();
    let outcome = train(&config).unwrap();

    // cluster mode drops the background line of every frame
    assert_eq!(outcome.history[0].samples, 6);
    let rates: Vec<_> = outcome.history.iter().map(|l| l.learning_rate).collect();
    assert_eq!(rates, [0.01, 0.001]);
    assert_eq!(metric_rows(&outcome.log_dir).len(), 2);
}
