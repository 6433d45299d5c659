use burn::backend::{Autodiff, NdArray, ndarray::NdArrayDevice};
use burn::tensor::{Distribution, Tensor, cast::ToElement};
use rust_pose::PoseError;
use rust_pose::commands;
use rust_pose::config::PoseHeadConfig;
use rust_pose::data::PoseBatcher;
use rust_pose::keypoints::{BBoxMeta, Keypoint, PoseSample, Visibility};
use rust_pose::models::KeypointHead;

type B = NdArray<f32>;

fn config_path(name: &str) -> String {
    format!("{}/config/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn samples(num_keypoints: usize) -> Vec<PoseSample> {
    let bboxes = [
        BBoxMeta {
            center: [320.0, 240.0],
            scale: [150.0, 200.0],
        },
        BBoxMeta {
            center: [100.0, 400.0],
            scale: [96.0, 128.0],
        },
    ];

    bboxes
        .iter()
        .enumerate()
        .map(|(i, bbox)| {
            let keypoints = (0..num_keypoints)
                .map(|k| {
                    let visibility = if k == 3 { Visibility::NotLabeled } else { Visibility::Visible };
                    Keypoint::new(20.0 + 9.0 * k as f32 + 5.0 * i as f32, 30.0 + 12.0 * k as f32, visibility)
                })
                .collect();
            PoseSample::new(keypoints, *bbox)
        })
        .collect()
}

#[test]
fn every_shipped_config_builds() {
    let device = NdArrayDevice::default();
    for name in [
        "heatmap_msra_mse.json",
        "heatmap_megvii_ohkm.json",
        "combined_iou.json",
        "simcc_kl.json",
        "regression_wing.json",
    ] {
        commands::check::<B>(&config_path(name), &device).unwrap();
    }
}

#[test]
fn roundtrip_recovers_image_coordinates() {
    let device = NdArrayDevice::default();
    let samples: Vec<PoseSample> =
        serde_json::from_str(&std::fs::read_to_string(config_path("samples.json")).unwrap()).unwrap();

    for (name, tolerance) in [
        ("regression_wing.json", 1e-3),
        ("simcc_kl.json", 0.5),
        ("combined_iou.json", 1e-2),
        ("heatmap_msra_mse.json", 2.0),
    ] {
        let instances = commands::roundtrip::<B>(&config_path(name), &config_path("samples.json"), &device).unwrap();
        assert_eq!(instances.len(), samples.len());

        for (instance, sample) in instances.iter().zip(&samples) {
            for (decoded, kp) in instance.keypoints.iter().zip(&sample.keypoints) {
                if !kp.visibility.is_labeled() {
                    continue;
                }
                let expected = sample.bbox.to_image([kp.x, kp.y], [192, 256]);
                assert!(
                    (decoded[0] - expected[0]).abs() <= tolerance && (decoded[1] - expected[1]).abs() <= tolerance,
                    "{name}: decoded {decoded:?}, expected {expected:?}"
                );
            }
        }
    }
}

#[test]
fn roundtrip_with_missing_samples_file() {
    let device = NdArrayDevice::default();
    assert!(matches!(
        commands::roundtrip::<B>(&config_path("heatmap_msra_mse.json"), "./no/such/samples.json", &device),
        Err(PoseError::Io(_))
    ));
}

#[test]
fn heads_train_and_predict_from_config() {
    let device = NdArrayDevice::default();
    let samples = samples(17);
    let bboxes: Vec<BBoxMeta> = samples.iter().map(|s| s.bbox).collect();

    for (name, feats_hw) in [
        ("heatmap_msra_mse.json", [64, 48]),
        ("heatmap_megvii_ohkm.json", [16, 12]),
        ("combined_iou.json", [64, 48]),
        ("simcc_kl.json", [8, 6]),
        ("regression_wing.json", [4, 4]),
    ] {
        let config = PoseHeadConfig::from_file(&config_path(name)).unwrap();
        let head = config.init::<Autodiff<B>>(&device).unwrap();
        let levels = config
            .batcher::<Autodiff<B>>()
            .unwrap()
            .batch_levels(&samples, &device)
            .unwrap();

        let feats = Tensor::<Autodiff<B>, 4>::random(
            [2, 32, feats_hw[0], feats_hw[1]],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );

        let loss = head.loss_levels(feats.clone(), &levels).unwrap();
        let value = loss.clone().into_scalar().to_f32();
        assert!(value.is_finite() && value >= 0.0, "{name}: loss {value}");
        let _grads = loss.backward();

        let instances = head.predict(feats, &bboxes).unwrap();
        assert_eq!(instances.len(), 2);
        assert!(instances.iter().all(|i| i.num_keypoints() == 17), "{name}");
    }
}

#[test]
fn multilevel_config_encodes_every_blur_level() {
    let device = NdArrayDevice::default();
    let config = PoseHeadConfig::from_file(&config_path("heatmap_megvii_ohkm.json")).unwrap();
    let head = config.init::<B>(&device).unwrap();
    assert_eq!(head.loss_fn().name(), "CompoundLoss");
    assert_eq!(head.loss_fn().max_level(), Some(4));

    let batcher = config.batcher::<B>().unwrap();
    assert_eq!(batcher.num_levels(), 5);
    let levels = batcher.batch_levels(&samples(17), &device).unwrap();
    assert_eq!(levels.len(), 5);

    // a head reading only the last level cannot serve the compound loss
    let feats = Tensor::<B, 4>::zeros([2, 32, 16, 12], &device);
    assert!(matches!(head.loss(feats.clone(), &levels[4]), Err(PoseError::Shape { .. })));
    let value = head.loss_levels(feats, &levels).unwrap().into_scalar().to_f32();
    assert!(value.is_finite() && value > 0.0);
}

#[test]
fn keypoint_count_mismatch_is_reported() {
    let device = NdArrayDevice::default();
    let head = PoseHeadConfig::from_file(&config_path("heatmap_msra_mse.json"))
        .unwrap()
        .init::<B>(&device)
        .unwrap();
    let batch = PoseBatcher::<B>::new(head.codec().clone())
        .batch(&samples(5), &device)
        .unwrap();

    let feats = Tensor::<B, 4>::zeros([2, 32, 64, 48], &device);
    assert!(matches!(head.loss(feats, &batch), Err(PoseError::Shape { .. })));
}
