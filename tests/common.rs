#![allow(dead_code)]
use ndarray::{arr1, arr2};
use nnv_propgen::dataset::ImageFormat;
use nnv_propgen::dnn::{Dense, DNN};
use nnv_propgen::{GenerationConfig, Normalization, PgdConfig};
use std::path::Path;

pub const TWO_PIXELS: ImageFormat = ImageFormat {
    channels: 1,
    height: 1,
    width: 2,
    num_classes: 2,
};

/// Predicts class 0 when the first pixel is brighter, class 1 otherwise.
pub fn make_dnn() -> DNN {
    DNN::new(vec![Box::new(Dense::from_parts(
        arr2(&[[1., -1.], [-1., 1.]]),
        arr1(&[0., 0.]),
    ))])
}

pub fn write_batch(path: &Path, records: &[(u8, [u8; 2])]) {
    let bytes: Vec<u8> = records
        .iter()
        .flat_map(|(label, pixels)| std::iter::once(*label).chain(pixels.iter().copied()))
        .collect();
    std::fs::write(path, bytes).unwrap();
}

/// Correct and robust, correct and robust, misclassified, correct but fragile.
pub fn write_default_batch(path: &Path) {
    write_batch(
        path,
        &[(0, [153, 102]), (1, [102, 153]), (0, [102, 153]), (0, [128, 127])],
    );
}

pub fn make_config(dir: &Path, epsilons: Vec<f64>) -> GenerationConfig {
    GenerationConfig {
        model: dir.join("model.json"),
        manifest_model: "onnx/two_pixel.onnx".into(),
        dataset: dir.join("batch.bin"),
        image_format: TWO_PIXELS,
        dataset_title: "TWOPIXEL".to_string(),
        output_dir: dir.join("properties"),
        epsilons,
        num_images: 10,
        seed: Some(0),
        deterministic: true,
        timeout_secs: 120,
        normalization: Normalization::identity(1),
        attack: PgdConfig {
            step_size: 0.02,
            num_steps: 40,
            num_restarts: 2,
            ..PgdConfig::default()
        },
    }
}
