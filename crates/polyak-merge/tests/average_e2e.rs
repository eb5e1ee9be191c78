use std::collections::HashMap;
use std::path::{Path, PathBuf};

use polyak_merge::{
    run_average, AverageBuilder, AverageConfig, AverageError, CheckpointLoader, IterRange,
    OutputDtype, ParamArray, SafetensorsLoader,
};
use safetensors::tensor::TensorView;
use safetensors::Dtype;

/// Write an f32 checkpoint with the given tensors.
fn write_checkpoint(path: &Path, tensors: &[(&str, Vec<usize>, Vec<f32>)]) {
    let bytes: Vec<(String, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|(name, shape, values)| {
            (
                name.to_string(),
                shape.clone(),
                values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            )
        })
        .collect();
    let views: HashMap<String, TensorView<'_>> = bytes
        .iter()
        .map(|(name, shape, data)| {
            (
                name.clone(),
                TensorView::new(Dtype::F32, shape.clone(), data).unwrap(),
            )
        })
        .collect();
    safetensors::serialize_to_file(&views, &None, path).unwrap();
}

fn snapshot(dir: &Path, iteration: u32, scale: f32, with_bias: bool) -> PathBuf {
    let path = dir.join(format!("lenet_iter_{iteration}.safetensors"));
    let mut tensors = vec![
        ("conv1.weight", vec![2, 2], vec![scale, 2.0 * scale, 3.0 * scale, 4.0 * scale]),
        ("ip1.weight", vec![3], vec![scale; 3]),
    ];
    if with_bias {
        tensors.push(("conv1.bias", vec![2], vec![scale, -scale]));
    }
    write_checkpoint(&path, &tensors);
    path
}

fn load(path: &Path) -> polyak_merge::ParameterSet {
    SafetensorsLoader::new().load(path).unwrap()
}

#[test]
fn test_prefix_range_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    snapshot(dir.path(), 100, 1.0, true);
    snapshot(dir.path(), 200, 2.0, true);
    snapshot(dir.path(), 300, 6.0, true);
    // Outside the range, must not be averaged.
    snapshot(dir.path(), 400, 100.0, true);

    let prefix = dir.path().join("lenet").to_string_lossy().into_owned();
    let output = dir.path().join("out/lenet_polyak.safetensors");

    let report = AverageBuilder::new()
        .prefix_range(prefix, IterRange::new(100, 400, 100).unwrap())
        .output(&output)
        .run()
        .unwrap();

    assert_eq!(report.checkpoints, 3);
    assert_eq!(report.parameters, 2);
    assert_eq!(report.tensors, 3);

    let averaged = load(&output);
    let conv1 = averaged.get("conv1").unwrap();
    assert_eq!(conv1[0].name, "conv1.weight");
    assert_eq!(conv1[0].data.shape(), &[2, 2]);
    assert_eq!(conv1[0].data.as_slice(), &[3.0, 6.0, 9.0, 12.0]);
    assert_eq!(conv1[1].data.as_slice(), &[3.0, -3.0]);
    assert_eq!(averaged.get("ip1").unwrap()[0].data.as_slice(), &[3.0; 3]);
}

#[test]
fn test_explicit_files_with_missing_blob() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.safetensors");
    let b = dir.path().join("b.safetensors");
    write_checkpoint(&a, &[("w", vec![1], vec![1.0]), ("b", vec![1], vec![0.0])]);
    write_checkpoint(&b, &[("w", vec![1], vec![3.0])]);

    let output = dir.path().join("avg.safetensors");
    let config = AverageConfig {
        weight_files: Some(vec![a, b]),
        output: Some(output.clone()),
        dtype: OutputDtype::Float32,
        ..Default::default()
    };
    run_average(&config).unwrap();

    let averaged = load(&output);
    assert_eq!(averaged.get("w").unwrap()[0].data.as_slice(), &[2.0]);
    assert_eq!(averaged.get("b").unwrap()[0].data.as_slice(), &[0.0]);
}

#[test]
fn test_shape_mismatch_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.safetensors");
    let b = dir.path().join("b.safetensors");
    write_checkpoint(&a, &[("fc.weight", vec![2], vec![1.0, 2.0])]);
    write_checkpoint(&b, &[("fc.weight", vec![3], vec![1.0, 2.0, 3.0])]);

    let output = dir.path().join("avg.safetensors");
    let err = AverageBuilder::new()
        .add_checkpoint(a)
        .add_checkpoint(b)
        .output(&output)
        .run()
        .unwrap_err();

    assert!(err.is_shape_mismatch());
    assert!(err.to_string().contains("fc"));
    assert!(!output.exists());
}

#[test]
fn test_differently_named_blobs_are_not_mixed() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.safetensors");
    let b = dir.path().join("b.safetensors");
    write_checkpoint(
        &a,
        &[("fc.weight", vec![2], vec![1.0, 1.0]), ("fc.bias", vec![2], vec![0.0, 0.0])],
    );
    write_checkpoint(
        &b,
        &[("fc.bias", vec![2], vec![2.0, 2.0]), ("fc.gamma", vec![2], vec![9.0, 9.0])],
    );

    let output = dir.path().join("avg.safetensors");
    let err = AverageBuilder::new()
        .add_checkpoint(a)
        .add_checkpoint(b)
        .output(&output)
        .run()
        .unwrap_err();

    assert!(matches!(err, AverageError::BlobNameMismatch { .. }));
    assert!(!output.exists());
}

#[test]
fn test_missing_checkpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let a = snapshot(dir.path(), 1, 1.0, false);

    let output = dir.path().join("avg.safetensors");
    let err = AverageBuilder::new()
        .add_checkpoint(a)
        .add_checkpoint(dir.path().join("absent.safetensors"))
        .output(&output)
        .run()
        .unwrap_err();

    assert!(matches!(err, AverageError::CheckpointLoad(_)));
    assert!(!output.exists());
}

#[test]
fn test_architecture_restricts_output() {
    let dir = tempfile::tempdir().unwrap();
    let a = snapshot(dir.path(), 1, 1.0, true);
    let b = snapshot(dir.path(), 2, 3.0, true);
    let arch = dir.path().join("lenet.yaml");
    std::fs::write(&arch, "parameters:\n  - ip1\n").unwrap();

    let output = dir.path().join("avg.safetensors");
    AverageBuilder::new()
        .add_checkpoint(a)
        .add_checkpoint(b)
        .architecture(&arch)
        .output(&output)
        .run()
        .unwrap();

    let averaged = load(&output);
    assert_eq!(averaged.names().collect::<Vec<_>>(), vec!["ip1"]);
    assert_eq!(averaged.get("ip1").unwrap()[0].data.as_slice(), &[2.0; 3]);
}

#[test]
fn test_yaml_config_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    snapshot(dir.path(), 10, 2.0, false);
    snapshot(dir.path(), 20, 4.0, false);

    let yaml = format!(
        "weight_prefix: {}\niter_range: \"(10, 30, 10)\"\noutput: {}\ndtype: float16\n",
        dir.path().join("lenet").display(),
        dir.path().join("avg.safetensors").display(),
    );
    let config_path = dir.path().join("average.yaml");
    std::fs::write(&config_path, yaml).unwrap();

    let config = AverageConfig::from_yaml_file(&config_path).unwrap();
    let report = run_average(&config).unwrap();
    assert_eq!(report.checkpoints, 2);

    let averaged = load(&report.output);
    let ip1 = &averaged.get("ip1").unwrap()[0].data;
    assert_eq!(ip1.dtype(), Dtype::F16);
    assert_eq!(ip1.as_slice(), &[3.0; 3]);
}
