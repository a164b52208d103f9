//! Integration test: NODE models end-to-end through TabularModel

mod common;

use common::*;
use kolosal_tabular::prelude::*;
use polars::prelude::*;

fn f64_column(df: &DataFrame, name: &str) -> Vec<f64> {
    df.column(name)
        .unwrap()
        .as_materialized_series()
        .f64()
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap())
        .collect()
}

#[test]
fn test_regression_with_target_range() {
    let train = regression_frame(160, 1);
    let test = regression_frame(40, 2);
    let model = fitted(
        data_config(&["target"]),
        small_node(TaskKind::Regression).with_target_range(vec![(0.0, 50.0)]),
        &train,
    );

    let records = model.evaluate(&test).unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].contains_key("test_mean_squared_error"));

    let predicted = model.predict(&test).unwrap();
    assert_eq!(predicted.height(), test.height());
    assert!(f64_column(&predicted, "target_prediction")
        .iter()
        .all(|p| (0.0..=50.0).contains(p)));
}

#[test]
fn test_classification_without_embedding() {
    let train = classification_frame(160, 3);
    let test = classification_frame(50, 4);
    let model = fitted(data_config(&["label"]), small_node(TaskKind::Classification), &train);

    let records = model.evaluate(&test).unwrap();
    assert!(records[0].contains_key("test_accuracy"));

    let predicted = model.predict(&test.drop("label").unwrap()).unwrap();
    assert_eq!(predicted.height(), test.height());
    let high = f64_column(&predicted, "high_probability");
    let low = f64_column(&predicted, "low_probability");
    assert!(high.iter().zip(&low).all(|(h, l)| (h + l - 1.0).abs() < 1e-9));
    assert!(predicted.column("prediction").is_ok());
}

#[test]
fn test_every_task_and_depth_reports_its_metric() {
    let regression = regression_frame(96, 5);
    let classification = classification_frame(96, 6);

    for depth in [1, 2, 3] {
        let cases: Vec<(DataConfig, NodeConfig, &DataFrame, &str)> = vec![
            (
                data_config(&["target"]),
                small_node(TaskKind::Regression).with_depth(depth),
                &regression,
                "test_mean_squared_error",
            ),
            (
                data_config(&["label"]),
                small_node(TaskKind::Classification).with_depth(depth),
                &classification,
                "test_accuracy",
            ),
            (
                data_config(&[]),
                small_node(TaskKind::Ssl)
                    .with_depth(depth)
                    .with_ssl_task(SslTask::Denoising)
                    .with_aug_task(AugTask::Cutmix),
                &regression,
                "test_mean_squared_error",
            ),
            (
                data_config(&["target"]),
                small_node(TaskKind::Ssl)
                    .with_depth(depth)
                    .with_ssl_task(SslTask::Denoising)
                    .with_aug_task(AugTask::Mixup)
                    .with_embed_categorical(true),
                &regression,
                "test_mean_squared_error",
            ),
            (
                data_config(&[]),
                small_node(TaskKind::Ssl)
                    .with_depth(depth)
                    .with_ssl_task(SslTask::Contrastive)
                    .with_aug_task(AugTask::Mixup)
                    .with_embed_categorical(true),
                &regression,
                "test_mean_squared_error",
            ),
        ];

        for (data, node, frame, key) in cases {
            let task = node.task;
            let model = fitted(data, node, frame);
            let records = model.evaluate(frame).unwrap();
            assert!(
                records.iter().all(|r| r.contains_key(key)),
                "{} at depth {} is missing {}",
                task,
                depth,
                key
            );
            assert_eq!(model.predict(frame).unwrap().height(), frame.height());
        }
    }
}

#[test]
fn test_multi_target_regression_reports_each_target() {
    let train = regression_frame(120, 7);
    let model = fitted(
        data_config(&["target", "second_target"]),
        small_node(TaskKind::Regression).with_metrics(vec![Metric::MeanSquaredError, Metric::R2Score]),
        &train,
    );
    let records = model.evaluate(&train).unwrap();
    let targets: Vec<_> = records.iter().map(|r| r.target.clone().unwrap()).collect();
    assert_eq!(targets, vec!["target", "second_target"]);
    assert!(records.iter().all(|r| r.contains_key("test_r2_score")));
}

#[test]
fn test_multi_target_regression_with_target_range() {
    let train = regression_frame(120, 14);
    let test = regression_frame(40, 15);
    let targets = ["target", "second_target"];
    let ranges: Vec<(f64, f64)> = targets
        .iter()
        .map(|name| {
            let values = f64_column(&train, name);
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (min, max)
        })
        .collect();

    let model = fitted(
        data_config(&targets),
        small_node(TaskKind::Regression).with_target_range(ranges.clone()),
        &train,
    );
    let records = model.evaluate(&test).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.contains_key("test_mean_squared_error")));

    let predicted = model.predict(&test).unwrap();
    for (name, (min, max)) in targets.iter().zip(&ranges) {
        let column = format!("{}_prediction", name);
        assert!(
            f64_column(&predicted, &column).iter().all(|p| (*min..=*max).contains(p)),
            "{} left [{}, {}]",
            column,
            min,
            max
        );
    }
}

#[test]
fn test_denoising_predicts_reconstructions() {
    let train = regression_frame(80, 8);
    let model = fitted(
        data_config(&[]),
        small_node(TaskKind::Ssl)
            .with_ssl_task(SslTask::Denoising)
            .with_aug_task(AugTask::Mixup),
        &train,
    );
    let predicted = model.predict(&train).unwrap();
    // without embeddings the encoded categorical column joins the dense block
    for name in ["x1_reconstruction", "x2_reconstruction", "city_reconstruction"] {
        assert!(predicted.column(name).is_ok(), "missing {}", name);
    }
}

#[test]
fn test_ssl_without_aug_task_is_config_error() {
    let mut model = TabularModel::new(
        data_config(&[]),
        small_node(TaskKind::Ssl).with_ssl_task(SslTask::Denoising),
        OptimizerConfig::default(),
        quick_trainer(),
    );
    let err = model.fit(&regression_frame(40, 9), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(!model.is_fitted());
}

#[test]
fn test_ssl_without_ssl_task_is_config_error() {
    let mut model = TabularModel::new(
        data_config(&[]),
        small_node(TaskKind::Ssl).with_aug_task(AugTask::Cutmix),
        OptimizerConfig::default(),
        quick_trainer(),
    );
    let err = model.fit(&regression_frame(40, 9), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(!model.is_fitted());
}

#[test]
fn test_excessive_depth_is_config_error() {
    let mut model = TabularModel::new(
        data_config(&["target"]),
        small_node(TaskKind::Regression).with_depth(64),
        OptimizerConfig::default(),
        quick_trainer(),
    );
    let err = model.fit(&regression_frame(40, 16), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_evaluate_on_empty_frame_is_data_error() {
    let train = regression_frame(60, 17);
    let model = fitted(data_config(&["target"]), small_node(TaskKind::Regression), &train);
    let err = model.evaluate(&train.head(Some(0))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
}

#[test]
fn test_target_range_length_mismatch_is_config_error() {
    let err = ModelConfigResolver::resolve(
        &data_config(&["target"]),
        &small_node(TaskKind::Regression).with_target_range(vec![(0.0, 1.0), (0.0, 2.0)]),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_lifecycle_and_schema_errors() {
    let frame = regression_frame(60, 10);
    let mut model = TabularModel::new(
        data_config(&["target"]),
        small_node(TaskKind::Regression),
        OptimizerConfig::default(),
        quick_trainer(),
    );
    assert_eq!(model.evaluate(&frame).unwrap_err().kind(), ErrorKind::State);
    assert_eq!(model.predict(&frame).unwrap_err().kind(), ErrorKind::State);

    let missing = frame.drop("x2").unwrap();
    assert_eq!(model.fit(&missing, None).unwrap_err().kind(), ErrorKind::Data);

    model.fit(&frame, None).unwrap();
    assert_eq!(model.predict(&missing).unwrap_err().kind(), ErrorKind::Data);
}

#[test]
fn test_save_load_roundtrip_preserves_predictions() {
    let train = classification_frame(100, 11);
    let model = fitted(
        data_config(&["label"]),
        small_node(TaskKind::Classification).with_embed_categorical(true),
        &train,
    );
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    model.save_model(&path).unwrap();

    let loaded = TabularModel::load_model(&path).unwrap();
    assert!(loaded.is_fitted());
    assert_eq!(loaded.training_history(), model.training_history());

    let before = model.predict(&train).unwrap();
    let after = loaded.predict(&train).unwrap();
    for name in ["high_probability", "low_probability"] {
        let diff = f64_column(&before, name)
            .iter()
            .zip(f64_column(&after, name))
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(diff < 1e-12, "{} drifted by {}", name, diff);
    }
}

#[test]
fn test_fast_dev_run_and_gpu_request() {
    let frame = regression_frame(80, 12);
    let mut model = TabularModel::new(
        data_config(&["target"]),
        small_node(TaskKind::Regression),
        OptimizerConfig::default(),
        quick_trainer().with_fast_dev_run(true).with_gpus(Some(1)),
    );
    model.fit(&frame, Some(&frame)).unwrap();
    assert_eq!(model.training_history().unwrap().len(), 1);
    assert!(model.test_results().is_some());
}

#[test]
fn test_experiment_config_file_drives_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("experiment.json");
    ExperimentConfig::new(
        data_config(&["target"]),
        small_node(TaskKind::Regression),
        OptimizerConfig::default(),
        quick_trainer(),
    )
    .to_json_file(&path)
    .unwrap();

    let mut model = TabularModel::from_config(ExperimentConfig::from_json_file(&path).unwrap());
    model.fit(&regression_frame(60, 13), None).unwrap();
    assert!(model.resolved_spec().unwrap().metrics.contains(&Metric::MeanSquaredError));
}
