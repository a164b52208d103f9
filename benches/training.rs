use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kolosal_tabular::prelude::*;
use polars::prelude::*;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

fn create_regression_data(n_rows: usize, n_features: usize) -> DataFrame {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);

    let mut columns: Vec<Column> = Vec::with_capacity(n_features + 2);
    let mut target = vec![0.0; n_rows];
    for i in 0..n_features {
        let values: Vec<f64> = (0..n_rows).map(|_| rng.gen::<f64>() * 10.0).collect();
        for (t, v) in target.iter_mut().zip(&values) {
            *t += v;
        }
        columns.push(Column::new(format!("feature_{}", i).into(), values));
    }

    let groups: Vec<String> = (0..n_rows).map(|_| format!("g{}", rng.gen_range(0..8))).collect();
    columns.push(Column::new("group".into(), groups));
    columns.push(Column::new("target".into(), target));

    DataFrame::new(columns).unwrap()
}

fn experiment(n_features: usize, embed: bool) -> (DataConfig, NodeConfig, TrainerConfig) {
    let continuous: Vec<String> = (0..n_features).map(|i| format!("feature_{}", i)).collect();
    let data = DataConfig::new(["target"], continuous, ["group"]).unwrap();
    let model = NodeConfig::new(TaskKind::Regression)
        .with_depth(4)
        .with_num_trees(64)
        .with_embed_categorical(embed);
    let trainer = TrainerConfig::new()
        .with_max_epochs(1)
        .with_batch_size(256)
        .with_seed(42);
    (data, model, trainer)
}

fn bench_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("training");
    group.sample_size(10);

    for n_rows in [1000, 5000].iter() {
        let df = create_regression_data(*n_rows, 10);

        for embed in [false, true] {
            let label = if embed { "fit_embedded" } else { "fit" };
            group.bench_with_input(BenchmarkId::new(label, n_rows), &df, |b, df| {
                b.iter(|| {
                    let (data, model, trainer) = experiment(10, embed);
                    let mut tabular =
                        TabularModel::new(data, model, OptimizerConfig::default(), trainer);
                    tabular.fit(black_box(df), None).unwrap();
                })
            });
        }
    }

    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("prediction");

    // Train model once
    let train_df = create_regression_data(2000, 10);
    let (data, model, trainer) = experiment(10, false);
    let mut tabular = TabularModel::new(data, model, OptimizerConfig::default(), trainer);
    tabular.fit(&train_df, None).unwrap();

    for n_rows in [100, 1000, 10000].iter() {
        let test_df = create_regression_data(*n_rows, 10);

        group.bench_with_input(BenchmarkId::new("predict", n_rows), &test_df, |b, df| {
            b.iter(|| tabular.predict(black_box(df)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_training, bench_prediction);
criterion_main!(benches);
