//! Deterministic synthetic frames shared by the integration tests

#![allow(dead_code)]

use kolosal_tabular::prelude::*;
use polars::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

pub const CITIES: [&str; 4] = ["berlin", "jakarta", "lima", "oslo"];

struct Features {
    x1: Vec<f64>,
    x2: Vec<f64>,
    city: Vec<&'static str>,
}

fn features(n: usize, seed: u64) -> Features {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut f = Features {
        x1: Vec::with_capacity(n),
        x2: Vec::with_capacity(n),
        city: Vec::with_capacity(n),
    };
    for _ in 0..n {
        f.x1.push(rng.gen_range(-1.0..1.0));
        f.x2.push(rng.gen_range(-1.0..1.0));
        f.city.push(CITIES[rng.gen_range(0..CITIES.len())]);
    }
    f
}

fn city_offset(city: &str) -> f64 {
    CITIES.iter().position(|c| *c == city).unwrap_or(0) as f64
}

/// `x1`, `x2`, `city` and a target in [5, 45]
pub fn regression_frame(n: usize, seed: u64) -> DataFrame {
    let f = features(n, seed);
    let target: Vec<f64> = (0..n)
        .map(|i| 25.0 + 8.0 * f.x1[i] - 5.0 * f.x2[i] + city_offset(f.city[i]))
        .collect();
    let second: Vec<f64> = (0..n).map(|i| f.x1[i] * f.x2[i]).collect();
    df! {
        "x1" => f.x1,
        "x2" => f.x2,
        "city" => f.city,
        "target" => target,
        "second_target" => second,
    }
    .unwrap()
}

/// `x1`, `x2`, `city` and a string `label` of "high"/"low"
pub fn classification_frame(n: usize, seed: u64) -> DataFrame {
    let f = features(n, seed);
    let label: Vec<&str> = (0..n)
        .map(|i| if f.x1[i] + 0.5 * f.x2[i] > 0.0 { "high" } else { "low" })
        .collect();
    df! {
        "x1" => f.x1,
        "x2" => f.x2,
        "city" => f.city,
        "label" => label,
    }
    .unwrap()
}

/// Replace the first row's city with a value that appears nowhere else
pub fn with_single_row_city(mut df: DataFrame, city: &str) -> DataFrame {
    let mut values: Vec<Option<String>> = df
        .column("city")
        .unwrap()
        .as_materialized_series()
        .str()
        .unwrap()
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    values[0] = Some(city.to_string());
    df.with_column(Column::new("city".into(), values)).unwrap();
    df
}

pub fn data_config(target: &[&str]) -> DataConfig {
    DataConfig::new(target.iter().copied(), ["x1", "x2"], ["city"]).unwrap()
}

/// A NODE small enough to train in milliseconds
pub fn small_node(task: TaskKind) -> NodeConfig {
    let mut config = NodeConfig::new(task).with_depth(2).with_num_trees(8);
    config.additional_tree_output_dim = 1;
    config
}

pub fn quick_trainer() -> TrainerConfig {
    TrainerConfig::new()
        .with_max_epochs(3)
        .with_batch_size(32)
        .with_seed(7)
}

pub fn fitted(data: DataConfig, model: NodeConfig, train: &DataFrame) -> TabularModel {
    let mut tabular = TabularModel::new(data, model, OptimizerConfig::default(), quick_trainer());
    tabular.fit(train, None).unwrap();
    tabular
}
