//! Device execution tests comparing with host results.
//!
//! Tests that need a real adapter skip themselves when none is available;
//! the model-level parity test runs everywhere because a missing device
//! degrades to host execution.

use std::collections::HashMap;
use std::sync::Arc;

use graphmodel_inference::device::shaders::{merge_wgsl, DENSE_WGSL};
use graphmodel_inference::{
    DeviceContext, Model, ModelArtifacts, ModelOptions, ModelTopology, WeightEntry, WeightStore,
};
use serde_json::json;

const TOLERANCE: f32 = 1e-5;

fn blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn branching_artifacts() -> ModelArtifacts {
    ModelArtifacts::from_bytes(
        serde_json::to_vec(&json!({
            "class": "Model",
            "layers": [
                {
                    "class_name": "InputLayer",
                    "config": { "name": "x", "batch_input_shape": [null, 3] }
                },
                {
                    "class_name": "Dense",
                    "config": { "name": "left", "units": 4, "activation": "relu" },
                    "inbound_nodes": [[["x", 0, 0]]]
                },
                {
                    "class_name": "Dense",
                    "config": { "name": "right", "units": 4, "activation": "tanh" },
                    "inbound_nodes": [[["x", 0, 0]]]
                },
                {
                    "class_name": "Add",
                    "config": { "name": "sum" },
                    "inbound_nodes": [[["left", 0, 0], ["right", 0, 0]]]
                },
                {
                    "class_name": "Dense",
                    "config": { "name": "out", "units": 2, "activation": "softmax" },
                    "inbound_nodes": [[["sum", 0, 0]]]
                }
            ]
        }))
        .unwrap(),
        blob(&[
            // left/W [3, 4]
            0.1, -0.2, 0.3, -0.4, 0.5, -0.6, 0.7, -0.8, 0.9, -1.0, 1.1, -1.2,
            // left/b [4]
            0.05, -0.05, 0.1, -0.1, // right/W [3, 4]
            -0.1, 0.2, -0.3, 0.4, -0.5, 0.6, -0.7, 0.8, -0.9, 1.0, -1.1, 1.2,
            // right/b [4]
            0.2, 0.1, -0.1, -0.2, // out/W [4, 2]
            0.3, -0.3, 0.6, -0.6, 0.9, -0.9, 1.2, -1.2, // out/b [2]
            0.01, -0.01,
        ]),
        serde_json::to_vec(&json!([
            { "weight_name": "left/W", "offset": 0, "length": 12, "shape": [3, 4] },
            { "weight_name": "left/b", "offset": 12, "length": 4, "shape": [4] },
            { "weight_name": "right/W", "offset": 16, "length": 12, "shape": [3, 4] },
            { "weight_name": "right/b", "offset": 28, "length": 4, "shape": [4] },
            { "weight_name": "out/W", "offset": 32, "length": 8, "shape": [4, 2] },
            { "weight_name": "out/b", "offset": 40, "length": 2, "shape": [2] }
        ]))
        .unwrap(),
    )
}

fn feed() -> HashMap<String, Vec<f32>> {
    let mut map = HashMap::new();
    map.insert("x".to_string(), vec![0.5, -1.5, 2.0]);
    map
}

#[test]
fn device_and_host_predictions_agree() {
    let mut host_model =
        Model::load(branching_artifacts(), ModelOptions::default()).unwrap();
    let mut device_model = Model::load(
        branching_artifacts(),
        ModelOptions::default().with_device_acceleration(true),
    )
    .unwrap();

    let host = host_model.predict(feed()).unwrap();
    let device = device_model.predict(feed()).unwrap();

    assert_eq!(host.len(), device.len());
    for (name, host_values) in &host {
        let device_values = &device[name];
        assert_eq!(host_values.len(), device_values.len());
        for (h, d) in host_values.iter().zip(device_values) {
            assert!((h - d).abs() < TOLERANCE, "{name}: {h} vs {d}");
        }
    }
}

#[test]
fn repeated_device_predictions_are_stable() {
    let mut model = Model::load(
        branching_artifacts(),
        ModelOptions::default().with_device_acceleration(true),
    )
    .unwrap();

    let first = model.predict(feed()).unwrap();
    let second = model.predict(feed()).unwrap();
    assert_eq!(first, second);
}

fn identity_topology() -> serde_json::Value {
    json!({
        "class": "Sequential",
        "layers": [{
            "class_name": "Dense",
            "config": { "name": "dense_1", "units": 2, "input_dim": 2 }
        }]
    })
}

fn identity_metadata() -> serde_json::Value {
    json!([
        { "weight_name": "dense_1/W", "offset": 0, "length": 4, "shape": [2, 2] },
        { "weight_name": "dense_1/b", "offset": 4, "length": 2, "shape": [2] }
    ])
}

const IDENTITY_WEIGHTS: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

#[test]
fn models_share_one_device_context() {
    let Some(ctx) = DeviceContext::create() else {
        eprintln!("no compute device available; skipping");
        return;
    };

    let topology: ModelTopology = serde_json::from_value(identity_topology()).unwrap();
    let entries: Vec<WeightEntry> = serde_json::from_value(identity_metadata()).unwrap();
    let store = WeightStore::new(&blob(&IDENTITY_WEIGHTS), entries).unwrap();

    let mut first = Model::from_parts_with_device(
        &topology,
        &store,
        ModelOptions::default(),
        Arc::clone(&ctx),
    )
    .unwrap();
    let mut second = Model::load_with_device(
        ModelArtifacts::from_bytes(
            serde_json::to_vec(&identity_topology()).unwrap(),
            blob(&IDENTITY_WEIGHTS),
            serde_json::to_vec(&identity_metadata()).unwrap(),
        ),
        ModelOptions::default(),
        Arc::clone(&ctx),
    )
    .unwrap();

    let mut input = HashMap::new();
    input.insert("dense_1_input".to_string(), vec![1.0, 2.0]);
    let a = first.predict(input.clone()).unwrap();
    let b = second.predict(input).unwrap();
    assert_eq!(a["dense_1"], vec![1.0, 2.0]);
    assert_eq!(a, b);

    // both models compiled through the same per-context program cache
    let program = ctx.compile_program("dense", DENSE_WGSL).unwrap();
    assert!(Arc::ptr_eq(
        &program,
        &ctx.compile_program("dense", DENSE_WGSL).unwrap()
    ));
}

#[test]
fn upload_and_readback_round_trip() {
    let Some(ctx) = DeviceContext::create() else {
        eprintln!("no compute device available; skipping");
        return;
    };

    let data = vec![1.0f32, -2.5, 3.25, 0.0, 7.5, -0.125];
    let tensor = ctx.upload(&data, 2, 3);
    let back = ctx.read_data(&tensor).unwrap();
    assert_eq!(back, data);
    tensor.destroy();
}

#[test]
fn compile_failure_disables_operation() {
    let Some(ctx) = DeviceContext::create() else {
        eprintln!("no compute device available; skipping");
        return;
    };

    assert!(ctx.compile_program("broken", "this is not wgsl").is_err());
    assert!(ctx.op_disabled("broken"));
    // stays disabled even with a valid source
    assert!(ctx.compile_program("broken", DENSE_WGSL).is_err());
}

#[test]
fn compiled_programs_are_cached() {
    let Some(ctx) = DeviceContext::create() else {
        eprintln!("no compute device available; skipping");
        return;
    };

    let first = ctx.compile_program("dense", DENSE_WGSL).unwrap();
    let second = ctx.compile_program("dense", DENSE_WGSL).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[test]
fn merge_kernel_matches_host_arithmetic() {
    let Some(ctx) = DeviceContext::create() else {
        eprintln!("no compute device available; skipping");
        return;
    };

    let source = merge_wgsl("average", 3);
    let program = ctx.compile_program("merge_average_3", &source).unwrap();

    let a = ctx.upload(&[1.0, 2.0, 3.0, 4.0], 1, 4);
    let b = ctx.upload(&[5.0, 6.0, 7.0, 8.0], 1, 4);
    let c = ctx.upload(&[9.0, 10.0, 11.0, 12.0], 1, 4);
    let out = ctx.alloc_output(1, 4);

    ctx.run_program(&program, &out, &[&a, &b, &c], &[4, 0, 0, 0]);
    let result = ctx.read_data(&out).unwrap();
    assert_eq!(result, vec![5.0, 6.0, 7.0, 8.0]);

    for tensor in [a, b, c, out] {
        tensor.destroy();
    }
}
