//! WGSL shader sources for the device compute path.
//!
//! The dense kernel is a static source; element-wise merge kernels are
//! generated per input arity, since the binding list must name every input
//! buffer explicitly.

use crate::activation::Activation;

/// Static WGSL source for the dense kernel.
pub const DENSE_WGSL: &str = include_str!("dense.wgsl");

/// Activation codes understood by `apply_activation` in dense.wgsl.
///
/// Softmax has no code: it needs a whole-vector reduction, so dense runs with
/// a linear tail on the device and softmax is applied host-side afterwards.
pub fn activation_code(activation: Activation) -> Option<u32> {
    match activation {
        Activation::Linear => Some(0),
        Activation::Relu => Some(1),
        Activation::Sigmoid => Some(2),
        Activation::Tanh => Some(3),
        Activation::Softplus => Some(4),
        Activation::Softsign => Some(5),
        Activation::HardSigmoid => Some(6),
        Activation::Softmax => None,
    }
}

/// Generate an element-wise merge kernel for `arity` inputs.
///
/// `op` is one of `add`, `subtract`, `multiply`, `average`, `maximum`.
/// Bindings: 0 = output, 1..=arity = inputs, arity+1 = uniform block.
pub fn merge_wgsl(op: &str, arity: usize) -> String {
    let mut bindings = String::new();
    for i in 0..arity {
        bindings.push_str(&format!(
            "@group(0) @binding({}) var<storage, read> in{}: array<f32>;\n",
            i + 1,
            i
        ));
    }

    let mut body = String::from("    var acc = in0[i];\n");
    for i in 1..arity {
        let step = match op {
            "subtract" => format!("    acc = acc - in{i}[i];\n"),
            "multiply" => format!("    acc = acc * in{i}[i];\n"),
            "maximum" => format!("    acc = max(acc, in{i}[i]);\n"),
            // add and average both accumulate a sum
            _ => format!("    acc = acc + in{i}[i];\n"),
        };
        body.push_str(&step);
    }
    if op == "average" {
        body.push_str(&format!("    acc = acc / {}.0;\n", arity));
    }

    format!(
        r#"struct MergeParams {{
    size: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}}

@group(0) @binding(0) var<storage, read_write> outbuf: array<f32>;
{bindings}@group(0) @binding({uniform_binding}) var<uniform> params: MergeParams;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let i = gid.x;
    if (i >= params.size) {{
        return;
    }}
{body}    outbuf[i] = acc;
}}
"#,
        bindings = bindings,
        uniform_binding = arity + 1,
        body = body,
    )
}
