// Reference evaluation
//
// Runs a graph on concrete inputs by visiting nodes in topological order.
// Used to check that an edit leaves the network's function unchanged.

use super::ir::{Function, NodeId, NodeKind, QuantGraph};
use crate::error::{EditingError, Result};
use crate::nn::broadcast_zip;
use ndarray::Array1;
use rustc_hash::FxHashMap;

impl Function {
    /// Apply the function to its positional arguments
    pub fn apply(&self, args: &[&Array1<f64>]) -> Result<Array1<f64>> {
        if args.len() != self.arity() {
            return Err(EditingError::Evaluation(format!(
                "{} expects {} arguments, got {}",
                self.name(),
                self.arity(),
                args.len()
            )));
        }

        match *self {
            Function::Add => broadcast_zip(args[0], args[1], "add", |a, b| a + b),
            Function::Mul => broadcast_zip(args[0], args[1], "mul", |a, b| a * b),
            Function::Relu => Ok(args[0].mapv(|v| v.max(0.0))),
            Function::Relu6 => Ok(args[0].mapv(|v| v.clamp(0.0, 6.0))),
            Function::LeakyRelu(slope) => Ok(args[0].mapv(|v| if v >= 0.0 { v } else { slope * v })),
        }
    }
}

impl QuantGraph {
    /// Evaluate the graph. `inputs` are bound to the placeholders in
    /// declaration order.
    pub fn evaluate(&self, inputs: &[Array1<f64>]) -> Result<Array1<f64>> {
        let placeholders = self.placeholders();
        if inputs.len() != placeholders.len() {
            return Err(EditingError::Evaluation(format!(
                "graph has {} inputs, got {}",
                placeholders.len(),
                inputs.len()
            )));
        }
        let output = self
            .output_node()
            .ok_or_else(|| EditingError::Evaluation("graph has no output node".to_string()))?;

        let mut values: FxHashMap<NodeId, Array1<f64>> = placeholders.iter().copied().zip(inputs.iter().cloned()).collect();

        for node_id in self.topological_sort()? {
            let Some(node) = self.node(node_id) else {
                continue;
            };
            if node.kind.is_placeholder() {
                continue;
            }

            let args = self
                .inputs(node_id)
                .into_iter()
                .map(|(_, source)| {
                    values.get(&source).ok_or_else(|| {
                        EditingError::Evaluation(format!("input `{}` of `{}` has no value", self.name_of(source), node.name))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let value = match &node.kind {
                NodeKind::CallModule { target } => match args.as_slice() {
                    [x] => self.get_submodule(target)?.forward(x)?,
                    _ => {
                        return Err(EditingError::Evaluation(format!(
                            "`{}` expects one input, got {}",
                            node.name,
                            args.len()
                        )))
                    }
                },
                NodeKind::CallFunction(function) => function.apply(&args)?,
                NodeKind::Output => match args.as_slice() {
                    [x] => (*x).clone(),
                    _ => return Err(EditingError::Evaluation("output must have exactly one input".to_string())),
                },
                NodeKind::Placeholder => continue,
            };
            values.insert(node_id, value);
        }

        values
            .remove(&output)
            .ok_or_else(|| EditingError::Evaluation("output was not computed".to_string()))
    }
}
