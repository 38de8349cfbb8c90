use crate::error::{EditingError, Result};
use ndarray::{Array1, Array2};

/// Fully-connected layer `y = W x + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    weight: Array2<f64>,
    bias: Option<Array1<f64>>,
}

impl Linear {
    /// `weight` has shape `(out_features, in_features)`.
    pub fn new(weight: Array2<f64>, bias: Option<Array1<f64>>) -> Result<Self> {
        if let Some(bias) = &bias {
            if bias.len() != weight.nrows() {
                return Err(EditingError::ShapeMismatch(format!(
                    "Linear bias has {} elements but weight has {} rows",
                    bias.len(),
                    weight.nrows()
                )));
            }
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn weight(&self) -> &Array2<f64> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Array1<f64>> {
        self.bias.as_ref()
    }

    pub fn forward(&self, x: &Array1<f64>) -> Result<Array1<f64>> {
        if x.len() != self.in_features() {
            return Err(EditingError::ShapeMismatch(format!(
                "Linear expects {} input features, got {}",
                self.in_features(),
                x.len()
            )));
        }
        let y = self.weight.dot(x);
        Ok(match &self.bias {
            Some(bias) => y + bias,
            None => y,
        })
    }
}
