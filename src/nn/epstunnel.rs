// Epsilon tunnels
//
// An `EpsTunnel` marks the boundary between two graph regions whose arrays
// are expressed in (possibly) different quantization step sizes. It carries
// the step size of the array entering the tunnel (`eps_in`) and the step size
// the array is re-expressed in when leaving it (`eps_out`).
//
// Both quantities are either scalars (length-1 arrays) or per-channel arrays.

use super::broadcast_zip;
use crate::error::{EditingError, Result};
use ndarray::Array1;

/// Scale-tracking leaf module.
#[derive(Debug, Clone, PartialEq)]
pub struct EpsTunnel {
    eps_in: Array1<f64>,
    eps_out: Array1<f64>,
}

impl EpsTunnel {
    /// Create a tunnel from (scalar or per-channel) step sizes.
    ///
    /// Both arrays must be non-empty, strictly positive, and either have the
    /// same length or have length one.
    pub fn new(eps_in: Array1<f64>, eps_out: Array1<f64>) -> Result<Self> {
        check_eps("eps_in", &eps_in)?;
        check_eps("eps_out", &eps_out)?;
        check_compatible(&eps_in, &eps_out)?;
        Ok(Self { eps_in, eps_out })
    }

    /// Create a tunnel with scalar step sizes.
    pub fn scalar(eps_in: f64, eps_out: f64) -> Result<Self> {
        Self::new(Array1::from_elem(1, eps_in), Array1::from_elem(1, eps_out))
    }

    pub fn eps_in(&self) -> &Array1<f64> {
        &self.eps_in
    }

    pub fn eps_out(&self) -> &Array1<f64> {
        &self.eps_out
    }

    pub fn set_eps_in(&mut self, value: Array1<f64>) -> Result<()> {
        check_eps("eps_in", &value)?;
        check_compatible(&value, &self.eps_out)?;
        self.eps_in = value;
        Ok(())
    }

    pub fn set_eps_out(&mut self, value: Array1<f64>) -> Result<()> {
        check_eps("eps_out", &value)?;
        check_compatible(&self.eps_in, &value)?;
        self.eps_out = value;
        Ok(())
    }

    /// Reset `eps_in` to ones, keeping its shape.
    pub fn set_eps_in_ones(&mut self) {
        self.eps_in = Array1::ones(self.eps_in.len());
    }

    /// Reset `eps_out` to ones, keeping its shape.
    pub fn set_eps_out_ones(&mut self) {
        self.eps_out = Array1::ones(self.eps_out.len());
    }

    /// Whether the tunnel is numerically transparent (`eps_in == eps_out` elementwise).
    pub fn is_identity(&self) -> bool {
        eps_all_equal(&self.eps_in, &self.eps_out)
    }

    /// Whether every component of `eps_out` is exactly one.
    pub fn has_unit_eps_out(&self) -> bool {
        self.eps_out.iter().all(|&eps| eps == 1.0)
    }

    /// Rescaling factor `eps_out / eps_in` applied by the tunnel.
    pub fn scale(&self) -> Result<Array1<f64>> {
        broadcast_zip(&self.eps_out, &self.eps_in, "EpsTunnel scale", |eps_out, eps_in| eps_out / eps_in)
    }

    pub fn forward(&self, x: &Array1<f64>) -> Result<Array1<f64>> {
        let scale = self.scale()?;
        broadcast_zip(x, &scale, "EpsTunnel forward", |value, factor| value * factor)
    }
}

/// Elementwise equality with length-one broadcasting.
///
/// Arrays that cannot be broadcast against each other are never equal.
pub(crate) fn eps_all_equal(lhs: &Array1<f64>, rhs: &Array1<f64>) -> bool {
    match (lhs.len(), rhs.len()) {
        (l, r) if l == r => lhs.iter().zip(rhs.iter()).all(|(a, b)| a == b),
        (1, _) => rhs.iter().all(|&b| b == lhs[0]),
        (_, 1) => lhs.iter().all(|&a| a == rhs[0]),
        _ => false,
    }
}

fn check_eps(which: &'static str, eps: &Array1<f64>) -> Result<()> {
    if eps.is_empty() {
        return Err(EditingError::ShapeMismatch(format!("{} must not be empty", which)));
    }

    // NaN fails the comparison too
    match eps.iter().find(|&&value| !(value > 0.0)) {
        Some(&value) => Err(EditingError::NonPositiveEps { which, value }),
        None => Ok(()),
    }
}

fn check_compatible(eps_in: &Array1<f64>, eps_out: &Array1<f64>) -> Result<()> {
    let (l, r) = (eps_in.len(), eps_out.len());
    if l == r || l == 1 || r == 1 {
        Ok(())
    } else {
        Err(EditingError::ShapeMismatch(format!(
            "eps_in has {} channels but eps_out has {}",
            l, r
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_scalar_tunnel() {
        let tunnel = EpsTunnel::scalar(0.5, 0.25).unwrap();
        assert_eq!(tunnel.eps_in(), &array![0.5]);
        assert_eq!(tunnel.eps_out(), &array![0.25]);
        assert!(!tunnel.is_identity());
        assert!(!tunnel.has_unit_eps_out());
    }

    #[test]
    fn test_rejects_non_positive_eps() {
        assert!(matches!(
            EpsTunnel::scalar(0.0, 1.0),
            Err(EditingError::NonPositiveEps { which: "eps_in", .. })
        ));
        assert!(matches!(
            EpsTunnel::new(array![1.0, 2.0], array![1.0, -2.0]),
            Err(EditingError::NonPositiveEps { which: "eps_out", .. })
        ));
        assert!(EpsTunnel::scalar(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_rejects_incompatible_channels() {
        let result = EpsTunnel::new(array![1.0, 2.0], array![1.0, 2.0, 3.0]);
        assert!(matches!(result, Err(EditingError::ShapeMismatch(_))));
    }

    #[test]
    fn test_identity_broadcasts_scalar() {
        let tunnel = EpsTunnel::new(array![0.5], array![0.5, 0.5, 0.5]).unwrap();
        assert!(tunnel.is_identity());

        let tunnel = EpsTunnel::new(array![0.5], array![0.5, 0.25]).unwrap();
        assert!(!tunnel.is_identity());
    }

    #[test]
    fn test_setters_validate() {
        let mut tunnel = EpsTunnel::scalar(0.5, 0.5).unwrap();
        assert!(tunnel.set_eps_out(array![-1.0]).is_err());
        assert_eq!(tunnel.eps_out(), &array![0.5]);

        tunnel.set_eps_out(array![0.125]).unwrap();
        assert_eq!(tunnel.eps_out(), &array![0.125]);
    }

    #[test]
    fn test_set_ones_keeps_shape() {
        let mut tunnel = EpsTunnel::new(array![0.5, 0.25], array![0.1, 0.2]).unwrap();
        tunnel.set_eps_out_ones();
        tunnel.set_eps_in_ones();
        assert_eq!(tunnel.eps_in(), &array![1.0, 1.0]);
        assert_eq!(tunnel.eps_out(), &array![1.0, 1.0]);
        assert!(tunnel.is_identity());
        assert!(tunnel.has_unit_eps_out());
    }

    #[test]
    fn test_forward_rescales() {
        let tunnel = EpsTunnel::new(array![0.5, 0.25], array![1.0, 1.0]).unwrap();
        let y = tunnel.forward(&array![3.0, 4.0]).unwrap();
        assert_eq!(y, array![6.0, 16.0]);
    }

    #[test]
    fn test_identity_forward_is_exact() {
        let tunnel = EpsTunnel::scalar(0.1, 0.1).unwrap();
        let x = array![0.3, -7.77, 1e-9];
        assert_eq!(tunnel.forward(&x).unwrap(), x);
    }
}
