//! Regression models.

mod isotonic;

pub use isotonic::IsotonicRegressionModel;
