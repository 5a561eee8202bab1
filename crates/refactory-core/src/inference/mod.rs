pub mod decoder;
pub mod predictor;
