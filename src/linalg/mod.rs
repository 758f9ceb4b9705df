pub mod faer_ndarray;
pub mod precision;
pub mod utils;
