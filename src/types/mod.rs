pub mod side;
pub mod trade;
