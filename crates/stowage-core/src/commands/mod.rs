pub mod check;
pub mod repair;
