pub mod generator;
pub mod traffic;
