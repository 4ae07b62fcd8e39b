pub mod scenario;
pub mod sources;
