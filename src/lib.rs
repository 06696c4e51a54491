pub mod collaborators;
pub mod config;
pub mod duration;
pub mod exposure;
pub mod format;
pub mod math;
pub mod models;
pub mod oracle;
pub mod pricing;
pub mod registry;
pub mod risk;
pub mod vault;
pub mod venue;
