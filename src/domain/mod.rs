// Domain layer: tabular data, catalog models and ports (interfaces) to the outside world.

pub mod dataset;
pub mod model;
pub mod ports;
