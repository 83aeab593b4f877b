//! I/O modules for raster datasets, the raster transport codec, and the two
//! remote services (metadata store, execution service)

pub mod codec;
pub mod processes;
pub mod raster;
pub mod sensorthings;

pub use processes::{ProcessOutput, ProcessesClient};
pub use sensorthings::SensorThingsClient;
