pub mod config;
pub mod digital_twin;
pub mod error;
pub mod history;
pub mod middleware;
pub mod orchestrator;
pub mod prediction;
pub mod protocols;
pub mod scenario;
pub mod scoring;
pub mod state;

pub mod proto {
    tonic::include_proto!("ecotwin.v1");
}

pub use error::{Error, Result};
