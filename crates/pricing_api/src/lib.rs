//! HTTP surface of the dynamic pricing service

pub mod server;

pub use server::{
    build_router, start_server, ApiConfig, AppState, ErrorResponse, TrainResponse, UploadResponse,
};
