pub mod graphql;
pub mod grpc;
pub mod rest;
