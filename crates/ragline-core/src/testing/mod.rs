//! Testing utilities for ragline-core.
//!
//! Mock implementations and fixtures for exercising the gateway without
//! reaching OpenAI or AWS.
//!
//! # Components
//!
//! - [`fixtures`]: Common test data and server builders
//! - [`mock_services`]: HTTP mock speaking the OpenAI, OpenSearch domain
//!   configuration and OpenSearch cluster wire formats

pub mod fixtures;
pub mod mock_services;

pub use fixtures::*;
pub use mock_services::MockServices;
