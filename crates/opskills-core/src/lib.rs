//! # opskills-core
//!
//! Core types and abstractions for OpsSkills.
//!
//! This crate provides:
//! - Skill descriptors, the registry and the SKILL.md loader
//! - The dynamic parameter value type and execution results
//! - Configuration system
//! - Common error types

pub mod config;
pub mod error;
pub mod loader;
pub mod registry;
pub mod skill;
pub mod value;

pub use config::{Config, ExecutionMode, McpServerConfig, SkillConfig};
pub use error::{Error, Result, SkillError};
pub use loader::{LoadResult, SkillLoader};
pub use registry::SkillRegistry;
pub use skill::{ExecutionResult, FailureKind, Skill};
pub use value::{ExecutionParams, ParamValue};
