//! # Resource Resolver
//!
//! Maps a failing cloud resource (ARN plus `Service::Kind` type) to the
//! Terraform block that declares it inside a repository checkout, together
//! with the providers, variables, outputs and module calls of the same file.
//!
//! Resolution is synchronous file I/O; async callers should run it on a
//! blocking thread.

pub mod arn;
pub mod hcl;
pub mod mappings;
pub mod resolver;

pub use arn::{extract_name, ParsedArn};
pub use mappings::{is_supported_type, name_attributes, supported_types, terraform_type_for, types_for_service};
pub use resolver::{ParsedFile, RepositoryIndex, ResourceResolver, SkippedFile};
